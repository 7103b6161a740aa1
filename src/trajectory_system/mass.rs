use std::fmt::Debug;

use super::context::FlightContext;
use super::state::MassProperties;
use crate::errors::SimulationError;

/// Mass, centre of gravity and inertia of a branch's active components at `time`.
pub trait MassCalculator: Send + Sync + Debug {
    fn mass_properties(
        &self,
        context: &FlightContext,
        time: f64,
    ) -> Result<MassProperties, SimulationError>;
}

/// Lumps stage structures and motors into one rigid body with the parallel-axis theorem.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicMassCalculator;

struct Component {
    mass: f64,
    position: f64,
    longitudinal: f64,
    rotational: f64,
}

impl BasicMassCalculator {
    fn components(
        &self,
        context: &FlightContext,
        time: f64,
    ) -> Result<Vec<Component>, SimulationError> {
        let mut components = Vec::new();

        for (stage, stage_index) in context.stages().iter().zip(context.stages.start..) {
            components.push(Component {
                mass: stage.dry_mass,
                position: stage.center_of_gravity,
                longitudinal: stage.longitudinal_inertia,
                rotational: stage.rotational_inertia,
            });

            for (index, mount) in stage.motors.iter().enumerate() {
                let elapsed = context
                    .motors
                    .iter()
                    .find(|m| m.id.stage == stage_index && m.id.index == index)
                    .and_then(|m| m.ignition_time)
                    .map_or(0.0, |ignition| (time - ignition).max(0.0));
                let mass = mount.motor.mass(elapsed)?;
                let radius = mount.motor.diameter() / 2.0;
                let length = mount.motor.length();

                components.push(Component {
                    mass,
                    position: mount.position,
                    longitudinal: mass * (3.0 * radius * radius + length * length) / 12.0,
                    rotational: mass * radius * radius / 2.0,
                });
            }
        }

        Ok(components)
    }
}

impl MassCalculator for BasicMassCalculator {
    fn mass_properties(
        &self,
        context: &FlightContext,
        time: f64,
    ) -> Result<MassProperties, SimulationError> {
        let components = self.components(context, time)?;
        let mass: f64 = components.iter().map(|c| c.mass).sum();

        if !(mass.is_finite() && mass > 0.0) {
            return Err(SimulationError::collaborator(
                "mass calculator",
                format!("non-positive mass {} at t={:.3}s", mass, time),
            ));
        }

        let cg = components.iter().map(|c| c.mass * c.position).sum::<f64>() / mass;
        let longitudinal = components
            .iter()
            .map(|c| c.longitudinal + c.mass * (c.position - cg).powi(2))
            .sum();
        let rotational = components.iter().map(|c| c.rotational).sum();

        Ok(MassProperties::new(mass, cg, longitudinal, rotational))
    }
}
