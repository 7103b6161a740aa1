use std::fmt::Debug;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::context::{AerodynamicMode, FlightContext};
use super::state::{MassProperties, RigidBodyState};
use crate::constants::{TUMBLE_DRAG_COEFFICIENT, VELOCITY_EPSILON};
use crate::control::conditions::SimulationConditions;
use crate::control::environment::AtmosphericConditions;
use crate::errors::{SimulationError, Warning};

/// Air data seen by the aerodynamic calculator, in the body frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightConditions {
    /// Velocity of the rocket relative to the air.
    pub air_velocity: Vector3<f64>,
    pub airspeed: f64,
    pub atmosphere: AtmosphericConditions,
    pub mach: f64,
    pub angle_of_attack: f64,
    pub angular_velocity: Vector3<f64>,
    pub center_of_gravity: f64,
}

impl FlightConditions {
    pub fn dynamic_pressure(&self) -> f64 {
        0.5 * self.atmosphere.density * self.airspeed * self.airspeed
    }
}

/// Aerodynamic loads in the body frame, moments about the centre of gravity.
#[derive(Debug, Clone, PartialEq)]
pub struct AerodynamicForces {
    pub force: Vector3<f64>,
    pub moment: Vector3<f64>,
    pub drag: f64,
    pub drag_coefficient: f64,
    pub center_of_pressure: Option<f64>,
    pub reference_area: f64,
    pub warnings: Vec<Warning>,
}

pub trait AerodynamicCalculator: Send + Sync + Debug {
    fn forces(
        &self,
        context: &FlightContext,
        conditions: &FlightConditions,
    ) -> Result<AerodynamicForces, SimulationError>;

    /// Centre of pressure of the active stages, `None` when they produce no normal force.
    fn center_of_pressure(&self, context: &FlightContext) -> Option<f64>;

    /// Zero-angle drag coefficient and its reference area.
    fn drag_area(&self, context: &FlightContext) -> f64;
}

/// Quantities recorded with each sample, computed at the accepted state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DerivedQuantities {
    pub thrust: f64,
    pub drag: f64,
    pub drag_coefficient: f64,
    pub angle_of_attack: f64,
    pub mach: f64,
    pub air_density: f64,
    pub center_of_pressure: Option<f64>,
    pub center_of_gravity: f64,
    pub wind: Vector3<f64>,
    pub gravity: f64,
    pub acceleration: Vector3<f64>,
}

/// Net load on the body. `force` is in the world frame and includes gravity;
/// `moment` is in the body frame about the centre of gravity.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceMoment {
    pub force: Vector3<f64>,
    pub moment: Vector3<f64>,
    pub mass: MassProperties,
    pub derived: DerivedQuantities,
    pub warnings: Vec<Warning>,
}

pub trait ForceMomentModel: Send + Sync + Debug {
    fn evaluate(
        &self,
        state: &RigidBodyState,
        context: &FlightContext,
        conditions: &SimulationConditions,
    ) -> Result<ForceMoment, SimulationError>;
}

/// Combines the run's mass calculator, motors, atmosphere, wind and aerodynamic
/// calculator into one force/moment function.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlightForceModel;

impl FlightForceModel {
    fn flight_conditions(
        state: &RigidBodyState,
        atmosphere: AtmosphericConditions,
        wind: &Vector3<f64>,
        mass: &MassProperties,
    ) -> FlightConditions {
        let air_velocity = state
            .orientation
            .inverse_transform_vector(&(state.velocity - wind));
        let airspeed = air_velocity.norm();
        let angle_of_attack = if airspeed < VELOCITY_EPSILON {
            0.0
        } else {
            (air_velocity.z / airspeed).clamp(-1.0, 1.0).acos()
        };
        let mach = if atmosphere.speed_of_sound > 0.0 {
            airspeed / atmosphere.speed_of_sound
        } else {
            0.0
        };

        FlightConditions {
            air_velocity,
            airspeed,
            atmosphere,
            mach,
            angle_of_attack,
            angular_velocity: state.angular_velocity,
            center_of_gravity: mass.center_of_gravity,
        }
    }
}

fn drag_along_airflow(flight: &FlightConditions, drag_area: f64) -> (Vector3<f64>, f64) {
    if flight.airspeed < VELOCITY_EPSILON {
        return (Vector3::zeros(), 0.0);
    }
    let drag = flight.dynamic_pressure() * drag_area;
    (-flight.air_velocity / flight.airspeed * drag, drag)
}

impl ForceMomentModel for FlightForceModel {
    fn evaluate(
        &self,
        state: &RigidBodyState,
        context: &FlightContext,
        conditions: &SimulationConditions,
    ) -> Result<ForceMoment, SimulationError> {
        let models = &conditions.models;
        let mass = models.mass_calculator.mass_properties(context, state.time)?;
        let thrust = context.thrust(state.time)?;

        let altitude = state.altitude();
        let atmosphere = conditions
            .atmosphere
            .conditions(conditions.options.launch_site.altitude + altitude);
        let wind = conditions.wind.velocity(state.time, altitude) + context.wind_gust;
        let gravity = conditions.gravity(altitude);
        let flight = Self::flight_conditions(state, atmosphere, &wind, &mass);

        let mut warnings = Vec::new();
        let (aero_force, mut moment, drag, drag_coefficient, center_of_pressure) =
            match context.mode {
                AerodynamicMode::Flight => {
                    let aero = models.aerodynamics.forces(context, &flight)?;
                    warnings.extend(aero.warnings);
                    (
                        aero.force,
                        aero.moment,
                        aero.drag,
                        aero.drag_coefficient,
                        aero.center_of_pressure,
                    )
                }
                AerodynamicMode::Tumbling => {
                    let area = context.configuration.length(&context.stages)
                        * context.configuration.max_diameter(&context.stages);
                    let (force, drag) = drag_along_airflow(&flight, TUMBLE_DRAG_COEFFICIENT * area);
                    (force, Vector3::zeros(), drag, TUMBLE_DRAG_COEFFICIENT, None)
                }
                AerodynamicMode::Recovery => {
                    let reference_area = context.configuration.reference_area(&context.stages);
                    let drag_area =
                        models.aerodynamics.drag_area(context) + context.recovery_drag_area();
                    let (force, drag) = drag_along_airflow(&flight, drag_area);
                    let coefficient = if reference_area > 0.0 {
                        drag_area / reference_area
                    } else {
                        0.0
                    };
                    (force, Vector3::zeros(), drag, coefficient, None)
                }
            };

        let mut force = state.orientation * (aero_force + Vector3::z() * thrust)
            + Vector3::new(0.0, 0.0, -mass.mass * gravity);

        if context.on_launch_rod {
            let rod = &conditions.launch_rod_direction;
            let along = force.dot(rod);
            force = if !context.lifted_off && along < 0.0 {
                Vector3::zeros()
            } else {
                rod * along
            };
            moment = Vector3::zeros();
        }

        let derived = DerivedQuantities {
            thrust,
            drag,
            drag_coefficient,
            angle_of_attack: flight.angle_of_attack,
            mach: flight.mach,
            air_density: atmosphere.density,
            center_of_pressure,
            center_of_gravity: mass.center_of_gravity,
            wind,
            gravity,
            acceleration: force / mass.mass,
        };

        Ok(ForceMoment {
            force,
            moment,
            mass,
            derived,
            warnings,
        })
    }
}
