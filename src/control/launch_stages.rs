use serde::{Deserialize, Serialize};

use super::propulsion::MotorMount;

/// Aerodynamic contribution of one stage. All stage coefficients share the
/// reference area of the widest active stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AerodynamicProfile {
    pub drag_coefficient: f64,
    /// Normal force coefficient slope (per radian).
    pub normal_force_slope: f64,
    /// Centre of pressure, measured from the nose tip of the complete rocket.
    pub center_of_pressure: f64,
}

impl AerodynamicProfile {
    pub fn new(drag_coefficient: f64, normal_force_slope: f64, center_of_pressure: f64) -> Self {
        AerodynamicProfile {
            drag_coefficient,
            normal_force_slope,
            center_of_pressure,
        }
    }

    /// Pure drag, no normal force.
    pub fn drag_only(drag_coefficient: f64) -> Self {
        AerodynamicProfile {
            drag_coefficient,
            normal_force_slope: 0.0,
            center_of_pressure: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SeparationTrigger {
    /// After burnout of any motor in this stage.
    Burnout { delay: f64 },
    /// After the ejection charge of any motor in this stage.
    EjectionCharge { delay: f64 },
    /// Fixed time after the first ignition in this stage.
    TimeSinceIgnition(f64),
    Never,
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub dry_mass: f64, // kg
    /// Structure centre of gravity from the nose tip.
    pub center_of_gravity: f64,
    /// Moments of inertia about the stage's own centre of gravity (kg·m²).
    pub longitudinal_inertia: f64,
    pub rotational_inertia: f64,
    pub length: f64,
    pub diameter: f64,
    pub aerodynamics: AerodynamicProfile,
    pub motors: Vec<MotorMount>,
    pub separation: SeparationTrigger,
}

impl Stage {
    /// Stage modelled as a uniform thin-walled tube for its inertia.
    pub fn new(
        name: impl Into<String>,
        dry_mass: f64,
        center_of_gravity: f64,
        length: f64,
        diameter: f64,
    ) -> Self {
        let radius = diameter / 2.0;
        Stage {
            name: name.into(),
            dry_mass,
            center_of_gravity,
            longitudinal_inertia: dry_mass * (6.0 * radius * radius + length * length) / 12.0,
            rotational_inertia: dry_mass * radius * radius,
            length,
            diameter,
            aerodynamics: AerodynamicProfile::drag_only(0.0),
            motors: Vec::new(),
            separation: SeparationTrigger::Never,
        }
    }

    pub fn with_aerodynamics(mut self, profile: AerodynamicProfile) -> Self {
        self.aerodynamics = profile;
        self
    }

    pub fn with_inertia(mut self, longitudinal: f64, rotational: f64) -> Self {
        self.longitudinal_inertia = longitudinal;
        self.rotational_inertia = rotational;
        self
    }

    pub fn with_motor(mut self, mount: MotorMount) -> Self {
        self.motors.push(mount);
        self
    }

    pub fn with_separation(mut self, trigger: SeparationTrigger) -> Self {
        self.separation = trigger;
        self
    }

    pub fn has_usable_motors(&self) -> bool {
        self.motors.iter().any(|mount| mount.is_usable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::propulsion::{IgnitionTrigger, MotorModel, ThrustCurveMotor};
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    fn create_test_motor() -> Arc<dyn MotorModel> {
        Arc::new(ThrustCurveMotor::constant("D12", 12.0, 1.6, 0.01, 0.02, 0.07, 0.024).unwrap())
    }

    #[test]
    fn test_new_stage() {
        let stage = Stage::new("Booster", 0.5, 0.9, 0.6, 0.05);
        assert_eq!(stage.name, "Booster");
        assert_eq!(stage.dry_mass, 0.5);
        assert_eq!(stage.separation, SeparationTrigger::Never);
        assert!(stage.motors.is_empty());
        assert!(!stage.has_usable_motors());
    }

    #[test]
    fn test_default_tube_inertia() {
        let stage = Stage::new("Tube", 1.2, 0.5, 1.0, 0.1);
        assert_abs_diff_eq!(
            stage.longitudinal_inertia,
            1.2 * (6.0 * 0.0025 + 1.0) / 12.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(stage.rotational_inertia, 1.2 * 0.0025, epsilon = 1e-12);
    }

    #[test]
    fn test_stage_builder() {
        let stage = Stage::new("Sustainer", 0.3, 0.4, 0.8, 0.04)
            .with_aerodynamics(AerodynamicProfile::new(0.45, 9.0, 0.6))
            .with_inertia(0.02, 0.0001)
            .with_motor(MotorMount::new(create_test_motor(), 0.7))
            .with_separation(SeparationTrigger::Burnout { delay: 0.5 });

        assert_eq!(stage.aerodynamics.normal_force_slope, 9.0);
        assert_eq!(stage.longitudinal_inertia, 0.02);
        assert_eq!(stage.motors.len(), 1);
        assert!(stage.has_usable_motors());
        assert_eq!(stage.separation, SeparationTrigger::Burnout { delay: 0.5 });
    }

    #[test]
    fn test_disabled_motor_is_not_usable() {
        let stage = Stage::new("Sustainer", 0.3, 0.4, 0.8, 0.04).with_motor(
            MotorMount::new(create_test_motor(), 0.7).with_ignition(IgnitionTrigger::Never, 0.0),
        );
        assert!(!stage.has_usable_motors());
    }
}
