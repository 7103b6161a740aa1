use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::errors::SimulationError;
use crate::utils::geometry::{is_finite_quaternion, is_finite_vector};

/// Mass, centre of gravity and body-frame inertia at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassProperties {
    pub mass: f64, // kg
    /// Distance from the nose tip.
    pub center_of_gravity: f64,
    /// Body-frame inertia tensor about the centre of gravity.
    pub inertia: Matrix3<f64>,
}

impl MassProperties {
    pub fn new(mass: f64, center_of_gravity: f64, longitudinal: f64, rotational: f64) -> Self {
        MassProperties {
            mass,
            center_of_gravity,
            inertia: Matrix3::from_diagonal(&Vector3::new(longitudinal, longitudinal, rotational)),
        }
    }

    pub fn point_mass(mass: f64) -> Self {
        MassProperties::new(mass, 0.0, 0.0, 0.0)
    }

    pub fn longitudinal_inertia(&self) -> f64 {
        self.inertia[(0, 0)]
    }

    pub fn rotational_inertia(&self) -> f64 {
        self.inertia[(2, 2)]
    }
}

/// Kinematic and mass state of one rigid body.
///
/// World frame: x east, y north, z up, origin at the launch point. The body
/// z-axis points towards the nose; `orientation` rotates body vectors into the
/// world frame and `angular_velocity` is expressed in the body frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyState {
    pub time: f64,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub angular_velocity: Vector3<f64>,
    pub mass: f64,
    pub inertia: Matrix3<f64>,
}

/// Time derivative of a [`RigidBodyState`], plus the mass properties it was evaluated with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateDerivative {
    pub velocity: Vector3<f64>,
    pub acceleration: Vector3<f64>,
    pub orientation_rate: Quaternion<f64>,
    pub angular_acceleration: Vector3<f64>,
    pub mass: MassProperties,
}

impl RigidBodyState {
    pub fn at_rest(orientation: UnitQuaternion<f64>, mass: MassProperties) -> Self {
        RigidBodyState {
            time: 0.0,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            orientation,
            angular_velocity: Vector3::zeros(),
            mass: mass.mass,
            inertia: mass.inertia,
        }
    }

    pub fn altitude(&self) -> f64 {
        self.position.z
    }

    pub fn speed(&self) -> f64 {
        self.velocity.norm()
    }

    /// Nose direction in the world frame.
    pub fn axis(&self) -> Vector3<f64> {
        self.orientation * Vector3::z()
    }

    pub fn with_mass(mut self, mass: &MassProperties) -> Self {
        self.mass = mass.mass;
        self.inertia = mass.inertia;
        self
    }

    /// Explicit Euler extrapolation `self + dt·derivative`; orientation is renormalised.
    pub fn offset(&self, derivative: &StateDerivative, dt: f64) -> Self {
        let orientation = self.orientation.quaternion() + derivative.orientation_rate * dt;
        RigidBodyState {
            time: self.time + dt,
            position: self.position + derivative.velocity * dt,
            velocity: self.velocity + derivative.acceleration * dt,
            orientation: UnitQuaternion::from_quaternion(orientation),
            angular_velocity: self.angular_velocity + derivative.angular_acceleration * dt,
            mass: derivative.mass.mass,
            inertia: derivative.mass.inertia,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.time.is_finite()
            && is_finite_vector(&self.position)
            && is_finite_vector(&self.velocity)
            && is_finite_quaternion(self.orientation.quaternion())
            && is_finite_vector(&self.angular_velocity)
            && self.mass.is_finite()
            && self.inertia.iter().all(|c| c.is_finite())
    }

    /// Names the first non-finite component.
    pub fn check_finite(&self) -> Result<(), SimulationError> {
        let bad = if !self.time.is_finite() {
            Some("time")
        } else if !is_finite_vector(&self.position) {
            Some("position")
        } else if !is_finite_vector(&self.velocity) {
            Some("velocity")
        } else if !is_finite_quaternion(self.orientation.quaternion()) {
            Some("orientation")
        } else if !is_finite_vector(&self.angular_velocity) {
            Some("angular velocity")
        } else if !self.mass.is_finite() || !self.inertia.iter().all(|c| c.is_finite()) {
            Some("mass")
        } else {
            None
        };

        match bad {
            Some(component) => Err(SimulationError::NonFinite(component.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn create_test_state() -> RigidBodyState {
        RigidBodyState::at_rest(
            UnitQuaternion::identity(),
            MassProperties::new(2.0, 0.5, 0.1, 0.01),
        )
    }

    #[test]
    fn test_state_at_rest() {
        let state = create_test_state();
        assert_eq!(state.time, 0.0);
        assert_eq!(state.altitude(), 0.0);
        assert_eq!(state.speed(), 0.0);
        assert_eq!(state.mass, 2.0);
        assert_abs_diff_eq!(state.axis(), Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn test_mass_properties_diagonal() {
        let props = MassProperties::new(2.0, 0.5, 0.1, 0.01);
        assert_eq!(props.longitudinal_inertia(), 0.1);
        assert_eq!(props.inertia[(1, 1)], 0.1);
        assert_eq!(props.rotational_inertia(), 0.01);
        assert_eq!(props.inertia[(0, 1)], 0.0);
    }

    #[test]
    fn test_offset_advances_linearly() {
        let state = create_test_state();
        let derivative = StateDerivative {
            velocity: Vector3::new(0.0, 0.0, 10.0),
            acceleration: Vector3::new(0.0, 0.0, -9.8),
            orientation_rate: Quaternion::new(0.0, 0.0, 0.0, 0.0),
            angular_acceleration: Vector3::zeros(),
            mass: MassProperties::new(1.5, 0.5, 0.1, 0.01),
        };

        let next = state.offset(&derivative, 0.5);
        assert_eq!(next.time, 0.5);
        assert_abs_diff_eq!(next.position.z, 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(next.velocity.z, -4.9, epsilon = 1e-12);
        assert_eq!(next.mass, 1.5);
    }

    #[test]
    fn test_non_finite_component_is_named() {
        let mut state = create_test_state();
        assert!(state.check_finite().is_ok());

        state.velocity.y = f64::NAN;
        assert!(!state.is_finite());
        match state.check_finite() {
            Err(SimulationError::NonFinite(component)) => assert_eq!(component, "velocity"),
            other => panic!("expected non-finite velocity, got {:?}", other),
        }
    }
}
