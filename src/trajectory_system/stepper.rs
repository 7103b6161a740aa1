use std::fmt::Debug;

use nalgebra::{UnitQuaternion, Vector3};

use super::forces::ForceMoment;
use super::state::{RigidBodyState, StateDerivative};
use crate::errors::SimulationError;
use crate::utils::geometry::quaternion_derivative;

/// Force/moment function handed to a stepper for the duration of one step.
pub type ForceFn<'a> = dyn Fn(&RigidBodyState) -> Result<ForceMoment, SimulationError> + 'a;

/// Advances a rigid body by one time step. Implementations hold no state
/// between calls, so identical inputs always give identical outputs.
pub trait NumericalStepper: Send + Sync + Debug {
    fn advance(
        &self,
        state: &RigidBodyState,
        forces: &ForceFn<'_>,
        dt: f64,
    ) -> Result<RigidBodyState, SimulationError>;
}

/// Evaluates the state derivative. Mass and inertia are queried from the force
/// model at the evaluation time, never integrated.
pub fn derivative(
    state: &RigidBodyState,
    forces: &ForceFn<'_>,
) -> Result<StateDerivative, SimulationError> {
    let load = forces(state)?;
    let mass = load.mass;

    let omega = state.angular_velocity;
    let torque = load.moment - omega.cross(&(mass.inertia * omega));
    let angular_acceleration = match mass.inertia.try_inverse() {
        Some(inverse) => inverse * torque,
        None if torque.norm() == 0.0 => Vector3::zeros(),
        None => {
            return Err(SimulationError::PhysicsError(format!(
                "singular inertia with non-zero moment at t={:.4}s",
                state.time
            )))
        }
    };

    Ok(StateDerivative {
        velocity: state.velocity,
        acceleration: load.force / mass.mass,
        orientation_rate: quaternion_derivative(&state.orientation, &omega),
        angular_acceleration,
        mass,
    })
}

/// Classic fourth-order Runge-Kutta.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rk4Stepper;

impl NumericalStepper for Rk4Stepper {
    fn advance(
        &self,
        state: &RigidBodyState,
        forces: &ForceFn<'_>,
        dt: f64,
    ) -> Result<RigidBodyState, SimulationError> {
        let k1 = derivative(state, forces)?;
        let k2 = derivative(&state.offset(&k1, dt / 2.0), forces)?;
        let k3 = derivative(&state.offset(&k2, dt / 2.0), forces)?;
        let k4 = derivative(&state.offset(&k3, dt), forces)?;

        let orientation = state.orientation.quaternion()
            + (k1.orientation_rate
                + k2.orientation_rate * 2.0
                + k3.orientation_rate * 2.0
                + k4.orientation_rate)
                * (dt / 6.0);

        Ok(RigidBodyState {
            time: state.time + dt,
            position: state.position
                + (k1.velocity + 2.0 * k2.velocity + 2.0 * k3.velocity + k4.velocity) * (dt / 6.0),
            velocity: state.velocity
                + (k1.acceleration + 2.0 * k2.acceleration + 2.0 * k3.acceleration + k4.acceleration)
                    * (dt / 6.0),
            orientation: UnitQuaternion::from_quaternion(orientation),
            angular_velocity: state.angular_velocity
                + (k1.angular_acceleration
                    + 2.0 * k2.angular_acceleration
                    + 2.0 * k3.angular_acceleration
                    + k4.angular_acceleration)
                    * (dt / 6.0),
            mass: k4.mass.mass,
            inertia: k4.mass.inertia,
        })
    }
}

/// First-order explicit Euler. Cheap, only useful for comparisons.
#[derive(Debug, Clone, Copy, Default)]
pub struct EulerStepper;

impl NumericalStepper for EulerStepper {
    fn advance(
        &self,
        state: &RigidBodyState,
        forces: &ForceFn<'_>,
        dt: f64,
    ) -> Result<RigidBodyState, SimulationError> {
        let k1 = derivative(state, forces)?;
        let mut next = state.offset(&k1, dt);
        let end_mass = forces(&next)?.mass;
        next = next.with_mass(&end_mass);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory_system::forces::DerivedQuantities;
    use crate::trajectory_system::state::MassProperties;
    use approx::assert_relative_eq;

    const GRAVITY: f64 = 9.81;

    fn create_test_state() -> RigidBodyState {
        RigidBodyState::at_rest(
            UnitQuaternion::identity(),
            MassProperties::new(1000.0, 5.0, 100.0, 10.0),
        )
    }

    fn constant_load(force: Vector3<f64>, moment: Vector3<f64>) -> impl Fn(&RigidBodyState) -> Result<ForceMoment, SimulationError> {
        move |state: &RigidBodyState| {
            Ok(ForceMoment {
                force,
                moment,
                mass: MassProperties {
                    mass: state.mass,
                    center_of_gravity: 5.0,
                    inertia: state.inertia,
                },
                derived: DerivedQuantities::default(),
                warnings: Vec::new(),
            })
        }
    }

    #[test]
    fn test_free_fall_is_exact() {
        let mut state = create_test_state();
        state.position.z = 100.0;
        let gravity = constant_load(Vector3::new(0.0, 0.0, -1000.0 * GRAVITY), Vector3::zeros());

        let next = Rk4Stepper.advance(&state, &gravity, 1.0).unwrap();

        // Constant acceleration is integrated exactly by RK4
        assert_relative_eq!(next.velocity.z, -GRAVITY, epsilon = 1e-12);
        assert_relative_eq!(next.position.z, 100.0 - 0.5 * GRAVITY, epsilon = 1e-12);
        assert_eq!(next.time, 1.0);
    }

    #[test]
    fn test_stepper_is_pure() {
        let state = create_test_state();
        let load = constant_load(Vector3::new(15_000.0, 0.0, 0.0), Vector3::new(0.0, 2.0, 0.0));

        let a = Rk4Stepper.advance(&state, &load, 0.05).unwrap();
        let b = Rk4Stepper.advance(&state, &load, 0.05).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_time_varying_mass_is_queried() {
        let state = create_test_state();
        // Mass drops 10 kg/s, force constant: velocity follows F·ln(m0/m)/ṁ
        let load = |s: &RigidBodyState| {
            Ok(ForceMoment {
                force: Vector3::new(0.0, 0.0, 20_000.0),
                moment: Vector3::zeros(),
                mass: MassProperties::new(1000.0 - 10.0 * s.time, 5.0, 100.0, 10.0),
                derived: DerivedQuantities::default(),
                warnings: Vec::new(),
            })
        };

        let mut current = state;
        for _ in 0..100 {
            current = Rk4Stepper.advance(&current, &load, 0.1).unwrap();
        }

        let expected = 20_000.0 / 10.0 * (1000.0_f64 / 900.0).ln();
        assert_relative_eq!(current.velocity.z, expected, epsilon = 1e-6);
        assert_relative_eq!(current.mass, 900.0, epsilon = 1e-9);
    }

    #[test]
    fn test_torque_spins_up_body() {
        let state = create_test_state();
        let load = constant_load(Vector3::zeros(), Vector3::new(0.0, 0.0, 10.0));

        let next = Rk4Stepper.advance(&state, &load, 0.5).unwrap();

        // I_zz = 10 kg·m², M = 10 N·m → ω̇ = 1 rad/s²
        assert_relative_eq!(next.angular_velocity.z, 0.5, epsilon = 1e-12);
        assert_relative_eq!(next.orientation.angle(), 0.125, epsilon = 1e-6);
    }

    #[test]
    fn test_torque_free_precession_keeps_energy() {
        let mut state = create_test_state();
        state.inertia = MassProperties::new(1000.0, 5.0, 100.0, 10.0).inertia;
        state.angular_velocity = Vector3::new(0.2, 0.0, 3.0);
        let load = constant_load(Vector3::zeros(), Vector3::zeros());

        let energy = |s: &RigidBodyState| 0.5 * s.angular_velocity.dot(&(s.inertia * s.angular_velocity));
        let initial = energy(&state);

        let mut current = state;
        for _ in 0..200 {
            current = Rk4Stepper.advance(&current, &load, 0.01).unwrap();
        }

        assert_relative_eq!(energy(&current), initial, epsilon = 1e-6);
        assert_relative_eq!(current.orientation.quaternion().norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_force_errors_propagate() {
        let state = create_test_state();
        let failing =
            |_: &RigidBodyState| -> Result<ForceMoment, SimulationError> { Err(SimulationError::collaborator("motor", "lookup failed")) };

        assert!(matches!(
            Rk4Stepper.advance(&state, &failing, 0.05),
            Err(SimulationError::Collaborator { .. })
        ));
    }

    #[test]
    fn test_nan_propagates_instead_of_clamping() {
        let state = create_test_state();
        let load = constant_load(Vector3::new(f64::NAN, 0.0, 0.0), Vector3::zeros());

        let next = Rk4Stepper.advance(&state, &load, 0.05).unwrap();
        assert!(!next.is_finite());
    }

    #[test]
    fn test_euler_is_first_order() {
        let state = create_test_state();
        let gravity = constant_load(Vector3::new(0.0, 0.0, -1000.0 * GRAVITY), Vector3::zeros());

        let next = EulerStepper.advance(&state, &gravity, 1.0).unwrap();

        assert_relative_eq!(next.velocity.z, -GRAVITY, epsilon = 1e-12);
        // Position uses the velocity at the start of the step
        assert_relative_eq!(next.position.z, 0.0, epsilon = 1e-12);
    }
}
