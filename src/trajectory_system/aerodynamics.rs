use nalgebra::Vector3;

use super::context::FlightContext;
use super::forces::{AerodynamicCalculator, AerodynamicForces, FlightConditions};
use crate::constants::{LARGE_AOA_WARNING, VELOCITY_EPSILON};
use crate::errors::{SimulationError, Warning};

/// Lumped-coefficient aerodynamics: summed stage drag, a single normal force
/// at the combined centre of pressure, and pitch damping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasicAerodynamics {
    pub pitch_damping_coefficient: f64,
    /// Relative drag increase at 90° angle of attack.
    pub angle_of_attack_drag_factor: f64,
}

impl Default for BasicAerodynamics {
    fn default() -> Self {
        BasicAerodynamics {
            pitch_damping_coefficient: 1.0,
            angle_of_attack_drag_factor: 0.1,
        }
    }
}

impl BasicAerodynamics {
    pub fn new(pitch_damping_coefficient: f64, angle_of_attack_drag_factor: f64) -> Self {
        BasicAerodynamics {
            pitch_damping_coefficient,
            angle_of_attack_drag_factor,
        }
    }

    pub fn calculate_drag(
        &self,
        flight: &FlightConditions,
        drag_coefficient: f64,
        reference_area: f64,
    ) -> Vector3<f64> {
        if flight.airspeed < VELOCITY_EPSILON {
            return Vector3::zeros();
        }
        let drag_coefficient_adjusted = drag_coefficient
            * (1.0 + self.angle_of_attack_drag_factor * flight.angle_of_attack.sin().abs());
        let drag_magnitude =
            self.calculate_dynamic_pressure(flight) * reference_area * drag_coefficient_adjusted;

        -flight.air_velocity / flight.airspeed * drag_magnitude
    }

    /// Normal force opposing the lateral component of the air-relative velocity.
    pub fn calculate_normal_force(
        &self,
        flight: &FlightConditions,
        normal_force_slope: f64,
        reference_area: f64,
    ) -> Vector3<f64> {
        let lateral = Vector3::new(flight.air_velocity.x, flight.air_velocity.y, 0.0);
        let lateral_speed = lateral.norm();
        if lateral_speed < VELOCITY_EPSILON {
            return Vector3::zeros();
        }
        let normal_magnitude = self.calculate_dynamic_pressure(flight)
            * reference_area
            * normal_force_slope
            * flight.angle_of_attack.sin();

        -lateral / lateral_speed * normal_magnitude
    }

    pub fn pitch_damping_moment(
        &self,
        flight: &FlightConditions,
        reference_area: f64,
        length: f64,
    ) -> Vector3<f64> {
        let pitch_rate = Vector3::new(flight.angular_velocity.x, flight.angular_velocity.y, 0.0);
        -pitch_rate
            * (0.5
                * flight.atmosphere.density
                * flight.airspeed
                * reference_area
                * length
                * length
                * self.pitch_damping_coefficient)
    }

    fn calculate_dynamic_pressure(&self, flight: &FlightConditions) -> f64 {
        flight.dynamic_pressure()
    }

    fn normal_force_slope(context: &FlightContext) -> f64 {
        context
            .stages()
            .iter()
            .map(|s| s.aerodynamics.normal_force_slope)
            .sum()
    }

    fn drag_coefficient(context: &FlightContext) -> f64 {
        context
            .stages()
            .iter()
            .map(|s| s.aerodynamics.drag_coefficient)
            .sum()
    }
}

impl AerodynamicCalculator for BasicAerodynamics {
    fn forces(
        &self,
        context: &FlightContext,
        flight: &FlightConditions,
    ) -> Result<AerodynamicForces, SimulationError> {
        let reference_area = context.configuration.reference_area(&context.stages);
        let length = context.configuration.length(&context.stages);
        let drag_coefficient = Self::drag_coefficient(context);

        let drag = self.calculate_drag(flight, drag_coefficient, reference_area);
        let normal = self.calculate_normal_force(flight, Self::normal_force_slope(context), reference_area);
        let center_of_pressure = self.center_of_pressure(context);

        // Lever from the centre of gravity to the centre of pressure along the body axis
        let restoring = center_of_pressure.map_or_else(Vector3::zeros, |cp| {
            Vector3::new(0.0, 0.0, flight.center_of_gravity - cp).cross(&normal)
        });
        let moment = restoring + self.pitch_damping_moment(flight, reference_area, length);

        let mut warnings = Vec::new();
        if flight.mach > 1.0 {
            warnings.push(Warning::Supersonic(flight.mach));
        }
        if flight.angle_of_attack > LARGE_AOA_WARNING && flight.airspeed > 1.0 {
            warnings.push(Warning::LargeAngleOfAttack(flight.angle_of_attack));
        }

        let force = drag + normal;
        if !force.iter().chain(moment.iter()).all(|c| c.is_finite()) {
            return Err(SimulationError::NonFinite("aerodynamic forces".to_string()));
        }

        Ok(AerodynamicForces {
            force,
            moment,
            drag: drag.norm(),
            drag_coefficient,
            center_of_pressure,
            reference_area,
            warnings,
        })
    }

    fn center_of_pressure(&self, context: &FlightContext) -> Option<f64> {
        let slope = Self::normal_force_slope(context);
        if slope <= 0.0 {
            return None;
        }
        let moment: f64 = context
            .stages()
            .iter()
            .map(|s| s.aerodynamics.normal_force_slope * s.aerodynamics.center_of_pressure)
            .sum();
        Some(moment / slope)
    }

    fn drag_area(&self, context: &FlightContext) -> f64 {
        Self::drag_coefficient(context) * context.configuration.reference_area(&context.stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::environment::{AtmosphereModel, IsaAtmosphere};
    use crate::control::launch_stages::{AerodynamicProfile, Stage};
    use crate::control::structure::FlightConfiguration;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    const EPSILON: f64 = 1e-9;

    fn create_test_context() -> FlightContext {
        let config = FlightConfiguration::new(
            "default",
            vec![
                Stage::new("Sustainer", 0.5, 0.4, 0.8, 0.1)
                    .with_aerodynamics(AerodynamicProfile::new(0.3, 2.0, 0.2)),
                Stage::new("Booster", 0.5, 1.0, 0.6, 0.1)
                    .with_aerodynamics(AerodynamicProfile::new(0.2, 6.0, 1.2)),
            ],
        );
        FlightContext::new(Arc::new(config))
    }

    fn create_flight_conditions(air_velocity: Vector3<f64>, center_of_gravity: f64) -> FlightConditions {
        let airspeed = air_velocity.norm();
        let atmosphere = IsaAtmosphere::standard().conditions(0.0);
        let angle_of_attack = if airspeed > 0.0 {
            (air_velocity.z / airspeed).acos()
        } else {
            0.0
        };
        FlightConditions {
            air_velocity,
            airspeed,
            atmosphere,
            mach: airspeed / atmosphere.speed_of_sound,
            angle_of_attack,
            angular_velocity: Vector3::zeros(),
            center_of_gravity,
        }
    }

    #[test]
    fn test_drag_calculation_at_sea_level() {
        let aero = BasicAerodynamics::default();
        let flight = create_flight_conditions(Vector3::new(0.0, 0.0, 100.0), 0.7);

        let drag = aero.calculate_drag(&flight, 0.5, 0.01);

        // q = 0.5 * 1.225 * 100² = 6125 Pa
        assert_relative_eq!(drag.z, -6125.0 * 0.01 * 0.5, epsilon = 1e-3);
        assert_relative_eq!(drag.x, 0.0, epsilon = EPSILON);
    }

    #[test]
    fn test_combined_center_of_pressure() {
        let aero = BasicAerodynamics::default();
        let context = create_test_context();

        let cp = aero.center_of_pressure(&context).unwrap();
        assert_relative_eq!(cp, (2.0 * 0.2 + 6.0 * 1.2) / 8.0, epsilon = EPSILON);
    }

    #[test]
    fn test_no_center_of_pressure_without_normal_force() {
        let aero = BasicAerodynamics::default();
        let config = FlightConfiguration::new(
            "default",
            vec![Stage::new("Tube", 0.5, 0.4, 0.8, 0.1)
                .with_aerodynamics(AerodynamicProfile::drag_only(0.5))],
        );
        let context = FlightContext::new(Arc::new(config));
        assert_eq!(aero.center_of_pressure(&context), None);
    }

    #[test]
    fn test_normal_force_at_angle_of_attack() {
        let aero = BasicAerodynamics::default();
        let angle = std::f64::consts::PI / 18.0;
        let flight = create_flight_conditions(
            Vector3::new(50.0 * angle.sin(), 0.0, 50.0 * angle.cos()),
            0.7,
        );

        let normal = aero.calculate_normal_force(&flight, 8.0, 0.01);
        let expected = flight.dynamic_pressure() * 0.01 * 8.0 * angle.sin();

        assert_relative_eq!(normal.x, -expected, epsilon = EPSILON);
        assert_relative_eq!(normal.y, 0.0, epsilon = EPSILON);
        assert_relative_eq!(normal.z, 0.0, epsilon = EPSILON);
    }

    #[test]
    fn test_stable_rocket_turns_into_the_wind() {
        let aero = BasicAerodynamics::default();
        let context = create_test_context();
        // cp (0.95) is aft of cg (0.7): the nose must rotate towards the air velocity (+x)
        let flight = create_flight_conditions(Vector3::new(5.0, 0.0, 50.0), 0.7);

        let forces = aero.forces(&context, &flight).unwrap();

        assert!(forces.moment.y > 0.0, "restoring moment should be positive about y");
        assert_relative_eq!(forces.moment.x, 0.0, epsilon = EPSILON);
        assert!(forces.force.x < 0.0);
    }

    #[test]
    fn test_pitch_damping_opposes_rotation() {
        let aero = BasicAerodynamics::default();
        let mut flight = create_flight_conditions(Vector3::new(0.0, 0.0, 80.0), 0.7);
        flight.angular_velocity = Vector3::new(0.0, 1.5, 3.0);

        let moment = aero.pitch_damping_moment(&flight, 0.01, 1.4);

        assert!(moment.y < 0.0);
        // Roll is not damped
        assert_eq!(moment.z, 0.0);
    }

    #[test]
    fn test_zero_velocity_edge_case() {
        let aero = BasicAerodynamics::default();
        let context = create_test_context();
        let flight = create_flight_conditions(Vector3::zeros(), 0.7);

        let forces = aero.forces(&context, &flight).unwrap();

        assert_relative_eq!(forces.force.norm(), 0.0, epsilon = EPSILON);
        assert_relative_eq!(forces.moment.norm(), 0.0, epsilon = EPSILON);
        assert!(forces.warnings.is_empty());
    }

    #[test]
    fn test_supersonic_warning() {
        let aero = BasicAerodynamics::default();
        let context = create_test_context();
        let flight = create_flight_conditions(Vector3::new(0.0, 0.0, 400.0), 0.7);

        let forces = aero.forces(&context, &flight).unwrap();

        assert!(forces
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::Supersonic(m) if *m > 1.0)));
    }

    #[test]
    fn test_high_altitude_drag_is_small() {
        let aero = BasicAerodynamics::default();
        let mut flight = create_flight_conditions(Vector3::new(0.0, 0.0, 1000.0), 0.7);
        flight.atmosphere = IsaAtmosphere::standard().conditions(80_000.0);

        let drag = aero.calculate_drag(&flight, 0.5, 0.01);

        assert!(
            drag.norm() < 1.0,
            "Drag at 80 km should be less than 1 N, got {} N",
            drag.norm()
        );
    }
}
