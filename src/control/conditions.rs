use std::sync::Arc;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::environment::{gravity_at, AtmosphereModel, IsaAtmosphere};
use super::structure::{ConfigurationId, FlightConfiguration};
use super::wind::{WindModel, WindSettings};
use crate::constants::{
    DEFAULT_EVENT_MAX_ITERATIONS, DEFAULT_EVENT_TIE_TOLERANCE, DEFAULT_EVENT_TIME_TOLERANCE,
    DEFAULT_EVENT_VALUE_TOLERANCE, DEFAULT_MAX_STEPS, RECOMMENDED_ANGLE_STEP,
    RECOMMENDED_MAX_TIME, RECOMMENDED_TIME_STEP,
};
use crate::errors::SimulationError;
use crate::trajectory_system::aerodynamics::BasicAerodynamics;
use crate::trajectory_system::forces::{AerodynamicCalculator, FlightForceModel, ForceMomentModel};
use crate::trajectory_system::mass::{BasicMassCalculator, MassCalculator};
use crate::trajectory_system::stepper::{NumericalStepper, Rk4Stepper};
use crate::utils::geometry::launch_rod_direction;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaunchSite {
    pub latitude: f64,  // rad
    pub longitude: f64, // rad
    pub altitude: f64,  // m above mean sea level
}

impl Default for LaunchSite {
    fn default() -> Self {
        LaunchSite {
            latitude: 28.61_f64.to_radians(),
            longitude: (-80.6_f64).to_radians(),
            altitude: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaunchRod {
    pub length: f64, // m
    /// Tilt from vertical (rad).
    pub angle: f64,
    /// Direction of the tilt, clockwise from north (rad).
    pub azimuth: f64,
}

impl Default for LaunchRod {
    fn default() -> Self {
        LaunchRod {
            length: 1.0,
            angle: 0.0,
            azimuth: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum AtmosphereSettings {
    #[default]
    Isa,
    /// Measured conditions at the launch site altitude.
    Custom { temperature: f64, pressure: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EndConditions {
    pub max_time: f64,
    pub max_steps: usize,
}

impl Default for EndConditions {
    fn default() -> Self {
        EndConditions {
            max_time: RECOMMENDED_MAX_TIME,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventDetectionSettings {
    /// Trigger magnitude accepted as converged.
    pub value_tolerance: f64,
    /// Bracket width at which bisection stops.
    pub time_tolerance: f64,
    /// Crossings closer than this fire together in priority order.
    pub tie_tolerance: f64,
    pub max_iterations: usize,
}

impl Default for EventDetectionSettings {
    fn default() -> Self {
        EventDetectionSettings {
            value_tolerance: DEFAULT_EVENT_VALUE_TOLERANCE,
            time_tolerance: DEFAULT_EVENT_TIME_TOLERANCE,
            tie_tolerance: DEFAULT_EVENT_TIE_TOLERANCE,
            max_iterations: DEFAULT_EVENT_MAX_ITERATIONS,
        }
    }
}

/// User-editable launch and integration settings of a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOptions {
    pub configuration: ConfigurationId,
    pub launch_site: LaunchSite,
    pub launch_rod: LaunchRod,
    pub atmosphere: AtmosphereSettings,
    pub wind: WindSettings,
    pub time_step: f64,
    pub max_angle_step: f64,
    pub end: EndConditions,
    pub events: EventDetectionSettings,
    pub seed: u64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        SimulationOptions {
            configuration: ConfigurationId::new("default"),
            launch_site: LaunchSite::default(),
            launch_rod: LaunchRod::default(),
            atmosphere: AtmosphereSettings::default(),
            wind: WindSettings::default(),
            time_step: RECOMMENDED_TIME_STEP,
            max_angle_step: RECOMMENDED_ANGLE_STEP,
            end: EndConditions::default(),
            events: EventDetectionSettings::default(),
            seed: 0,
        }
    }
}

impl SimulationOptions {
    pub fn for_configuration(configuration: impl Into<ConfigurationId>) -> Self {
        SimulationOptions {
            configuration: configuration.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        let positive = |value: f64| value.is_finite() && value > 0.0;

        if !positive(self.time_step) {
            return Err(SimulationError::ContractViolation(format!(
                "time step must be positive, got {}",
                self.time_step
            )));
        }
        if !positive(self.max_angle_step) {
            return Err(SimulationError::ContractViolation(
                "maximum angle step must be positive".to_string(),
            ));
        }
        if !positive(self.end.max_time) || self.end.max_steps == 0 {
            return Err(SimulationError::ContractViolation(
                "end conditions must allow at least one step".to_string(),
            ));
        }
        if !(self.launch_rod.length.is_finite() && self.launch_rod.length >= 0.0) {
            return Err(SimulationError::ContractViolation(
                "launch rod length must be non-negative".to_string(),
            ));
        }
        if !(self.launch_rod.angle.is_finite()
            && self.launch_rod.angle.abs() < std::f64::consts::FRAC_PI_2)
        {
            return Err(SimulationError::ContractViolation(
                "launch rod must point above the horizon".to_string(),
            ));
        }
        let events = &self.events;
        if !positive(events.value_tolerance)
            || !positive(events.time_tolerance)
            || !(events.tie_tolerance.is_finite() && events.tie_tolerance >= 0.0)
            || events.max_iterations == 0
        {
            return Err(SimulationError::ContractViolation(
                "invalid event detection settings".to_string(),
            ));
        }
        Ok(())
    }
}

/// Strategy objects injected into a run.
#[derive(Debug, Clone)]
pub struct SimulationModels {
    pub stepper: Arc<dyn NumericalStepper>,
    pub aerodynamics: Arc<dyn AerodynamicCalculator>,
    pub mass_calculator: Arc<dyn MassCalculator>,
    pub force_model: Arc<dyn ForceMomentModel>,
}

impl Default for SimulationModels {
    fn default() -> Self {
        SimulationModels {
            stepper: Arc::new(Rk4Stepper),
            aerodynamics: Arc::new(BasicAerodynamics::default()),
            mass_calculator: Arc::new(BasicMassCalculator),
            force_model: Arc::new(FlightForceModel),
        }
    }
}

impl SimulationModels {
    pub fn with_stepper(mut self, stepper: Arc<dyn NumericalStepper>) -> Self {
        self.stepper = stepper;
        self
    }

    pub fn with_aerodynamics(mut self, aerodynamics: Arc<dyn AerodynamicCalculator>) -> Self {
        self.aerodynamics = aerodynamics;
        self
    }

    pub fn with_mass_calculator(mut self, mass_calculator: Arc<dyn MassCalculator>) -> Self {
        self.mass_calculator = mass_calculator;
        self
    }

    pub fn with_force_model(mut self, force_model: Arc<dyn ForceMomentModel>) -> Self {
        self.force_model = force_model;
        self
    }
}

/// Read-only snapshot of everything a run needs, built once before the first step.
#[derive(Debug)]
pub struct SimulationConditions {
    pub options: SimulationOptions,
    pub configuration: Arc<FlightConfiguration>,
    pub atmosphere: Box<dyn AtmosphereModel>,
    pub wind: Box<dyn WindModel>,
    pub models: SimulationModels,
    pub launch_rod_direction: Vector3<f64>,
}

impl SimulationConditions {
    pub fn new(
        options: SimulationOptions,
        configuration: Arc<FlightConfiguration>,
        models: SimulationModels,
    ) -> Result<Self, SimulationError> {
        options.validate()?;

        let atmosphere: Box<dyn AtmosphereModel> = match options.atmosphere {
            AtmosphereSettings::Isa => Box::new(IsaAtmosphere::standard()),
            AtmosphereSettings::Custom {
                temperature,
                pressure,
            } => {
                if !(temperature > 0.0 && pressure > 0.0) {
                    return Err(SimulationError::ContractViolation(
                        "custom atmosphere needs positive temperature and pressure".to_string(),
                    ));
                }
                Box::new(IsaAtmosphere::custom(
                    options.launch_site.altitude,
                    temperature,
                    pressure,
                ))
            }
        };
        let wind = options.wind.build(options.seed);
        let launch_rod_direction =
            launch_rod_direction(options.launch_rod.angle, options.launch_rod.azimuth);

        Ok(SimulationConditions {
            options,
            configuration,
            atmosphere,
            wind,
            models,
            launch_rod_direction,
        })
    }

    /// Gravitational acceleration at `altitude` above the launch site.
    pub fn gravity(&self, altitude: f64) -> f64 {
        gravity_at(
            self.options.launch_site.latitude,
            self.options.launch_site.altitude + altitude,
        )
    }

    pub fn time_step(&self) -> f64 {
        self.options.time_step
    }
}
