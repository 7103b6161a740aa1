use std::ops::Range;
use std::sync::Arc;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::control::launch_stages::Stage;
use crate::control::propulsion::{MotorId, MotorMount};
use crate::control::recovery::RecoveryDevice;
use crate::control::structure::FlightConfiguration;
use crate::errors::SimulationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AerodynamicMode {
    /// Full aerodynamics with normal force and moments.
    Flight,
    /// Broadside drag only.
    Tumbling,
    /// Body plus deployed recovery device drag, no moments.
    Recovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorState {
    pub id: MotorId,
    pub ignition_time: Option<f64>,
    pub burned_out: bool,
}

impl MotorState {
    pub fn is_burning(&self) -> bool {
        self.ignition_time.is_some() && !self.burned_out
    }
}

/// Per-branch discrete state the force model depends on.
///
/// Only the engine mutates it, and only between steps.
#[derive(Debug, Clone)]
pub struct FlightContext {
    pub configuration: Arc<FlightConfiguration>,
    pub stages: Range<usize>,
    pub motors: Vec<MotorState>,
    pub deployed_devices: Vec<usize>,
    pub mode: AerodynamicMode,
    pub on_launch_rod: bool,
    pub lifted_off: bool,
    pub apogee_reached: bool,
    pub wind_gust: Vector3<f64>,
}

impl FlightContext {
    pub fn new(configuration: Arc<FlightConfiguration>) -> Self {
        let stages = configuration.all_stages();
        let motors = configuration
            .motor_ids(&stages)
            .into_iter()
            .map(|id| MotorState {
                id,
                ignition_time: None,
                burned_out: false,
            })
            .collect();

        FlightContext {
            configuration,
            stages,
            motors,
            deployed_devices: Vec::new(),
            mode: AerodynamicMode::Flight,
            on_launch_rod: true,
            lifted_off: false,
            apogee_reached: false,
            wind_gust: Vector3::zeros(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        self.configuration.stages_in(&self.stages)
    }

    pub fn contains_stage(&self, stage: usize) -> bool {
        self.stages.contains(&stage)
    }

    pub fn mount(&self, id: MotorId) -> Option<&MotorMount> {
        self.configuration.mount(id)
    }

    pub fn motor(&self, id: MotorId) -> Option<&MotorState> {
        self.motors.iter().find(|m| m.id == id)
    }

    pub fn motor_mut(&mut self, id: MotorId) -> Option<&mut MotorState> {
        self.motors.iter_mut().find(|m| m.id == id)
    }

    /// Recovery devices carried by this branch's stages, by configuration index.
    pub fn recovery_devices(&self) -> Vec<(usize, &RecoveryDevice)> {
        self.configuration
            .recovery_devices_in(&self.stages)
            .into_iter()
            .filter_map(|i| self.configuration.recovery_devices.get(i).map(|d| (i, d)))
            .collect()
    }

    pub fn is_deployed(&self, device: usize) -> bool {
        self.deployed_devices.contains(&device)
    }

    pub fn any_ignited(&self) -> bool {
        self.motors.iter().any(|m| m.ignition_time.is_some())
    }

    pub fn is_thrusting(&self) -> bool {
        self.motors.iter().any(MotorState::is_burning)
    }

    /// Sum of the thrust of all burning motors at `time`.
    pub fn thrust(&self, time: f64) -> Result<f64, SimulationError> {
        let mut total = 0.0;
        for state in self.motors.iter().filter(|m| m.is_burning()) {
            if let (Some(ignition), Some(mount)) = (state.ignition_time, self.mount(state.id)) {
                total += mount.motor.thrust(time - ignition)?;
            }
        }
        Ok(total)
    }

    /// Drag area of the deployed recovery devices.
    pub fn recovery_drag_area(&self) -> f64 {
        self.deployed_devices
            .iter()
            .filter_map(|&i| self.configuration.recovery_devices.get(i))
            .map(RecoveryDevice::drag_area)
            .sum()
    }

    /// Moves `stage` and everything below it into a new context. This context keeps
    /// the stages above it.
    pub fn split_off(&mut self, stage: usize) -> FlightContext {
        let child_stages = stage.max(self.stages.start)..self.stages.end;
        self.stages = self.stages.start..child_stages.start;

        let (child_motors, parent_motors): (Vec<MotorState>, Vec<MotorState>) = self
            .motors
            .iter()
            .copied()
            .partition(|m| child_stages.contains(&m.id.stage));
        self.motors = parent_motors;

        let configuration = Arc::clone(&self.configuration);
        let (child_devices, parent_devices): (Vec<usize>, Vec<usize>) =
            self.deployed_devices.iter().copied().partition(|&i| {
                configuration
                    .recovery_devices
                    .get(i)
                    .is_some_and(|d| child_stages.contains(&d.stage))
            });
        self.deployed_devices = parent_devices;

        let mode = if child_devices.is_empty() {
            self.mode
        } else {
            AerodynamicMode::Recovery
        };

        FlightContext {
            configuration,
            stages: child_stages,
            motors: child_motors,
            deployed_devices: child_devices,
            mode,
            on_launch_rod: self.on_launch_rod,
            lifted_off: self.lifted_off,
            apogee_reached: self.apogee_reached,
            wind_gust: self.wind_gust,
        }
    }
}
