use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::launch_stages::Stage;
use super::propulsion::{MotorId, MotorMount};
use super::recovery::RecoveryDevice;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigurationId(pub String);

impl ConfigurationId {
    pub fn new(id: impl Into<String>) -> Self {
        ConfigurationId(id.into())
    }
}

impl fmt::Display for ConfigurationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConfigurationId {
    fn from(id: &str) -> Self {
        ConfigurationId(id.to_string())
    }
}

/// Immutable snapshot of the components flown in one configuration.
///
/// Stage 0 is the topmost (sustainer) stage; higher indices sit below it and
/// separate first. Branches refer to a contiguous range of stages of a shared
/// snapshot instead of copying it.
#[derive(Debug, Clone)]
pub struct FlightConfiguration {
    pub id: ConfigurationId,
    pub modification_id: u64,
    pub stages: Vec<Stage>,
    pub recovery_devices: Vec<RecoveryDevice>,
}

impl FlightConfiguration {
    pub fn new(id: impl Into<ConfigurationId>, stages: Vec<Stage>) -> Self {
        FlightConfiguration {
            id: id.into(),
            modification_id: 0,
            stages,
            recovery_devices: Vec::new(),
        }
    }

    pub fn with_recovery_device(mut self, device: RecoveryDevice) -> Self {
        self.recovery_devices.push(device);
        self
    }

    pub fn all_stages(&self) -> Range<usize> {
        0..self.stages.len()
    }

    pub fn stages_in(&self, range: &Range<usize>) -> &[Stage] {
        let end = range.end.min(self.stages.len());
        let start = range.start.min(end);
        &self.stages[start..end]
    }

    pub fn mount(&self, id: MotorId) -> Option<&MotorMount> {
        self.stages.get(id.stage)?.motors.get(id.index)
    }

    pub fn motor_ids(&self, range: &Range<usize>) -> Vec<MotorId> {
        self.stages_in(range)
            .iter()
            .zip(range.start..)
            .flat_map(|(stage, stage_index)| {
                (0..stage.motors.len()).map(move |index| MotorId {
                    stage: stage_index,
                    index,
                })
            })
            .collect()
    }

    pub fn has_motors(&self) -> bool {
        self.stages.iter().any(Stage::has_usable_motors)
    }

    /// Length of the active stages stacked nose to tail.
    pub fn length(&self, range: &Range<usize>) -> f64 {
        self.stages_in(range).iter().map(|s| s.length).sum()
    }

    pub fn max_diameter(&self, range: &Range<usize>) -> f64 {
        self.stages_in(range)
            .iter()
            .map(|s| s.diameter)
            .fold(0.0, f64::max)
    }

    pub fn reference_area(&self, range: &Range<usize>) -> f64 {
        let radius = self.max_diameter(range) / 2.0;
        std::f64::consts::PI * radius * radius
    }

    /// Indices of the recovery devices carried by the given stages.
    pub fn recovery_devices_in(&self, range: &Range<usize>) -> Vec<usize> {
        self.recovery_devices
            .iter()
            .enumerate()
            .filter(|(_, device)| range.contains(&device.stage))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Named set of flight configurations of one rocket.
#[derive(Debug, Clone, Default)]
pub struct RocketDesign {
    pub name: String,
    configurations: BTreeMap<ConfigurationId, Arc<FlightConfiguration>>,
    modification_counter: u64,
}

impl RocketDesign {
    pub fn new(name: impl Into<String>) -> Self {
        RocketDesign {
            name: name.into(),
            configurations: BTreeMap::new(),
            modification_counter: 0,
        }
    }

    /// Inserts or replaces a configuration and stamps it with a fresh modification id.
    pub fn add_configuration(&mut self, mut configuration: FlightConfiguration) -> u64 {
        self.modification_counter += 1;
        configuration.modification_id = self.modification_counter;
        let id = configuration.modification_id;
        self.configurations
            .insert(configuration.id.clone(), Arc::new(configuration));
        id
    }

    pub fn with_configuration(mut self, configuration: FlightConfiguration) -> Self {
        self.add_configuration(configuration);
        self
    }

    pub fn configuration(&self, id: &ConfigurationId) -> Option<Arc<FlightConfiguration>> {
        self.configurations.get(id).cloned()
    }

    pub fn configuration_ids(&self) -> impl Iterator<Item = &ConfigurationId> {
        self.configurations.keys()
    }
}
