use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DeploymentTrigger {
    Apogee,
    /// Descending through the given altitude above the launch site, after apogee.
    Altitude(f64),
    /// Descent rate exceeding the given value (m/s), after apogee.
    DescentVelocity(f64),
    /// Fixed flight time.
    Time(f64),
    /// Ejection charge of a motor in the device's stage.
    EjectionCharge,
    Never,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryDevice {
    pub name: String,
    pub stage: usize,
    pub drag_coefficient: f64,
    pub area: f64, // m²
    pub trigger: DeploymentTrigger,
    pub delay: f64, // s
}

impl RecoveryDevice {
    pub fn parachute(name: impl Into<String>, stage: usize, diameter: f64) -> Self {
        RecoveryDevice {
            name: name.into(),
            stage,
            drag_coefficient: 0.8,
            area: std::f64::consts::PI * diameter * diameter / 4.0,
            trigger: DeploymentTrigger::Apogee,
            delay: 0.0,
        }
    }

    pub fn with_trigger(mut self, trigger: DeploymentTrigger, delay: f64) -> Self {
        self.trigger = trigger;
        self.delay = delay;
        self
    }

    pub fn with_drag_coefficient(mut self, drag_coefficient: f64) -> Self {
        self.drag_coefficient = drag_coefficient;
        self
    }

    pub fn drag_area(&self) -> f64 {
        self.drag_coefficient * self.area
    }
}
