use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::SimulationError;

/// Thrust and mass of a single motor as functions of the time since its ignition.
pub trait MotorModel: Send + Sync + Debug {
    fn designation(&self) -> &str;

    fn thrust(&self, time_since_ignition: f64) -> Result<f64, SimulationError>;

    /// Total motor mass (case plus remaining propellant).
    fn mass(&self, time_since_ignition: f64) -> Result<f64, SimulationError>;

    fn burn_time(&self) -> f64;

    fn total_impulse(&self) -> f64;

    fn length(&self) -> f64;

    fn diameter(&self) -> f64;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThrustCurveMotor {
    designation: String,
    points: Vec<(f64, f64)>,
    cumulative_impulse: Vec<f64>,
    case_mass: f64,
    propellant_mass: f64,
    length: f64,
    diameter: f64,
}

impl ThrustCurveMotor {
    /// `points` are `(time, thrust)` pairs with strictly increasing times starting at or after zero.
    pub fn new(
        designation: impl Into<String>,
        points: Vec<(f64, f64)>,
        case_mass: f64,
        propellant_mass: f64,
        length: f64,
        diameter: f64,
    ) -> Result<Self, SimulationError> {
        let designation = designation.into();
        if points.len() < 2 {
            return Err(SimulationError::InitializationError(format!(
                "motor {} needs at least two thrust curve points",
                designation
            )));
        }
        if points
            .iter()
            .any(|(t, f)| !t.is_finite() || !f.is_finite() || *t < 0.0 || *f < 0.0)
        {
            return Err(SimulationError::InitializationError(format!(
                "motor {} has invalid thrust curve values",
                designation
            )));
        }
        if points.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(SimulationError::InitializationError(format!(
                "motor {} thrust curve times must be strictly increasing",
                designation
            )));
        }
        if case_mass < 0.0 || propellant_mass < 0.0 {
            return Err(SimulationError::InitializationError(format!(
                "motor {} has negative mass",
                designation
            )));
        }

        let mut cumulative_impulse = Vec::with_capacity(points.len());
        let mut impulse = 0.0;
        cumulative_impulse.push(impulse);
        for w in points.windows(2) {
            impulse += 0.5 * (w[0].1 + w[1].1) * (w[1].0 - w[0].0);
            cumulative_impulse.push(impulse);
        }

        Ok(ThrustCurveMotor {
            designation,
            points,
            cumulative_impulse,
            case_mass,
            propellant_mass,
            length,
            diameter,
        })
    }

    /// Flat thrust for `burn_time` seconds.
    pub fn constant(
        designation: impl Into<String>,
        thrust: f64,
        burn_time: f64,
        case_mass: f64,
        propellant_mass: f64,
        length: f64,
        diameter: f64,
    ) -> Result<Self, SimulationError> {
        Self::new(
            designation,
            vec![(0.0, thrust), (burn_time, thrust)],
            case_mass,
            propellant_mass,
            length,
            diameter,
        )
    }

    fn check_time(&self, time: f64) -> Result<(), SimulationError> {
        if time.is_finite() {
            Ok(())
        } else {
            Err(SimulationError::collaborator(
                format!("motor {}", self.designation),
                format!("lookup at non-finite time {}", time),
            ))
        }
    }

    fn segment(&self, time: f64) -> Option<usize> {
        if time < self.points[0].0 || time > self.burn_time() {
            return None;
        }
        let upper = self.points.partition_point(|(t, _)| *t < time);
        Some(upper.clamp(1, self.points.len() - 1) - 1)
    }

    fn impulse_until(&self, time: f64) -> f64 {
        if time <= self.points[0].0 {
            return 0.0;
        }
        match self.segment(time) {
            Some(i) => {
                let (t0, f0) = self.points[i];
                let f = self.interpolate(i, time);
                self.cumulative_impulse[i] + 0.5 * (f0 + f) * (time - t0)
            }
            None => self.total_impulse(),
        }
    }

    fn interpolate(&self, i: usize, time: f64) -> f64 {
        let (t0, f0) = self.points[i];
        let (t1, f1) = self.points[i + 1];
        f0 + (f1 - f0) * (time - t0) / (t1 - t0)
    }
}

impl MotorModel for ThrustCurveMotor {
    fn designation(&self) -> &str {
        &self.designation
    }

    fn thrust(&self, time_since_ignition: f64) -> Result<f64, SimulationError> {
        self.check_time(time_since_ignition)?;
        Ok(self
            .segment(time_since_ignition)
            .map_or(0.0, |i| self.interpolate(i, time_since_ignition)))
    }

    fn mass(&self, time_since_ignition: f64) -> Result<f64, SimulationError> {
        self.check_time(time_since_ignition)?;
        let total = self.total_impulse();
        let burnt_fraction = if total > 0.0 {
            (self.impulse_until(time_since_ignition) / total).clamp(0.0, 1.0)
        } else if time_since_ignition >= self.burn_time() {
            1.0
        } else {
            0.0
        };
        Ok(self.case_mass + self.propellant_mass * (1.0 - burnt_fraction))
    }

    fn burn_time(&self) -> f64 {
        self.points[self.points.len() - 1].0
    }

    fn total_impulse(&self) -> f64 {
        self.cumulative_impulse[self.cumulative_impulse.len() - 1]
    }

    fn length(&self) -> f64 {
        self.length
    }

    fn diameter(&self) -> f64 {
        self.diameter
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IgnitionTrigger {
    Launch,
    /// Burnout of a motor in the stage directly below.
    Burnout,
    /// Ejection charge of a motor in the stage directly below.
    EjectionCharge,
    Never,
}

/// Identifies a motor mount by stage index and position within the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MotorId {
    pub stage: usize,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct MotorMount {
    pub motor: Arc<dyn MotorModel>,
    /// Motor centre of gravity, measured from the nose tip.
    pub position: f64,
    pub ignition: IgnitionTrigger,
    pub ignition_delay: f64,
    /// Time after burnout at which the ejection charge fires.
    pub ejection_delay: Option<f64>,
}

impl MotorMount {
    pub fn new(motor: Arc<dyn MotorModel>, position: f64) -> Self {
        MotorMount {
            motor,
            position,
            ignition: IgnitionTrigger::Launch,
            ignition_delay: 0.0,
            ejection_delay: None,
        }
    }

    pub fn with_ignition(mut self, trigger: IgnitionTrigger, delay: f64) -> Self {
        self.ignition = trigger;
        self.ignition_delay = delay;
        self
    }

    pub fn with_ejection_delay(mut self, delay: f64) -> Self {
        self.ejection_delay = Some(delay);
        self
    }

    /// A mount that can actually produce thrust in a run.
    pub fn is_usable(&self) -> bool {
        self.ignition != IgnitionTrigger::Never && self.motor.burn_time() > 0.0
    }
}
