use serde::{Deserialize, Serialize};

use super::phase::FlightPhase;
use crate::control::structure::ConfigurationId;
use crate::errors::{AbortCause, SimulationError, Warning, WarningSet};
use crate::trajectory_system::events::{FlightEvent, FlightEventType};
use crate::trajectory_system::forces::DerivedQuantities;
use crate::trajectory_system::state::RigidBodyState;

pub use crate::trajectory_system::events::BranchId;

/// One accepted step of a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightSample {
    pub time: f64,
    pub state: RigidBodyState,
    pub derived: DerivedQuantities,
    pub phase: FlightPhase,
    /// Events fired at this sample.
    pub events: Vec<FlightEvent>,
}

impl FlightSample {
    pub fn new(state: RigidBodyState, derived: DerivedQuantities, phase: FlightPhase) -> Self {
        FlightSample {
            time: state.time,
            state,
            derived,
            phase,
            events: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: Vec<FlightEvent>) -> Self {
        self.events = events;
        self
    }
}

/// How a branch ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BranchStatus {
    Running,
    Landed,
    /// Everything was handed to a child branch.
    Separated,
    /// Maximum simulation time reached.
    EndReached,
    Aborted(AbortCause),
}

impl BranchStatus {
    pub fn is_aborted(&self) -> bool {
        matches!(self, BranchStatus::Aborted(_))
    }
}

/// Append-only time series of one independently flying body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightDataBranch {
    pub id: BranchId,
    pub name: String,
    pub parent: Option<BranchId>,
    pub spawn_time: f64,
    samples: Vec<FlightSample>,
    events: Vec<FlightEvent>,
    warnings: WarningSet,
    status: BranchStatus,
    phase: FlightPhase,
    frozen: bool,
}

impl FlightDataBranch {
    pub fn new(id: BranchId, name: impl Into<String>, parent: Option<BranchId>, spawn_time: f64) -> Self {
        FlightDataBranch {
            id,
            name: name.into(),
            parent,
            spawn_time,
            samples: Vec::new(),
            events: Vec::new(),
            warnings: WarningSet::new(),
            status: BranchStatus::Running,
            phase: FlightPhase::OnPad,
            frozen: false,
        }
    }

    /// Appends a sample. Times must strictly increase and a frozen branch takes nothing.
    pub fn push_sample(&mut self, sample: FlightSample) -> Result<(), SimulationError> {
        if self.frozen {
            return Err(SimulationError::ContractViolation(format!(
                "sample appended to finished branch '{}'",
                self.name
            )));
        }
        if let Some(last) = self.samples.last() {
            if sample.time <= last.time {
                return Err(SimulationError::ContractViolation(format!(
                    "non-increasing sample time {} after {} in branch '{}'",
                    sample.time, last.time, self.name
                )));
            }
        }
        self.phase = sample.phase;
        self.events.extend(sample.events.iter().cloned());
        self.samples.push(sample);
        Ok(())
    }

    /// Logs events fired after the last sample was taken and attaches them to it.
    pub fn attach_events(&mut self, events: Vec<FlightEvent>) {
        if events.is_empty() || self.frozen {
            return;
        }
        self.events.extend(events.iter().cloned());
        if let Some(last) = self.samples.last_mut() {
            last.events.extend(events);
        }
    }

    /// Logs an event that belongs to no sample.
    pub fn log_event(&mut self, event: FlightEvent) {
        self.events.push(event);
    }

    pub fn add_warning(&mut self, warning: Warning) -> bool {
        self.warnings.add(warning)
    }

    pub fn set_phase(&mut self, phase: FlightPhase) {
        self.phase = phase;
    }

    pub fn freeze(&mut self, status: BranchStatus, phase: FlightPhase) {
        self.status = status;
        self.phase = phase;
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn status(&self) -> &BranchStatus {
        &self.status
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn samples(&self) -> &[FlightSample] {
        &self.samples
    }

    pub fn events(&self) -> &[FlightEvent] {
        &self.events
    }

    pub fn warnings(&self) -> &WarningSet {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last_sample(&self) -> Option<&FlightSample> {
        self.samples.last()
    }

    pub fn first_event(&self, kind: FlightEventType) -> Option<&FlightEvent> {
        self.events.iter().find(|e| e.kind == kind)
    }

    pub fn events_of(&self, kind: FlightEventType) -> impl Iterator<Item = &FlightEvent> {
        self.events.iter().filter(move |e| e.kind == kind)
    }

    /// Sample taken exactly at or first after `time`.
    pub fn sample_at(&self, time: f64) -> Option<&FlightSample> {
        let index = self.samples.partition_point(|s| s.time < time);
        self.samples.get(index)
    }

    pub fn max_altitude(&self) -> f64 {
        self.samples
            .iter()
            .map(|s| s.state.altitude())
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Result of one simulation run: every branch plus the aggregated warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightData {
    pub configuration: ConfigurationId,
    pub modification_id: u64,
    pub branches: Vec<FlightDataBranch>,
    pub warnings: WarningSet,
}

impl FlightData {
    pub fn branch(&self, id: BranchId) -> Option<&FlightDataBranch> {
        self.branches.get(id.0)
    }

    pub fn main_branch(&self) -> Option<&FlightDataBranch> {
        self.branches.first()
    }

    pub fn children_of(&self, id: BranchId) -> impl Iterator<Item = &FlightDataBranch> {
        self.branches.iter().filter(move |b| b.parent == Some(id))
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    pub fn any_aborted(&self) -> bool {
        self.branches.iter().any(|b| b.status().is_aborted())
    }
}
