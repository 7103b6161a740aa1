use nalgebra::Vector3;

use super::branch::{BranchId, FlightData};
use super::phase::FlightPhase;
use crate::control::conditions::SimulationConditions;
use crate::errors::{SimulationError, Warning};
use crate::trajectory_system::context::FlightContext;
use crate::trajectory_system::events::FlightEvent;
use crate::trajectory_system::state::RigidBodyState;

/// Changes a hook asks the engine to make. They are applied between steps,
/// never while the stepper is running.
#[derive(Debug, Clone, PartialEq)]
pub enum HookRequest {
    /// Replaces the gust added to the wind model.
    WindGust(Vector3<f64>),
    /// Deploys the recovery device with this configuration index now.
    DeployRecovery(usize),
    Warning(String),
}

/// Snapshot a hook sees. Valid only for the duration of the call.
pub struct HookContext<'a> {
    pub branch: BranchId,
    pub state: &'a RigidBodyState,
    pub phase: FlightPhase,
    pub flight: &'a FlightContext,
    pub conditions: &'a SimulationConditions,
    requests: Vec<HookRequest>,
}

impl<'a> HookContext<'a> {
    pub fn new(
        branch: BranchId,
        state: &'a RigidBodyState,
        phase: FlightPhase,
        flight: &'a FlightContext,
        conditions: &'a SimulationConditions,
    ) -> Self {
        HookContext {
            branch,
            state,
            phase,
            flight,
            conditions,
            requests: Vec::new(),
        }
    }

    pub fn set_wind_gust(&mut self, gust: Vector3<f64>) {
        self.requests.push(HookRequest::WindGust(gust));
    }

    pub fn deploy_recovery(&mut self, device: usize) {
        self.requests.push(HookRequest::DeployRecovery(device));
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.requests.push(HookRequest::Warning(message.into()));
    }

    pub fn into_requests(self) -> Vec<HookRequest> {
        self.requests
    }
}

/// User code plugged into a run. Every hook has a no-op default.
///
/// Returning an error from any hook aborts the current branch, except from
/// `initialize` (the run is refused) and `end_simulation` (recorded as a warning).
pub trait SimulationExtension: Send {
    fn name(&self) -> &str;

    fn initialize(&mut self, _conditions: &SimulationConditions) -> Result<(), SimulationError> {
        Ok(())
    }

    fn pre_step(&mut self, _hook: &mut HookContext<'_>) -> Result<(), SimulationError> {
        Ok(())
    }

    /// Called before an event is applied. Returning `false` vetoes the event.
    fn handle_event(
        &mut self,
        _event: &FlightEvent,
        _hook: &mut HookContext<'_>,
    ) -> Result<bool, SimulationError> {
        Ok(true)
    }

    fn post_step(&mut self, _hook: &mut HookContext<'_>) -> Result<(), SimulationError> {
        Ok(())
    }

    fn end_simulation(&mut self, _data: &FlightData) -> Result<(), SimulationError> {
        Ok(())
    }
}

/// Extensions in registration order.
#[derive(Default)]
pub struct ExtensionChain {
    extensions: Vec<Box<dyn SimulationExtension>>,
}

fn tag(name: &str, error: SimulationError) -> SimulationError {
    match error {
        SimulationError::Extension { .. } | SimulationError::Aborted(_) => error,
        other => SimulationError::Extension {
            name: name.to_string(),
            message: other.to_string(),
        },
    }
}

impl ExtensionChain {
    pub fn new(extensions: Vec<Box<dyn SimulationExtension>>) -> Self {
        ExtensionChain { extensions }
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn initialize(&mut self, conditions: &SimulationConditions) -> Result<(), SimulationError> {
        for extension in &mut self.extensions {
            extension
                .initialize(conditions)
                .map_err(|e| tag(extension.name(), e))?;
        }
        Ok(())
    }

    pub fn pre_step(&mut self, hook: &mut HookContext<'_>) -> Result<(), SimulationError> {
        for extension in &mut self.extensions {
            extension.pre_step(hook).map_err(|e| tag(extension.name(), e))?;
        }
        Ok(())
    }

    /// Stops at the first veto.
    pub fn handle_event(
        &mut self,
        event: &FlightEvent,
        hook: &mut HookContext<'_>,
    ) -> Result<bool, SimulationError> {
        for extension in &mut self.extensions {
            if !extension
                .handle_event(event, hook)
                .map_err(|e| tag(extension.name(), e))?
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn post_step(&mut self, hook: &mut HookContext<'_>) -> Result<(), SimulationError> {
        for extension in &mut self.extensions {
            extension.post_step(hook).map_err(|e| tag(extension.name(), e))?;
        }
        Ok(())
    }

    /// Every extension runs; failures come back as warnings.
    pub fn end_simulation(&mut self, data: &FlightData) -> Vec<Warning> {
        self.extensions
            .iter_mut()
            .filter_map(|extension| {
                extension.end_simulation(data).err().map(|e| {
                    Warning::ExtensionWarning(format!("{}: {}", extension.name(), e))
                })
            })
            .collect()
    }
}
