use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use tracing::info;

use super::branch::FlightData;
use super::engine::{CancellationToken, SimulationEngine};
use super::extensions::SimulationExtension;
use crate::control::conditions::{SimulationConditions, SimulationModels, SimulationOptions};
use crate::control::structure::{FlightConfiguration, RocketDesign};
use crate::errors::{CantRunReason, SimulationError};

#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    NotSimulated,
    /// Last results match the current design and options.
    UpToDate,
    Outdated,
    CantRun(CantRunReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Options,
    Design,
    RunCompleted,
}

/// Told about edits and finished runs, so results can be marked stale.
pub trait SimulationListener: Send + Sync {
    fn simulation_changed(&self, simulation: &str, change: ChangeKind);
}

struct LastRun {
    data: Arc<FlightData>,
    modification_id: u64,
    options: SimulationOptions,
}

struct SimulationState {
    design: Arc<RocketDesign>,
    options: SimulationOptions,
    models: SimulationModels,
    last_run: Option<LastRun>,
    listeners: Vec<Arc<dyn SimulationListener>>,
}

/// Resolves the selected configuration and refuses the ones that cannot fly.
pub fn check_runnable(
    design: &RocketDesign,
    options: &SimulationOptions,
) -> Result<Arc<FlightConfiguration>, CantRunReason> {
    let configuration = design
        .configuration(&options.configuration)
        .ok_or_else(|| CantRunReason::UnknownConfiguration(options.configuration.0.clone()))?;
    if configuration.stages.is_empty() {
        return Err(CantRunReason::NoActiveStages);
    }
    if !configuration.has_motors() {
        return Err(CantRunReason::NoMotors);
    }
    Ok(configuration)
}

/// A named simulation of one design. Every operation takes the same exclusion
/// lock without waiting; a second caller gets `SimulationError::Busy`.
pub struct Simulation {
    name: String,
    state: Mutex<SimulationState>,
}

impl Simulation {
    pub fn new(name: impl Into<String>, design: Arc<RocketDesign>, options: SimulationOptions) -> Self {
        Simulation {
            name: name.into(),
            state: Mutex::new(SimulationState {
                design,
                options,
                models: SimulationModels::default(),
                last_run: None,
                listeners: Vec::new(),
            }),
        }
    }

    pub fn with_models(mut self, models: SimulationModels) -> Self {
        match self.state.get_mut() {
            Ok(state) => state.models = models,
            Err(poisoned) => poisoned.into_inner().models = models,
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimulationState>, SimulationError> {
        match self.state.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(SimulationError::Busy(self.name.clone())),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }

    fn notify(&self, listeners: Vec<Arc<dyn SimulationListener>>, change: ChangeKind) {
        for listener in listeners {
            listener.simulation_changed(&self.name, change);
        }
    }

    /// Runs the simulation and records the results. The lock is held for the
    /// whole run.
    pub fn simulate(
        &self,
        extensions: Vec<Box<dyn SimulationExtension>>,
        cancel: &CancellationToken,
    ) -> Result<Arc<FlightData>, SimulationError> {
        let (data, listeners) = {
            let mut state = self.lock()?;
            let configuration =
                check_runnable(&state.design, &state.options).map_err(SimulationError::CantRun)?;
            let conditions = SimulationConditions::new(
                state.options.clone(),
                Arc::clone(&configuration),
                state.models.clone(),
            )?;

            info!(
                simulation = %self.name,
                configuration = %configuration.id,
                modification = configuration.modification_id,
                "Running simulation"
            );
            let data = Arc::new(SimulationEngine::new(conditions, extensions, cancel.clone()).run()?);

            state.last_run = Some(LastRun {
                data: Arc::clone(&data),
                modification_id: configuration.modification_id,
                options: state.options.clone(),
            });
            (data, state.listeners.clone())
        };

        self.notify(listeners, ChangeKind::RunCompleted);
        Ok(data)
    }

    pub fn status(&self) -> Result<RunStatus, SimulationError> {
        let state = self.lock()?;
        let configuration = match check_runnable(&state.design, &state.options) {
            Ok(configuration) => configuration,
            Err(reason) => return Ok(RunStatus::CantRun(reason)),
        };

        Ok(match &state.last_run {
            None => RunStatus::NotSimulated,
            Some(last)
                if last.modification_id == configuration.modification_id
                    && last.options == state.options =>
            {
                RunStatus::UpToDate
            }
            Some(_) => RunStatus::Outdated,
        })
    }

    /// Results of the last completed run, stale or not.
    pub fn results(&self) -> Result<Option<Arc<FlightData>>, SimulationError> {
        let state = self.lock()?;
        Ok(state.last_run.as_ref().map(|last| Arc::clone(&last.data)))
    }

    pub fn options(&self) -> Result<SimulationOptions, SimulationError> {
        Ok(self.lock()?.options.clone())
    }

    pub fn design(&self) -> Result<Arc<RocketDesign>, SimulationError> {
        Ok(Arc::clone(&self.lock()?.design))
    }

    pub fn set_options(&self, options: SimulationOptions) -> Result<(), SimulationError> {
        let listeners = {
            let mut state = self.lock()?;
            state.options = options;
            state.listeners.clone()
        };
        self.notify(listeners, ChangeKind::Options);
        Ok(())
    }

    pub fn set_design(&self, design: Arc<RocketDesign>) -> Result<(), SimulationError> {
        let listeners = {
            let mut state = self.lock()?;
            state.design = design;
            state.listeners.clone()
        };
        self.notify(listeners, ChangeKind::Design);
        Ok(())
    }

    pub fn set_models(&self, models: SimulationModels) -> Result<(), SimulationError> {
        self.lock()?.models = models;
        Ok(())
    }

    /// Same design, options and models under a new name; results and listeners
    /// are not carried over.
    pub fn copy(&self, name: impl Into<String>) -> Result<Simulation, SimulationError> {
        let state = self.lock()?;
        Ok(Simulation {
            name: name.into(),
            state: Mutex::new(SimulationState {
                design: Arc::clone(&state.design),
                options: state.options.clone(),
                models: state.models.clone(),
                last_run: None,
                listeners: Vec::new(),
            }),
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn SimulationListener>) -> Result<(), SimulationError> {
        self.lock()?.listeners.push(listener);
        Ok(())
    }
}
