use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Physics error: {0}")]
    PhysicsError(String),

    #[error("Simulation cannot run: {0}")]
    CantRun(CantRunReason),

    #[error("Simulation aborted: {0}")]
    Aborted(AbortCause),

    #[error("{component} failed: {message}")]
    Collaborator { component: String, message: String },

    #[error("Extension '{name}' failed: {message}")]
    Extension { name: String, message: String },

    #[error("Non-finite value in {0}")]
    NonFinite(String),

    #[error("Simulation '{0}' is already in use")]
    Busy(String),

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),
}

impl SimulationError {
    pub fn collaborator(component: impl Into<String>, message: impl Into<String>) -> Self {
        SimulationError::Collaborator {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Maps an error raised inside a step to the abort cause recorded on the branch.
    pub fn abort_cause(&self) -> AbortCause {
        match self {
            SimulationError::Aborted(cause) => cause.clone(),
            SimulationError::NonFinite(location) => AbortCause::NonFiniteState(location.clone()),
            SimulationError::Extension { name, message } => AbortCause::ExtensionFailure {
                name: name.clone(),
                message: message.clone(),
            },
            SimulationError::ContractViolation(message) => {
                AbortCause::ContractViolation(message.clone())
            }
            other => AbortCause::CollaboratorFailure(other.to_string()),
        }
    }
}

/// Problems detected before a run starts. The run is refused outright.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CantRunReason {
    #[error("unknown flight configuration '{0}'")]
    UnknownConfiguration(String),

    #[error("no motors in the flight configuration")]
    NoMotors,

    #[error("no active stages in the flight configuration")]
    NoActiveStages,
}

/// Branch-fatal conditions. The branch stops, its data is kept.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum AbortCause {
    #[error("non-finite state value in {0}")]
    NonFiniteState(String),

    #[error("collaborator failure: {0}")]
    CollaboratorFailure(String),

    #[error("extension '{name}' failed: {message}")]
    ExtensionFailure { name: String, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("no motors fired")]
    NoMotorsFired,

    #[error("motor burnout without liftoff")]
    NoLiftoff,

    #[error("recovery device deployed while motor still firing")]
    DeployUnderThrust,

    #[error("tumbling under thrust")]
    TumbleUnderThrust,

    #[error("centre of pressure undefined for the sustainer")]
    NoCenterOfPressure,

    #[error("step limit of {0} exceeded")]
    StepLimitExceeded(usize),

    #[error("internal contract violated: {0}")]
    ContractViolation(String),
}

/// Recoverable diagnostics. Recording one never stops a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Warning {
    EventPrecision { trigger: String, residual: f64 },
    LargeAngleOfAttack(f64),
    Supersonic(f64),
    HighSpeedDeployment(f64),
    RecoveryOnLaunchRod,
    EarlySeparation,
    SeparationOrder,
    NoRecoveryDevice,
    EventAfterLanding(String),
    EmptyBranch(String),
    ExtensionWarning(String),
}

impl Warning {
    fn same_kind(&self, other: &Warning) -> bool {
        match (self, other) {
            (
                Warning::EventPrecision { trigger: a, .. },
                Warning::EventPrecision { trigger: b, .. },
            ) => a == b,
            (Warning::EventAfterLanding(a), Warning::EventAfterLanding(b)) => a == b,
            (Warning::EmptyBranch(a), Warning::EmptyBranch(b)) => a == b,
            (Warning::ExtensionWarning(a), Warning::ExtensionWarning(b)) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }

    fn magnitude(&self) -> Option<f64> {
        match self {
            Warning::EventPrecision { residual, .. } => Some(residual.abs()),
            Warning::LargeAngleOfAttack(v)
            | Warning::Supersonic(v)
            | Warning::HighSpeedDeployment(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::EventPrecision { trigger, residual } => write!(
                f,
                "{} event time not fully converged (residual {:.3e})",
                trigger, residual
            ),
            Warning::LargeAngleOfAttack(aoa) => write!(
                f,
                "large angle of attack encountered ({:.1}°)",
                aoa.to_degrees()
            ),
            Warning::Supersonic(mach) => write!(
                f,
                "aerodynamic model used outside its valid range (Mach {:.2})",
                mach
            ),
            Warning::HighSpeedDeployment(speed) => {
                write!(f, "recovery device deployed at high speed ({:.1} m/s)", speed)
            }
            Warning::RecoveryOnLaunchRod => {
                write!(f, "recovery device deployed while on the launch rod")
            }
            Warning::EarlySeparation => write!(f, "stage separated before clearing the launch rod"),
            Warning::SeparationOrder => write!(f, "stages separated in an unreasonable order"),
            Warning::NoRecoveryDevice => write!(f, "no recovery device defined"),
            Warning::EventAfterLanding(event) => write!(f, "{} event after landing", event),
            Warning::EmptyBranch(branch) => write!(f, "branch '{}' produced no data", branch),
            Warning::ExtensionWarning(message) => write!(f, "{}", message),
        }
    }
}

/// Accumulating warning log. One entry per kind; numeric warnings keep the worst value seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarningSet {
    warnings: Vec<Warning>,
}

impl WarningSet {
    pub fn new() -> Self {
        WarningSet::default()
    }

    /// Returns `true` if the warning was not present yet.
    pub fn add(&mut self, warning: Warning) -> bool {
        if let Some(existing) = self.warnings.iter_mut().find(|w| w.same_kind(&warning)) {
            if let (Some(old), Some(new)) = (existing.magnitude(), warning.magnitude()) {
                if new > old {
                    *existing = warning;
                }
            }
            return false;
        }
        self.warnings.push(warning);
        true
    }

    pub fn extend(&mut self, other: &WarningSet) {
        for warning in &other.warnings {
            self.add(warning.clone());
        }
    }

    pub fn contains_kind(&self, warning: &Warning) -> bool {
        self.warnings.iter().any(|w| w.same_kind(warning))
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.warnings.iter()
    }
}

impl fmt::Display for WarningSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.warnings.iter().map(|w| w.to_string()).collect();
        write!(f, "[{}]", parts.join("; "))
    }
}
