pub mod constants;
pub mod control;
pub mod errors;
pub mod simulation_system;
pub mod telemetry_system;
pub mod trajectory_system;
pub mod utils;

pub use constants::*;
pub use control::conditions::{
    AtmosphereSettings, EndConditions, EventDetectionSettings, LaunchRod, LaunchSite,
    SimulationConditions, SimulationModels, SimulationOptions,
};
pub use control::launch_stages::{AerodynamicProfile, SeparationTrigger, Stage};
pub use control::propulsion::{IgnitionTrigger, MotorId, MotorModel, MotorMount, ThrustCurveMotor};
pub use control::recovery::{DeploymentTrigger, RecoveryDevice};
pub use control::structure::{ConfigurationId, FlightConfiguration, RocketDesign};
pub use control::wind::{WindLevelSettings, WindSettings};
pub use errors::{AbortCause, CantRunReason, SimulationError, Warning, WarningSet};

// Re-export commonly used items from simulation_system
pub use simulation_system::batch::{monte_carlo, run_batch};
pub use simulation_system::branch::{BranchId, BranchStatus, FlightData, FlightDataBranch, FlightSample};
pub use simulation_system::engine::{CancellationToken, SimulationEngine};
pub use simulation_system::extensions::{HookContext, SimulationExtension};
pub use simulation_system::phase::FlightPhase;
pub use simulation_system::simulation::{
    ChangeKind, RunStatus, Simulation, SimulationListener,
};

// Re-export commonly used items from trajectory_system
pub use trajectory_system::events::{FlightEvent, FlightEventType};
pub use trajectory_system::state::{MassProperties, RigidBodyState};
pub use trajectory_system::stepper::{EulerStepper, NumericalStepper, Rk4Stepper};

// Re-export commonly used items from telemetry_system
pub use telemetry_system::telemetry::{FlightSummary, Telemetry};
