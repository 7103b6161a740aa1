use std::fmt;

use serde::{Deserialize, Serialize};

use crate::trajectory_system::context::FlightContext;
use crate::trajectory_system::events::FlightEventType;

/// Flight phase of one branch. Phases only ever move forward in the
/// declaration order; the last three absorb every further event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FlightPhase {
    OnPad,
    LaunchRod,
    PoweredAscent,
    Coasting,
    Apogee,
    Tumbling,
    RecoveryDeployed,
    StageSeparated,
    Landed,
    Aborted,
}

impl FlightPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FlightPhase::StageSeparated | FlightPhase::Landed | FlightPhase::Aborted
        )
    }

    /// Moves to `next` unless that would go backwards or leave a terminal phase.
    pub fn advance(self, next: FlightPhase) -> FlightPhase {
        if self.is_terminal() {
            self
        } else {
            self.max(next)
        }
    }

    /// Phase after `event` has been applied to `context`.
    pub fn after_event(self, event: FlightEventType, context: &FlightContext) -> FlightPhase {
        let candidate = match event {
            FlightEventType::Ignition if context.lifted_off => FlightPhase::PoweredAscent,
            FlightEventType::Liftoff => FlightPhase::LaunchRod,
            FlightEventType::LaunchRodClearance | FlightEventType::Burnout
                if !context.on_launch_rod && context.lifted_off =>
            {
                if context.is_thrusting() {
                    FlightPhase::PoweredAscent
                } else if context.apogee_reached {
                    FlightPhase::Apogee
                } else {
                    FlightPhase::Coasting
                }
            }
            // Apogee under thrust keeps the powered phase until burnout.
            FlightEventType::Apogee if !context.is_thrusting() => FlightPhase::Apogee,
            FlightEventType::Tumble => FlightPhase::Tumbling,
            FlightEventType::RecoveryDeviceDeployment => FlightPhase::RecoveryDeployed,
            FlightEventType::GroundHit => FlightPhase::Landed,
            FlightEventType::SimAbort => FlightPhase::Aborted,
            _ => return self,
        };
        self.advance(candidate)
    }
}

impl fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlightPhase::OnPad => "On pad",
            FlightPhase::LaunchRod => "Launch rod",
            FlightPhase::PoweredAscent => "Powered ascent",
            FlightPhase::Coasting => "Coasting",
            FlightPhase::Apogee => "Apogee",
            FlightPhase::Tumbling => "Tumbling",
            FlightPhase::RecoveryDeployed => "Recovery deployed",
            FlightPhase::StageSeparated => "Stage separated",
            FlightPhase::Landed => "Landed",
            FlightPhase::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}
