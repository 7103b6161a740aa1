use std::fmt;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::context::FlightContext;
use super::state::RigidBodyState;
use crate::constants::LIFTOFF_DISTANCE;
use crate::control::conditions::EventDetectionSettings;
use crate::control::propulsion::MotorId;
use crate::control::recovery::DeploymentTrigger;
use crate::errors::{AbortCause, SimulationError, Warning};

/// Index of a branch in the run's branch arena. The root branch is `BranchId(0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BranchId(pub usize);

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kinds of flight events. The declaration order is the processing priority of
/// events that fall on the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FlightEventType {
    Launch,
    Ignition,
    Burnout,
    EjectionCharge,
    Liftoff,
    LaunchRodClearance,
    Apogee,
    RecoveryDeviceDeployment,
    StageSeparation,
    Tumble,
    GroundHit,
    SimulationEnd,
    SimWarn,
    SimAbort,
}

impl FlightEventType {
    /// Events after which a branch records no further samples.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FlightEventType::GroundHit | FlightEventType::SimulationEnd | FlightEventType::SimAbort
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            FlightEventType::Launch => "Launch",
            FlightEventType::Ignition => "Ignition",
            FlightEventType::Burnout => "Burnout",
            FlightEventType::EjectionCharge => "Ejection charge",
            FlightEventType::Liftoff => "Liftoff",
            FlightEventType::LaunchRodClearance => "Launch rod clearance",
            FlightEventType::Apogee => "Apogee",
            FlightEventType::RecoveryDeviceDeployment => "Recovery device deployment",
            FlightEventType::StageSeparation => "Stage separation",
            FlightEventType::Tumble => "Tumble",
            FlightEventType::GroundHit => "Ground hit",
            FlightEventType::SimulationEnd => "Simulation end",
            FlightEventType::SimWarn => "Warning",
            FlightEventType::SimAbort => "Simulation abort",
        }
    }
}

impl fmt::Display for FlightEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Component an event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    Rocket,
    Stage(usize),
    Motor(MotorId),
    /// Index into the configuration's recovery devices.
    RecoveryDevice(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    None,
    Abort(AbortCause),
    Warning(Warning),
    Separation { child: BranchId, separated_mass: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightEvent {
    pub kind: FlightEventType,
    pub time: f64,
    pub branch: BranchId,
    pub source: EventSource,
    pub payload: EventPayload,
}

impl FlightEvent {
    pub fn new(kind: FlightEventType, time: f64, branch: BranchId, source: EventSource) -> Self {
        FlightEvent {
            kind,
            time,
            branch,
            source,
            payload: EventPayload::None,
        }
    }

    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = payload;
        self
    }
}

impl fmt::Display for FlightEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at t={:.4}s", self.kind, self.time)
    }
}

/// Pending events of one branch, ordered by time, then priority, then insertion.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    events: Vec<(FlightEvent, u64)>,
    next_sequence: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue::default()
    }

    pub fn push(&mut self, event: FlightEvent) {
        let key = (event.time, event.kind, self.next_sequence);
        let index = self.events.partition_point(|(e, seq)| {
            (e.time, e.kind, *seq)
                .partial_cmp(&key)
                .is_some_and(|o| o.is_lt())
        });
        self.events.insert(index, (event, self.next_sequence));
        self.next_sequence += 1;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlightEvent> {
        self.events.iter().map(|(e, _)| e)
    }

    pub fn next_time(&self) -> Option<f64> {
        self.events.first().map(|(e, _)| e.time)
    }

    /// Time of the first pending event strictly after `time`.
    pub fn next_after(&self, time: f64) -> Option<f64> {
        self.events
            .iter()
            .map(|(e, _)| e.time)
            .find(|&t| t > time)
    }

    pub fn next_of_kind(&self, kind: FlightEventType) -> Option<f64> {
        self.events
            .iter()
            .find(|(e, _)| e.kind == kind)
            .map(|(e, _)| e.time)
    }

    /// Removes the next event due at or before `time`. Events within `tie_tolerance`
    /// of the earliest pending one are taken in priority order.
    pub fn pop_due(&mut self, time: f64, tie_tolerance: f64) -> Option<FlightEvent> {
        let earliest = self.next_time()?;
        if earliest > time + tie_tolerance {
            return None;
        }
        let window = (earliest + tie_tolerance).min(time + tie_tolerance);
        let index = self
            .events
            .iter()
            .enumerate()
            .take_while(|(_, (e, _))| e.time <= window)
            .min_by_key(|(_, (e, seq))| (e.kind, *seq))
            .map(|(i, _)| i)?;
        Some(self.events.remove(index).0)
    }

    /// Removes and returns every event matching `predicate`, keeping their order.
    pub fn drain_where(&mut self, mut predicate: impl FnMut(&FlightEvent) -> bool) -> Vec<FlightEvent> {
        let mut drained = Vec::new();
        let mut kept = Vec::with_capacity(self.events.len());
        for (event, seq) in self.events.drain(..) {
            if predicate(&event) {
                drained.push(event);
            } else {
                kept.push((event, seq));
            }
        }
        self.events = kept;
        drained
    }
}

/// Continuous conditions located by sign changes of a scalar function of the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TriggerKind {
    Liftoff,
    LaunchRodClearance,
    Apogee,
    DeployAltitude(usize),
    DeployVelocity(usize),
    GroundHit,
}

impl TriggerKind {
    pub fn event_type(self) -> FlightEventType {
        match self {
            TriggerKind::Liftoff => FlightEventType::Liftoff,
            TriggerKind::LaunchRodClearance => FlightEventType::LaunchRodClearance,
            TriggerKind::Apogee => FlightEventType::Apogee,
            TriggerKind::DeployAltitude(_) | TriggerKind::DeployVelocity(_) => {
                FlightEventType::RecoveryDeviceDeployment
            }
            TriggerKind::GroundHit => FlightEventType::GroundHit,
        }
    }

    pub fn source(self) -> EventSource {
        match self {
            TriggerKind::DeployAltitude(device) | TriggerKind::DeployVelocity(device) => {
                EventSource::RecoveryDevice(device)
            }
            _ => EventSource::Rocket,
        }
    }

    fn name(self) -> String {
        match self {
            TriggerKind::DeployAltitude(device) => format!("deployment altitude #{}", device),
            TriggerKind::DeployVelocity(device) => format!("deployment velocity #{}", device),
            other => other.event_type().name().to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossing {
    /// Negative to non-negative.
    Rising,
    /// Positive to non-positive.
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Measure {
    AlongRod(Vector3<f64>),
    VerticalVelocity,
    Altitude,
    DescentRate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub crossing: Crossing,
    measure: Measure,
    offset: f64,
}

impl Trigger {
    pub fn liftoff(rod_direction: Vector3<f64>) -> Self {
        Trigger {
            kind: TriggerKind::Liftoff,
            crossing: Crossing::Rising,
            measure: Measure::AlongRod(rod_direction),
            offset: LIFTOFF_DISTANCE,
        }
    }

    pub fn launch_rod_clearance(rod_direction: Vector3<f64>, rod_length: f64) -> Self {
        Trigger {
            kind: TriggerKind::LaunchRodClearance,
            crossing: Crossing::Rising,
            measure: Measure::AlongRod(rod_direction),
            offset: rod_length.max(LIFTOFF_DISTANCE),
        }
    }

    pub fn apogee() -> Self {
        Trigger {
            kind: TriggerKind::Apogee,
            crossing: Crossing::Falling,
            measure: Measure::VerticalVelocity,
            offset: 0.0,
        }
    }

    pub fn ground_hit() -> Self {
        Trigger {
            kind: TriggerKind::GroundHit,
            crossing: Crossing::Falling,
            measure: Measure::Altitude,
            offset: 0.0,
        }
    }

    pub fn deploy_altitude(device: usize, altitude: f64) -> Self {
        Trigger {
            kind: TriggerKind::DeployAltitude(device),
            crossing: Crossing::Falling,
            measure: Measure::Altitude,
            offset: altitude,
        }
    }

    pub fn deploy_velocity(device: usize, descent_rate: f64) -> Self {
        Trigger {
            kind: TriggerKind::DeployVelocity(device),
            crossing: Crossing::Rising,
            measure: Measure::DescentRate,
            offset: descent_rate,
        }
    }

    pub fn value(&self, state: &RigidBodyState) -> f64 {
        let raw = match self.measure {
            Measure::AlongRod(direction) => state.position.dot(&direction),
            Measure::VerticalVelocity => state.velocity.z,
            Measure::Altitude => state.position.z,
            Measure::DescentRate => -state.velocity.z,
        };
        raw - self.offset
    }

    pub fn crossed(&self, before: f64, after: f64) -> bool {
        match self.crossing {
            Crossing::Rising => before < 0.0 && after >= 0.0,
            Crossing::Falling => before > 0.0 && after <= 0.0,
        }
    }
}

/// Triggers armed for a branch in its current discrete state.
pub fn active_triggers(
    context: &FlightContext,
    rod_direction: Vector3<f64>,
    rod_length: f64,
) -> Vec<Trigger> {
    let mut triggers = Vec::new();

    if !context.lifted_off {
        triggers.push(Trigger::liftoff(rod_direction));
    }
    if context.on_launch_rod {
        triggers.push(Trigger::launch_rod_clearance(rod_direction, rod_length));
    }
    if context.lifted_off && !context.apogee_reached {
        triggers.push(Trigger::apogee());
    }
    if context.apogee_reached {
        for (index, device) in context.recovery_devices() {
            if context.is_deployed(index) {
                continue;
            }
            match device.trigger {
                DeploymentTrigger::Altitude(altitude) => {
                    triggers.push(Trigger::deploy_altitude(index, altitude))
                }
                DeploymentTrigger::DescentVelocity(rate) => {
                    triggers.push(Trigger::deploy_velocity(index, rate))
                }
                _ => {}
            }
        }
    }
    if context.lifted_off {
        triggers.push(Trigger::ground_hit());
    }

    triggers
}

/// Outcome of a step in which at least one trigger crossed.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Located event time; the step is truncated here.
    pub time: f64,
    pub state: RigidBodyState,
    /// Triggers firing at `time`, in priority order.
    pub fired: Vec<TriggerKind>,
    pub warnings: Vec<Warning>,
}

struct Located {
    time: f64,
    state: RigidBodyState,
    kind: TriggerKind,
    warning: Option<Warning>,
}

/// Brackets and bisects trigger crossings within one accepted step.
#[derive(Debug, Clone, Copy)]
pub struct EventDetector {
    settings: EventDetectionSettings,
}

impl EventDetector {
    pub fn new(settings: EventDetectionSettings) -> Self {
        EventDetector { settings }
    }

    /// Compares every trigger before and after the step. `restep(h)` must integrate
    /// from `before` over `h` seconds with the same forces as the step itself.
    pub fn detect(
        &self,
        triggers: &[Trigger],
        before: &RigidBodyState,
        after: &RigidBodyState,
        restep: &mut dyn FnMut(f64) -> Result<RigidBodyState, SimulationError>,
    ) -> Result<Option<Detection>, SimulationError> {
        let mut located = Vec::new();
        for trigger in triggers {
            if trigger.crossed(trigger.value(before), trigger.value(after)) {
                located.push(self.locate(trigger, before, after, restep)?);
            }
        }

        let Some(earliest) = located.iter().map(|l| l.time).reduce(f64::min) else {
            return Ok(None);
        };

        let mut fired: Vec<&Located> = located
            .iter()
            .filter(|l| l.time <= earliest + self.settings.tie_tolerance)
            .collect();
        fired.sort_by_key(|l| (l.kind.event_type(), l.kind));

        let state = located
            .iter()
            .find(|l| l.time == earliest)
            .map(|l| l.state.clone())
            .unwrap_or_else(|| after.clone());

        Ok(Some(Detection {
            time: earliest,
            state,
            fired: fired.iter().map(|l| l.kind).collect(),
            warnings: fired.iter().filter_map(|l| l.warning.clone()).collect(),
        }))
    }

    /// Secant first guess, then bisection. Only states on the crossed side are
    /// accepted, so the trigger never fires twice for one crossing.
    fn locate(
        &self,
        trigger: &Trigger,
        before: &RigidBodyState,
        after: &RigidBodyState,
        restep: &mut dyn FnMut(f64) -> Result<RigidBodyState, SimulationError>,
    ) -> Result<Located, SimulationError> {
        let start = trigger.value(before);
        let mut lo = 0.0;
        let mut hi = after.time - before.time;
        let mut value_lo = start;
        let mut value_hi = trigger.value(after);
        let mut best = (after.time, after.clone(), value_hi);

        for iteration in 0..self.settings.max_iterations {
            if best.2.abs() <= self.settings.value_tolerance
                || hi - lo <= self.settings.time_tolerance
            {
                break;
            }

            let mut guess = if iteration == 0 && value_lo != value_hi {
                lo + (hi - lo) * value_lo / (value_lo - value_hi)
            } else {
                0.5 * (lo + hi)
            };
            if !(guess > lo && guess < hi) {
                guess = 0.5 * (lo + hi);
            }

            let state = restep(guess)?;
            let value = trigger.value(&state);
            if !value.is_finite() {
                return Err(SimulationError::NonFinite(format!("{} trigger", trigger.kind.name())));
            }

            if trigger.crossed(start, value) {
                hi = guess;
                value_hi = value;
                best = (state.time, state, value);
            } else {
                lo = guess;
                value_lo = value;
            }
        }

        let (time, state, residual) = best;
        let warning = (residual.abs() > self.settings.value_tolerance).then(|| {
            Warning::EventPrecision {
                trigger: trigger.kind.name(),
                residual,
            }
        });

        Ok(Located {
            time,
            state,
            kind: trigger.kind,
            warning,
        })
    }
}
