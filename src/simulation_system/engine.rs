use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::Vector3;
use tracing::{debug, info, trace, warn};

use super::branch::{BranchId, BranchStatus, FlightData, FlightDataBranch, FlightSample};
use super::extensions::{ExtensionChain, HookContext, HookRequest, SimulationExtension};
use super::phase::FlightPhase;
use crate::constants::{
    AOA_TUMBLE_CONDITION, HIGH_SPEED_DEPLOYMENT, LAUNCH_ROD_STEP_DIVISOR, MIN_STEP_DIVISOR,
    THRUST_TUMBLE_CONDITION,
};
use crate::control::conditions::SimulationConditions;
use crate::control::launch_stages::SeparationTrigger;
use crate::control::propulsion::{IgnitionTrigger, MotorId, MotorMount};
use crate::control::recovery::DeploymentTrigger;
use crate::control::structure::FlightConfiguration;
use crate::errors::{AbortCause, SimulationError, Warning, WarningSet};
use crate::trajectory_system::context::{AerodynamicMode, FlightContext};
use crate::trajectory_system::events::{
    active_triggers, EventDetector, EventPayload, EventQueue, EventSource, FlightEvent,
    FlightEventType,
};
use crate::trajectory_system::forces::{DerivedQuantities, ForceMoment};
use crate::trajectory_system::state::{MassProperties, RigidBodyState};
use crate::utils::geometry::orientation_along;

/// Run-level stop flag, checked once per step.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Work item of the branch queue.
struct BranchRun {
    id: BranchId,
    state: RigidBodyState,
    context: FlightContext,
    phase: FlightPhase,
    queue: EventQueue,
    steps: usize,
    landed: bool,
    /// Set by a terminal event; the branch freezes once the step's sample is stored.
    finish: Option<(BranchStatus, FlightPhase)>,
}

fn advance(
    conditions: &SimulationConditions,
    context: &FlightContext,
    state: &RigidBodyState,
    dt: f64,
) -> Result<RigidBodyState, SimulationError> {
    let forces = |s: &RigidBodyState| conditions.models.force_model.evaluate(s, context, conditions);
    conditions.models.stepper.advance(state, &forces, dt)
}

/// Drives every branch of one run, in FIFO order, on the calling thread.
pub struct SimulationEngine {
    conditions: Arc<SimulationConditions>,
    extensions: ExtensionChain,
    detector: EventDetector,
    cancel: CancellationToken,
    branches: Vec<FlightDataBranch>,
    work: VecDeque<BranchRun>,
}

impl SimulationEngine {
    pub fn new(
        conditions: SimulationConditions,
        extensions: Vec<Box<dyn SimulationExtension>>,
        cancel: CancellationToken,
    ) -> Self {
        let detector = EventDetector::new(conditions.options.events);
        SimulationEngine {
            conditions: Arc::new(conditions),
            extensions: ExtensionChain::new(extensions),
            detector,
            cancel,
            branches: Vec::new(),
            work: VecDeque::new(),
        }
    }

    /// Runs to completion. Only extension initialisation can fail the whole run;
    /// everything after that ends up in the branches.
    pub fn run(mut self) -> Result<FlightData, SimulationError> {
        let conditions = Arc::clone(&self.conditions);
        self.extensions.initialize(&conditions)?;

        let configuration = Arc::clone(&conditions.configuration);
        info!(
            configuration = %configuration.id,
            stages = configuration.stages.len(),
            extensions = self.extensions.len(),
            "Starting simulation"
        );

        let root = BranchId(0);
        let mut queue = EventQueue::new();
        queue.push(FlightEvent::new(FlightEventType::Launch, 0.0, root, EventSource::Rocket));
        self.branches
            .push(FlightDataBranch::new(root, configuration.id.0.clone(), None, 0.0));
        self.work.push_back(BranchRun {
            id: root,
            state: RigidBodyState::at_rest(
                orientation_along(&conditions.launch_rod_direction),
                MassProperties::point_mass(0.0),
            ),
            context: FlightContext::new(Arc::clone(&configuration)),
            phase: FlightPhase::OnPad,
            queue,
            steps: 0,
            landed: false,
            finish: None,
        });

        while let Some(mut run) = self.work.pop_front() {
            self.simulate_branch(&mut run);
        }

        let mut branches = std::mem::take(&mut self.branches);
        let mut warnings = WarningSet::new();
        for branch in &mut branches {
            if branch.is_empty() {
                branch.add_warning(Warning::EmptyBranch(branch.name.clone()));
            }
            warnings.extend(branch.warnings());
        }

        let mut data = FlightData {
            configuration: configuration.id.clone(),
            modification_id: configuration.modification_id,
            branches,
            warnings,
        };
        for warning in self.extensions.end_simulation(&data) {
            warn!(%warning, "Extension failed at end of simulation");
            data.warnings.add(warning);
        }

        info!(
            branches = data.branches.len(),
            warnings = data.warnings.len(),
            "Simulation finished"
        );
        Ok(data)
    }

    fn simulate_branch(&mut self, run: &mut BranchRun) {
        info!(branch = %run.id, name = %self.branches[run.id.0].name, t = run.state.time, "Starting branch");

        if let Err(error) = self.start_branch(run) {
            self.abort(run, error.abort_cause());
        }
        while !self.branches[run.id.0].is_frozen() {
            if let Err(error) = self.step(run) {
                self.abort(run, error.abort_cause());
            }
        }

        let branch = &self.branches[run.id.0];
        info!(
            branch = %run.id,
            status = ?branch.status(),
            samples = branch.len(),
            steps = run.steps,
            t = run.state.time,
            "Branch finished"
        );
    }

    fn start_branch(&mut self, run: &mut BranchRun) -> Result<(), SimulationError> {
        let conditions = Arc::clone(&self.conditions);
        let is_root = self.branches[run.id.0].parent.is_none();
        let center_of_pressure = conditions.models.aerodynamics.center_of_pressure(&run.context);
        let mut fired = Vec::new();

        if !is_root && center_of_pressure.is_none() {
            run.queue.push(FlightEvent::new(
                FlightEventType::Tumble,
                run.state.time,
                run.id,
                EventSource::Rocket,
            ));
        }

        let now = run.state.time;
        self.handle_due_events(run, now, &mut fired)?;

        if !run.context.lifted_off && !run.context.any_ignited() {
            match run.queue.next_of_kind(FlightEventType::Ignition) {
                Some(ignition) => {
                    debug!(branch = %run.id, t = ignition, "Waiting on the pad for ignition");
                    run.state.time = ignition;
                    self.handle_due_events(run, ignition, &mut fired)?;
                }
                None => return Err(SimulationError::Aborted(AbortCause::NoMotorsFired)),
            }
        }

        if is_root {
            if center_of_pressure.is_none() {
                return Err(SimulationError::Aborted(AbortCause::NoCenterOfPressure));
            }
            if conditions.configuration.recovery_devices.is_empty() {
                self.add_warning(run.id, Warning::NoRecoveryDevice);
            }
        }

        let max_time = conditions.options.end.max_time;
        if max_time > run.state.time {
            run.queue.push(FlightEvent::new(
                FlightEventType::SimulationEnd,
                max_time,
                run.id,
                EventSource::Rocket,
            ));
        }

        let load = conditions
            .models
            .force_model
            .evaluate(&run.state, &run.context, &conditions)?;
        self.store_load(run, &load);

        let branch = &mut self.branches[run.id.0];
        if branch.is_empty() {
            let sample =
                FlightSample::new(run.state.clone(), load.derived, run.phase).with_events(fired);
            branch.push_sample(sample)?;
        } else {
            branch.attach_events(fired);
            branch.set_phase(run.phase);
        }
        self.finish_if_done(run);
        Ok(())
    }

    fn step(&mut self, run: &mut BranchRun) -> Result<(), SimulationError> {
        let conditions = Arc::clone(&self.conditions);
        let options = &conditions.options;

        if self.cancel.is_cancelled() {
            return Err(SimulationError::Aborted(AbortCause::Cancelled));
        }
        if run.steps >= options.end.max_steps {
            return Err(SimulationError::Aborted(AbortCause::StepLimitExceeded(
                options.end.max_steps,
            )));
        }

        // 1. pre-step hooks
        let requests = {
            let mut hook =
                HookContext::new(run.id, &run.state, run.phase, &run.context, &conditions);
            self.extensions.pre_step(&mut hook)?;
            hook.into_requests()
        };
        self.apply_requests(run, requests);

        // 2. step size
        let (dt, snap) = self.step_size(run);

        // 3. integrate
        let before = run.state.clone();
        let mut after = advance(&conditions, &run.context, &before, dt)?;
        if let Some(time) = snap {
            after.time = time;
        }
        after.check_finite()?;

        // 4. event detection
        let triggers = active_triggers(
            &run.context,
            conditions.launch_rod_direction,
            options.launch_rod.length,
        );
        let detection = {
            let mut restep = |h: f64| advance(&conditions, &run.context, &before, h);
            self.detector.detect(&triggers, &before, &after, &mut restep)?
        };
        run.state = match detection {
            Some(detection) => {
                detection.state.check_finite()?;
                for warning in detection.warnings {
                    self.add_warning(run.id, warning);
                }
                for kind in &detection.fired {
                    let delay = match kind.source() {
                        EventSource::RecoveryDevice(device) => conditions
                            .configuration
                            .recovery_devices
                            .get(device)
                            .map_or(0.0, |d| d.delay),
                        _ => 0.0,
                    };
                    run.queue.push(FlightEvent::new(
                        kind.event_type(),
                        detection.time + delay,
                        run.id,
                        kind.source(),
                    ));
                }
                trace!(branch = %run.id, t = detection.time, fired = ?detection.fired, "Step truncated at event");
                detection.state
            }
            None => after,
        };
        run.steps += 1;

        // 5. events due in this step
        let now = run.state.time;
        let mut fired = Vec::new();
        self.handle_due_events(run, now, &mut fired)?;

        if matches!(run.finish, Some((BranchStatus::Separated, _))) {
            self.branches[run.id.0].attach_events(fired);
            self.finish_if_done(run);
            return Ok(());
        }

        // 6. derived quantities and the sample
        let load = conditions
            .models
            .force_model
            .evaluate(&run.state, &run.context, &conditions)?;
        self.store_load(run, &load);
        if Self::should_tumble(&run.context, &load.derived) {
            run.queue.push(FlightEvent::new(
                FlightEventType::Tumble,
                now,
                run.id,
                EventSource::Rocket,
            ));
        }
        trace!(
            branch = %run.id,
            t = now,
            dt,
            altitude = run.state.altitude(),
            speed = run.state.speed(),
            "Step"
        );
        let sample = FlightSample::new(run.state.clone(), load.derived, run.phase).with_events(fired);
        self.branches[run.id.0].push_sample(sample)?;

        // 7. post-step hooks, then anything they or the sample made due
        let requests = {
            let mut hook =
                HookContext::new(run.id, &run.state, run.phase, &run.context, &conditions);
            self.extensions.post_step(&mut hook)?;
            hook.into_requests()
        };
        self.apply_requests(run, requests);

        let mut late = Vec::new();
        self.handle_due_events(run, now, &mut late)?;
        let branch = &mut self.branches[run.id.0];
        branch.attach_events(late);
        branch.set_phase(run.phase);

        self.finish_if_done(run);
        Ok(())
    }

    /// User step, reduced on the rod and for fast rotation, truncated to the next queued event.
    fn step_size(&self, run: &BranchRun) -> (f64, Option<f64>) {
        let options = &self.conditions.options;
        let mut dt = options.time_step;
        if run.context.on_launch_rod {
            dt /= LAUNCH_ROD_STEP_DIVISOR;
        }
        let rate = run.state.angular_velocity.norm();
        if rate > 0.0 {
            dt = dt.min(options.max_angle_step / rate);
        }
        dt = dt.max(options.time_step / MIN_STEP_DIVISOR);

        match run.queue.next_after(run.state.time) {
            Some(next) if next - run.state.time <= dt => (next - run.state.time, Some(next)),
            _ => (dt, None),
        }
    }

    fn should_tumble(context: &FlightContext, derived: &DerivedQuantities) -> bool {
        context.mode == AerodynamicMode::Flight
            && context.lifted_off
            && !context.on_launch_rod
            && context.deployed_devices.is_empty()
            && derived
                .center_of_pressure
                .is_some_and(|cp| derived.center_of_gravity > cp)
            && derived.angle_of_attack > AOA_TUMBLE_CONDITION
    }

    fn store_load(&mut self, run: &mut BranchRun, load: &ForceMoment) {
        run.state.mass = load.mass.mass;
        run.state.inertia = load.mass.inertia;
        for warning in &load.warnings {
            self.add_warning(run.id, warning.clone());
        }
    }

    fn add_warning(&mut self, branch: BranchId, warning: Warning) {
        if self.branches[branch.0].add_warning(warning.clone()) {
            warn!(branch = %branch, %warning, "Simulation warning");
        }
    }

    fn apply_requests(&mut self, run: &mut BranchRun, requests: Vec<HookRequest>) {
        for request in requests {
            match request {
                HookRequest::WindGust(gust) => run.context.wind_gust = gust,
                HookRequest::DeployRecovery(device) => run.queue.push(FlightEvent::new(
                    FlightEventType::RecoveryDeviceDeployment,
                    run.state.time,
                    run.id,
                    EventSource::RecoveryDevice(device),
                )),
                HookRequest::Warning(message) => {
                    self.add_warning(run.id, Warning::ExtensionWarning(message))
                }
            }
        }
    }

    fn finish_if_done(&mut self, run: &mut BranchRun) {
        if let Some((status, phase)) = run.finish.take() {
            run.phase = phase;
            self.branches[run.id.0].freeze(status, phase);
        }
    }

    fn abort(&mut self, run: &mut BranchRun, cause: AbortCause) {
        warn!(branch = %run.id, t = run.state.time, %cause, "Branch aborted");
        let event = FlightEvent::new(
            FlightEventType::SimAbort,
            run.state.time,
            run.id,
            EventSource::Rocket,
        )
        .with_payload(EventPayload::Abort(cause.clone()));

        let branch = &mut self.branches[run.id.0];
        branch.log_event(event);
        branch.freeze(BranchStatus::Aborted(cause), FlightPhase::Aborted);
        run.phase = FlightPhase::Aborted;
        run.finish = None;
    }

    fn schedule(run: &mut BranchRun, kind: FlightEventType, time: f64, source: EventSource) {
        run.queue.push(FlightEvent::new(kind, time, run.id, source));
    }

    fn handle_due_events(
        &mut self,
        run: &mut BranchRun,
        cutoff: f64,
        fired: &mut Vec<FlightEvent>,
    ) -> Result<(), SimulationError> {
        let tie = self.conditions.options.events.tie_tolerance;
        while let Some(mut event) = run.queue.pop_due(cutoff, tie) {
            // Late events and events pulled in through the tie window both
            // happen at the state they are applied to.
            event.time = run.state.time;
            event.branch = run.id;

            if run.landed {
                self.add_warning(run.id, Warning::EventAfterLanding(event.kind.name().to_string()));
                continue;
            }
            if !self.approve_event(run, &event)? {
                debug!(branch = %run.id, %event, "Event vetoed by extension");
                continue;
            }
            self.apply_event(run, event, fired)?;
        }
        Ok(())
    }

    fn approve_event(&mut self, run: &mut BranchRun, event: &FlightEvent) -> Result<bool, SimulationError> {
        let conditions = Arc::clone(&self.conditions);
        let (approved, requests) = {
            let mut hook =
                HookContext::new(run.id, &run.state, run.phase, &run.context, &conditions);
            let approved = self.extensions.handle_event(event, &mut hook)?;
            (approved, hook.into_requests())
        };
        self.apply_requests(run, requests);
        Ok(approved)
    }

    fn apply_event(
        &mut self,
        run: &mut BranchRun,
        event: FlightEvent,
        fired: &mut Vec<FlightEvent>,
    ) -> Result<(), SimulationError> {
        let time = event.time;
        let handled = match (event.kind, event.source) {
            (FlightEventType::Launch, _) => {
                Self::launch(run, time);
                true
            }
            (FlightEventType::Ignition, EventSource::Motor(motor)) => Self::ignite(run, motor, time),
            (FlightEventType::Burnout, EventSource::Motor(motor)) => {
                let handled = Self::burn_out(run, motor, time);
                if handled && !run.context.lifted_off {
                    self.branches[run.id.0].log_event(event);
                    return Err(SimulationError::Aborted(AbortCause::NoLiftoff));
                }
                handled
            }
            (FlightEventType::EjectionCharge, EventSource::Motor(motor)) => {
                Self::eject(run, motor, time);
                true
            }
            (FlightEventType::Liftoff, _) => !std::mem::replace(&mut run.context.lifted_off, true),
            (FlightEventType::LaunchRodClearance, _) => {
                run.context.lifted_off = true;
                std::mem::replace(&mut run.context.on_launch_rod, false)
            }
            (FlightEventType::Apogee, _) => {
                if run.context.apogee_reached {
                    false
                } else {
                    run.context.apogee_reached = true;
                    Self::schedule_deployments(run, time, |t| *t == DeploymentTrigger::Apogee);
                    true
                }
            }
            (FlightEventType::RecoveryDeviceDeployment, EventSource::RecoveryDevice(device)) => {
                self.deploy(run, device, &event)?
            }
            (FlightEventType::Tumble, _) => self.tumble(run, &event)?,
            (FlightEventType::StageSeparation, EventSource::Stage(stage)) => {
                return self.separate(run, stage, event, fired);
            }
            (FlightEventType::GroundHit, _) => {
                run.landed = true;
                run.finish = Some((BranchStatus::Landed, FlightPhase::Landed));
                true
            }
            (FlightEventType::SimulationEnd, _) => {
                if run.finish.is_none() {
                    run.finish = Some((BranchStatus::EndReached, run.phase));
                }
                true
            }
            (FlightEventType::SimWarn, _) => {
                if let EventPayload::Warning(warning) = &event.payload {
                    self.add_warning(run.id, warning.clone());
                }
                true
            }
            (FlightEventType::SimAbort, _) => {
                let cause = match &event.payload {
                    EventPayload::Abort(cause) => cause.clone(),
                    _ => AbortCause::CollaboratorFailure("abort requested".to_string()),
                };
                return Err(SimulationError::Aborted(cause));
            }
            (kind, source) => {
                warn!(branch = %run.id, ?kind, ?source, "Event with unexpected source ignored");
                false
            }
        };

        if handled {
            run.phase = run.phase.after_event(event.kind, &run.context);
            debug!(branch = %run.id, %event, phase = %run.phase, "Flight event");
            fired.push(event);
        }
        Ok(())
    }

    fn launch(run: &mut BranchRun, time: f64) {
        let configuration = Arc::clone(&run.context.configuration);
        let motors: Vec<MotorId> = run.context.motors.iter().map(|m| m.id).collect();
        for id in motors {
            if let Some(mount) = configuration.mount(id) {
                if mount.ignition == IgnitionTrigger::Launch && mount.is_usable() {
                    Self::schedule(
                        run,
                        FlightEventType::Ignition,
                        time + mount.ignition_delay,
                        EventSource::Motor(id),
                    );
                }
            }
        }

        let timed: Vec<(usize, f64)> = run
            .context
            .recovery_devices()
            .into_iter()
            .filter_map(|(index, device)| match device.trigger {
                DeploymentTrigger::Time(at) => Some((index, at + device.delay)),
                _ => None,
            })
            .collect();
        for (index, at) in timed {
            Self::schedule(
                run,
                FlightEventType::RecoveryDeviceDeployment,
                at.max(time),
                EventSource::RecoveryDevice(index),
            );
        }
    }

    fn ignite(run: &mut BranchRun, motor: MotorId, time: f64) -> bool {
        let configuration = Arc::clone(&run.context.configuration);
        let Some(mount) = configuration.mount(motor) else {
            return false;
        };
        match run.context.motor_mut(motor) {
            Some(state) if state.ignition_time.is_none() => state.ignition_time = Some(time),
            _ => return false,
        }

        Self::schedule(
            run,
            FlightEventType::Burnout,
            time + mount.motor.burn_time(),
            EventSource::Motor(motor),
        );
        if let Some(SeparationTrigger::TimeSinceIgnition(delay)) =
            configuration.stages.get(motor.stage).map(|s| s.separation)
        {
            Self::schedule(
                run,
                FlightEventType::StageSeparation,
                time + delay,
                EventSource::Stage(motor.stage),
            );
        }
        true
    }

    fn burn_out(run: &mut BranchRun, motor: MotorId, time: f64) -> bool {
        let configuration = Arc::clone(&run.context.configuration);
        match run.context.motor_mut(motor) {
            Some(state) if state.is_burning() => state.burned_out = true,
            _ => return false,
        }
        if !run.context.lifted_off {
            return true;
        }

        if let Some(delay) = configuration.mount(motor).and_then(|m| m.ejection_delay) {
            Self::schedule(
                run,
                FlightEventType::EjectionCharge,
                time + delay,
                EventSource::Motor(motor),
            );
        }
        if let Some(SeparationTrigger::Burnout { delay }) =
            configuration.stages.get(motor.stage).map(|s| s.separation)
        {
            Self::schedule(
                run,
                FlightEventType::StageSeparation,
                time + delay,
                EventSource::Stage(motor.stage),
            );
        }
        Self::ignite_upper_stage(run, &configuration, motor.stage, IgnitionTrigger::Burnout, time);
        true
    }

    fn eject(run: &mut BranchRun, motor: MotorId, time: f64) {
        let configuration = Arc::clone(&run.context.configuration);
        if let Some(SeparationTrigger::EjectionCharge { delay }) =
            configuration.stages.get(motor.stage).map(|s| s.separation)
        {
            Self::schedule(
                run,
                FlightEventType::StageSeparation,
                time + delay,
                EventSource::Stage(motor.stage),
            );
        }
        Self::ignite_upper_stage(
            run,
            &configuration,
            motor.stage,
            IgnitionTrigger::EjectionCharge,
            time,
        );

        let stage = motor.stage;
        let devices: Vec<(usize, f64)> = run
            .context
            .recovery_devices()
            .into_iter()
            .filter(|(_, d)| d.stage == stage && d.trigger == DeploymentTrigger::EjectionCharge)
            .map(|(index, d)| (index, d.delay))
            .collect();
        for (index, delay) in devices {
            Self::schedule(
                run,
                FlightEventType::RecoveryDeviceDeployment,
                time + delay,
                EventSource::RecoveryDevice(index),
            );
        }
    }

    /// Queues the motors of the stage directly above `stage` that wait for `trigger`.
    fn ignite_upper_stage(
        run: &mut BranchRun,
        configuration: &FlightConfiguration,
        stage: usize,
        trigger: IgnitionTrigger,
        time: f64,
    ) {
        let Some(upper) = stage.checked_sub(1) else {
            return;
        };
        for id in configuration.motor_ids(&(upper..stage)) {
            if run.context.motor(id).is_none() {
                continue;
            }
            if let Some(mount) = configuration.mount(id) {
                if mount.ignition == trigger && mount.is_usable() {
                    Self::schedule(
                        run,
                        FlightEventType::Ignition,
                        time + mount.ignition_delay,
                        EventSource::Motor(id),
                    );
                }
            }
        }
    }

    fn schedule_deployments(
        run: &mut BranchRun,
        time: f64,
        matches: impl Fn(&DeploymentTrigger) -> bool,
    ) {
        let devices: Vec<(usize, f64)> = run
            .context
            .recovery_devices()
            .into_iter()
            .filter(|(index, d)| !run.context.is_deployed(*index) && matches(&d.trigger))
            .map(|(index, d)| (index, d.delay))
            .collect();
        for (index, delay) in devices {
            Self::schedule(
                run,
                FlightEventType::RecoveryDeviceDeployment,
                time + delay,
                EventSource::RecoveryDevice(index),
            );
        }
    }

    fn deploy(
        &mut self,
        run: &mut BranchRun,
        device: usize,
        event: &FlightEvent,
    ) -> Result<bool, SimulationError> {
        let carried = run
            .context
            .recovery_devices()
            .iter()
            .any(|(index, _)| *index == device);
        if !carried || run.context.is_deployed(device) {
            return Ok(false);
        }
        if run.context.is_thrusting() {
            self.branches[run.id.0].log_event(event.clone());
            return Err(SimulationError::Aborted(AbortCause::DeployUnderThrust));
        }

        if run.context.on_launch_rod {
            self.add_warning(run.id, Warning::RecoveryOnLaunchRod);
        }
        let speed = run.state.speed();
        if speed > HIGH_SPEED_DEPLOYMENT {
            self.add_warning(run.id, Warning::HighSpeedDeployment(speed));
        }

        run.context.deployed_devices.push(device);
        run.context.mode = AerodynamicMode::Recovery;
        run.state.angular_velocity = Vector3::zeros();
        Ok(true)
    }

    fn tumble(&mut self, run: &mut BranchRun, event: &FlightEvent) -> Result<bool, SimulationError> {
        if run.context.mode != AerodynamicMode::Flight {
            return Ok(false);
        }
        if run.context.thrust(run.state.time)? > THRUST_TUMBLE_CONDITION {
            self.branches[run.id.0].log_event(event.clone());
            return Err(SimulationError::Aborted(AbortCause::TumbleUnderThrust));
        }
        run.context.mode = AerodynamicMode::Tumbling;
        Ok(true)
    }

    /// Splits `stage` and everything below it off into a new branch queued behind
    /// the current one.
    fn separate(
        &mut self,
        run: &mut BranchRun,
        stage: usize,
        event: FlightEvent,
        fired: &mut Vec<FlightEvent>,
    ) -> Result<(), SimulationError> {
        if !run.context.contains_stage(stage) {
            return Ok(());
        }
        let conditions = Arc::clone(&self.conditions);
        let configuration = Arc::clone(&run.context.configuration);
        let mass_calculator = &conditions.models.mass_calculator;
        let time = run.state.time;

        if run.context.on_launch_rod {
            self.add_warning(run.id, Warning::EarlySeparation);
        }

        let mut child_context = run.context.split_off(stage);
        let never_fired = child_context.motors.iter().any(|m| {
            m.ignition_time.is_none() && configuration.mount(m.id).is_some_and(MotorMount::is_usable)
        });
        if never_fired {
            self.add_warning(run.id, Warning::SeparationOrder);
        }
        let child_mass = mass_calculator.mass_properties(&child_context, time)?;

        let parent_empty = run.context.stages.is_empty();
        if parent_empty {
            run.finish = Some((BranchStatus::Separated, FlightPhase::StageSeparated));
        } else {
            let parent_mass = mass_calculator.mass_properties(&run.context, time)?;
            run.state.mass = parent_mass.mass;
            run.state.inertia = parent_mass.inertia;
        }

        let child_id = BranchId(self.branches.len());
        let child_stages = child_context.stages.clone();
        let mut child_queue = EventQueue::new();
        let moved = run.queue.drain_where(|e| match e.source {
            EventSource::Stage(s) => child_stages.contains(&s),
            EventSource::Motor(m) => child_stages.contains(&m.stage),
            EventSource::RecoveryDevice(i) => configuration
                .recovery_devices
                .get(i)
                .is_some_and(|d| child_stages.contains(&d.stage)),
            EventSource::Rocket => false,
        });
        for mut pending in moved {
            if pending.kind == FlightEventType::StageSeparation
                && pending.source == EventSource::Stage(stage)
            {
                continue;
            }
            pending.branch = child_id;
            child_queue.push(pending);
        }

        let logged = event.with_payload(EventPayload::Separation {
            child: child_id,
            separated_mass: child_mass.mass,
        });

        let child_phase = if !child_context.lifted_off {
            run.phase
        } else if child_context.is_thrusting() {
            FlightPhase::PoweredAscent
        } else if !child_context.deployed_devices.is_empty() {
            FlightPhase::RecoveryDeployed
        } else if child_context.mode == AerodynamicMode::Tumbling {
            FlightPhase::Tumbling
        } else if child_context.apogee_reached {
            FlightPhase::Apogee
        } else {
            FlightPhase::Coasting
        };
        child_context.wind_gust = run.context.wind_gust;

        let mut child_state = run.state.clone();
        child_state.mass = child_mass.mass;
        child_state.inertia = child_mass.inertia;
        let derived = conditions
            .models
            .force_model
            .evaluate(&child_state, &child_context, &conditions)
            .map(|load| load.derived)
            .unwrap_or_default();

        let name = child_context
            .stages()
            .first()
            .map_or_else(|| format!("Branch {}", child_id.0), |s| s.name.clone());
        let mut branch = FlightDataBranch::new(child_id, name, Some(run.id), time);
        branch.push_sample(
            FlightSample::new(child_state.clone(), derived, child_phase)
                .with_events(vec![logged.clone()]),
        )?;
        self.branches.push(branch);

        debug!(
            parent = %run.id,
            child = %child_id,
            stage,
            t = time,
            separated_mass = child_mass.mass,
            "Stage separated"
        );

        self.work.push_back(BranchRun {
            id: child_id,
            state: child_state,
            context: child_context,
            phase: child_phase,
            queue: child_queue,
            steps: 0,
            landed: false,
            finish: None,
        });

        if parent_empty {
            run.phase = FlightPhase::StageSeparated;
        }
        fired.push(logged);
        Ok(())
    }
}
