use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use flight_simulation::control::environment::{gravity_at, AtmosphereModel, IsaAtmosphere};
use flight_simulation::trajectory_system::context::FlightContext;
use flight_simulation::trajectory_system::events::EventPayload;
use flight_simulation::trajectory_system::forces::{FlightForceModel, ForceMoment, ForceMomentModel};
use flight_simulation::trajectory_system::mass::{BasicMassCalculator, MassCalculator};
use flight_simulation::*;

// Helper function to create a motor with flat thrust
fn constant_motor(thrust: f64, burn_time: f64, case_mass: f64, propellant_mass: f64) -> Arc<dyn MotorModel> {
    Arc::new(ThrustCurveMotor::constant("TEST", thrust, burn_time, case_mass, propellant_mass, 0.15, 0.029).unwrap())
}

// Helper function to create a standard single-stage rocket of 1 kg without propellant mass
fn create_single_stage(drag_coefficient: f64) -> FlightConfiguration {
    let stage = Stage::new("Body", 0.9, 0.4, 1.0, 0.05)
        .with_aerodynamics(AerodynamicProfile::new(drag_coefficient, 8.0, 0.75))
        .with_motor(MotorMount::new(constant_motor(30.0, 2.0, 0.1, 0.0), 0.9));
    FlightConfiguration::new("default", vec![stage])
}

fn create_two_stage() -> FlightConfiguration {
    let sustainer = Stage::new("Sustainer", 0.5, 0.45, 1.0, 0.041)
        .with_aerodynamics(AerodynamicProfile::new(0.4, 8.0, 0.8))
        .with_motor(
            MotorMount::new(constant_motor(40.0, 1.5, 0.05, 0.04), 0.9)
                .with_ignition(IgnitionTrigger::Burnout, 0.0),
        );
    let booster = Stage::new("Booster", 0.3, 1.2, 0.4, 0.041)
        .with_aerodynamics(AerodynamicProfile::new(0.2, 6.0, 1.32))
        .with_motor(MotorMount::new(constant_motor(90.0, 1.0, 0.07, 0.06), 1.3))
        .with_separation(SeparationTrigger::Burnout { delay: 0.0 });

    FlightConfiguration::new("two-stage", vec![sustainer, booster])
        .with_recovery_device(RecoveryDevice::parachute("Main", 0, 0.5))
}

fn run_configuration(
    configuration: FlightConfiguration,
    options: SimulationOptions,
    models: SimulationModels,
    extensions: Vec<Box<dyn SimulationExtension>>,
) -> FlightData {
    let conditions = SimulationConditions::new(options, Arc::new(configuration), models).unwrap();
    SimulationEngine::new(conditions, extensions, CancellationToken::new())
        .run()
        .unwrap()
}

fn apogee_of(data: &FlightData) -> f64 {
    data.main_branch().unwrap().max_altitude()
}

#[test]
fn test_vertical_flight_without_drag_matches_closed_form() {
    println!("INTEGRATION TEST: Vertical flight without drag");

    let options = SimulationOptions::default();
    let g = gravity_at(options.launch_site.latitude, options.launch_site.altitude);
    let data = run_configuration(create_single_stage(0.0), options, SimulationModels::default(), Vec::new());

    // Constant 1 kg, 30 N for 2 s, then ballistic coast
    let acceleration = 30.0 / 1.0 - g;
    let burnout_velocity = acceleration * 2.0;
    let expected = 0.5 * acceleration * 4.0 + burnout_velocity * burnout_velocity / (2.0 * g);
    let apogee = apogee_of(&data);
    println!("Apogee: {:.2} m, closed form: {:.2} m", apogee, expected);

    assert_relative_eq!(apogee, expected, max_relative = 0.01);

    let branch = data.main_branch().unwrap();
    let apogee_time = branch.first_event(FlightEventType::Apogee).unwrap().time;
    assert_relative_eq!(apogee_time, 2.0 + burnout_velocity / g, max_relative = 0.01);
    assert_eq!(
        branch.status(),
        &BranchStatus::Landed,
        "Rocket should land after a ballistic descent"
    );
    assert!(
        data.warnings.contains_kind(&Warning::NoRecoveryDevice),
        "A rocket without recovery devices should be flagged"
    );
}

#[test]
fn test_vertical_flight_with_drag_matches_closed_form() {
    println!("INTEGRATION TEST: Vertical flight with quadratic drag");

    let options = SimulationOptions::default();
    let g = gravity_at(options.launch_site.latitude, options.launch_site.altitude);
    let density = IsaAtmosphere::standard().conditions(options.launch_site.altitude).density;
    let drag_coefficient = 0.75;
    let area = std::f64::consts::PI * 0.025 * 0.025;
    let k = 0.5 * density * drag_coefficient * area;
    let mass = 1.0;

    // Powered: v = vt tanh(k vt t / m), h = m/k ln cosh(k vt t / m)
    let terminal = ((30.0 - mass * g) / k).sqrt();
    let x = k * terminal * 2.0 / mass;
    let burnout_velocity = terminal * x.tanh();
    let burnout_altitude = mass / k * x.cosh().ln();
    // Coast: h = m / (2k) ln(1 + k v² / (m g))
    let coast = mass / (2.0 * k) * (1.0 + k * burnout_velocity * burnout_velocity / (mass * g)).ln();
    let expected = burnout_altitude + coast;

    let data = run_configuration(
        create_single_stage(drag_coefficient),
        options,
        SimulationModels::default(),
        Vec::new(),
    );
    let apogee = apogee_of(&data);
    println!("Apogee: {:.2} m, closed form: {:.2} m", apogee, expected);

    assert_relative_eq!(apogee, expected, max_relative = 0.05);
}

#[test]
fn test_halving_time_step_converges() {
    println!("INTEGRATION TEST: Time step convergence");

    let apogees: Vec<f64> = [0.05, 0.025, 0.0125]
        .iter()
        .map(|&dt| {
            let mut options = SimulationOptions::default();
            options.time_step = dt;
            let apogee = apogee_of(&run_configuration(
                create_single_stage(0.75),
                options,
                SimulationModels::default(),
                Vec::new(),
            ));
            println!("dt = {:.4}s | Apogee: {:.4} m", dt, apogee);
            apogee
        })
        .collect();

    let coarse = (apogees[0] - apogees[1]).abs();
    let fine = (apogees[1] - apogees[2]).abs();
    assert!(coarse < 0.5, "Halving dt from 0.05 s changed apogee by {} m", coarse);
    assert!(fine < 0.25, "Halving dt from 0.025 s changed apogee by {} m", fine);
}

#[test]
fn test_euler_stepper_agrees_with_rk4() {
    println!("INTEGRATION TEST: Euler stepper");

    let mut options = SimulationOptions::default();
    options.time_step = 0.005;
    let rk4 = apogee_of(&run_configuration(
        create_single_stage(0.75),
        options.clone(),
        SimulationModels::default(),
        Vec::new(),
    ));
    let euler = apogee_of(&run_configuration(
        create_single_stage(0.75),
        options,
        SimulationModels::default().with_stepper(Arc::new(EulerStepper)),
        Vec::new(),
    ));
    println!("RK4 apogee: {:.3} m | Euler apogee: {:.3} m", rk4, euler);

    assert_relative_eq!(euler, rk4, max_relative = 0.02);
}

#[test]
fn test_identical_runs_are_bit_identical() {
    println!("INTEGRATION TEST: Determinism");

    let mut options = SimulationOptions::for_configuration("two-stage");
    options.wind = WindSettings::PinkNoise {
        average: 4.0,
        standard_deviation: 1.0,
        direction: 1.2,
    };
    options.seed = 99;
    options.launch_rod.angle = 0.08;

    let first = run_configuration(create_two_stage(), options.clone(), SimulationModels::default(), Vec::new());
    let second = run_configuration(create_two_stage(), options.clone(), SimulationModels::default(), Vec::new());
    assert_eq!(first, second, "Identical inputs must produce identical output");

    let design = Arc::new(RocketDesign::new("Twins").with_configuration(create_two_stage()));
    let simulations: Vec<Arc<Simulation>> = (0..4)
        .map(|i| Arc::new(Simulation::new(format!("Run {}", i), Arc::clone(&design), options.clone())))
        .collect();
    let results = run_batch(&simulations, &CancellationToken::new());

    let reference = results[0].as_ref().unwrap();
    for result in &results {
        let data = result.as_ref().unwrap();
        assert_eq!(data.branches, reference.branches, "Parallel runs must not interfere");
    }
    assert_eq!(reference.branches, first.branches);
}

#[test]
fn test_events_are_bracketed_by_their_step() {
    println!("INTEGRATION TEST: Event bracketing");

    let mut options = SimulationOptions::default();
    options.launch_rod.angle = 0.1;
    let tie = options.events.tie_tolerance;
    let data = run_configuration(create_single_stage(0.5), options, SimulationModels::default(), Vec::new());
    let branch = data.main_branch().unwrap();
    let samples = branch.samples();

    for (index, sample) in samples.iter().enumerate().skip(1) {
        for event in &sample.events {
            let previous = samples[index - 1].time;
            assert!(
                event.time >= previous - tie && event.time <= sample.time + tie,
                "{} should lie within the step [{}, {}]",
                event,
                previous,
                sample.time
            );
        }
    }

    let apogee = branch.first_event(FlightEventType::Apogee).unwrap();
    let sample = branch.sample_at(apogee.time).unwrap();
    assert_abs_diff_eq!(sample.time, apogee.time);
    assert!(
        sample.state.velocity.z.abs() < 0.05,
        "Vertical velocity at apogee should be within tolerance, got {}",
        sample.state.velocity.z
    );

    let ground = branch.first_event(FlightEventType::GroundHit).unwrap();
    let last = branch.last_sample().unwrap();
    assert_eq!(last.time, ground.time, "Nothing is appended after ground hit");
    assert_abs_diff_eq!(last.state.altitude(), 0.0, epsilon = 1e-2);
}

#[test]
fn test_stage_separation_spawns_one_branch() {
    println!("INTEGRATION TEST: Stage separation");

    let configuration = Arc::new(create_two_stage());
    let data = run_configuration(
        (*configuration).clone(),
        SimulationOptions::for_configuration("two-stage"),
        SimulationModels::default(),
        Vec::new(),
    );

    assert_eq!(data.branch_count(), 2, "Separation should produce exactly one child");
    let parent = data.main_branch().unwrap();
    let child = data.branch(BranchId(1)).unwrap();
    assert_eq!(child.parent, Some(parent.id));
    assert_eq!(child.name, "Booster");

    let separation = parent.first_event(FlightEventType::StageSeparation).unwrap();
    let (child_id, separated_mass) = match separation.payload {
        EventPayload::Separation { child, separated_mass } => (child, separated_mass),
        ref other => panic!("Separation event without payload: {:?}", other),
    };
    assert_eq!(child_id, child.id);
    assert_eq!(child.spawn_time, separation.time);
    println!(
        "Separation at t={:.3}s, separated mass {:.3} kg",
        separation.time, separated_mass
    );

    let parent_sample = parent.sample_at(separation.time).unwrap();
    let child_sample = &child.samples()[0];
    assert_eq!(parent_sample.time, separation.time);
    assert_eq!(child_sample.time, separation.time);
    assert_eq!(child_sample.state.position, parent_sample.state.position);
    assert_eq!(child_sample.state.velocity, parent_sample.state.velocity);
    assert_eq!(child_sample.state.orientation, parent_sample.state.orientation);
    assert_eq!(
        child.events()[0].kind,
        FlightEventType::StageSeparation,
        "The child's log starts with the separation"
    );

    // Full stack at the separation instant: booster burnt out, sustainer just lit
    let mut context = FlightContext::new(Arc::clone(&configuration));
    for motor in &mut context.motors {
        if motor.id.stage == 1 {
            motor.ignition_time = Some(0.0);
            motor.burned_out = true;
        } else {
            motor.ignition_time = Some(separation.time);
        }
    }
    let full = BasicMassCalculator
        .mass_properties(&context, separation.time)
        .unwrap()
        .mass;
    assert_abs_diff_eq!(child_sample.state.mass, separated_mass, epsilon = 1e-12);
    assert_abs_diff_eq!(full - parent_sample.state.mass, separated_mass, epsilon = 1e-9);

    assert_eq!(parent.status(), &BranchStatus::Landed);
    assert_eq!(child.status(), &BranchStatus::Landed);
    assert!(parent.max_altitude() > child.max_altitude());
}

#[test]
fn test_configuration_without_usable_motor_cant_run() {
    println!("INTEGRATION TEST: Expired motor");

    let mut configuration = create_single_stage(0.5);
    configuration.stages[0].motors[0].ignition = IgnitionTrigger::Never;
    let design = Arc::new(RocketDesign::new("Grounded").with_configuration(configuration));
    let simulation = Simulation::new("Grounded", design, SimulationOptions::default());

    assert_eq!(
        simulation.status().unwrap(),
        RunStatus::CantRun(CantRunReason::NoMotors)
    );
    assert!(matches!(
        simulation.simulate(Vec::new(), &CancellationToken::new()),
        Err(SimulationError::CantRun(CantRunReason::NoMotors))
    ));
    assert!(
        simulation.results().unwrap().is_none(),
        "A refused run must not produce any branch"
    );
}

struct CancelAfter {
    steps: usize,
    seen: usize,
    token: CancellationToken,
}

impl SimulationExtension for CancelAfter {
    fn name(&self) -> &str {
        "cancel-after"
    }

    fn post_step(&mut self, _hook: &mut HookContext<'_>) -> Result<(), SimulationError> {
        self.seen += 1;
        if self.seen == self.steps {
            self.token.cancel();
        }
        Ok(())
    }
}

#[test]
fn test_cancellation_keeps_partial_data() {
    println!("INTEGRATION TEST: Cancellation");

    let token = CancellationToken::new();
    let conditions = SimulationConditions::new(
        SimulationOptions::default(),
        Arc::new(create_single_stage(0.5)),
        SimulationModels::default(),
    )
    .unwrap();
    let extension = CancelAfter {
        steps: 25,
        seen: 0,
        token: token.clone(),
    };
    let data = SimulationEngine::new(conditions, vec![Box::new(extension)], token)
        .run()
        .unwrap();

    let branch = data.main_branch().unwrap();
    assert_eq!(branch.status(), &BranchStatus::Aborted(AbortCause::Cancelled));
    assert_eq!(branch.phase(), FlightPhase::Aborted);
    assert_eq!(branch.len(), 26, "Initial sample plus one per completed step");
    assert_eq!(
        branch.events().last().map(|e| e.kind),
        Some(FlightEventType::SimAbort)
    );
}

#[derive(Debug)]
struct NanAfter {
    time: f64,
}

impl ForceMomentModel for NanAfter {
    fn evaluate(
        &self,
        state: &RigidBodyState,
        context: &FlightContext,
        conditions: &SimulationConditions,
    ) -> Result<ForceMoment, SimulationError> {
        let mut load = FlightForceModel.evaluate(state, context, conditions)?;
        if state.time > self.time {
            load.force.x = f64::NAN;
        }
        Ok(load)
    }
}

#[derive(Debug)]
struct FailingMotor;

impl MotorModel for FailingMotor {
    fn designation(&self) -> &str {
        "FAIL"
    }

    fn thrust(&self, time_since_ignition: f64) -> Result<f64, SimulationError> {
        if time_since_ignition > 0.5 {
            Err(SimulationError::collaborator("motor FAIL", "thrust table missing"))
        } else {
            Ok(40.0)
        }
    }

    fn mass(&self, _time_since_ignition: f64) -> Result<f64, SimulationError> {
        Ok(0.1)
    }

    fn burn_time(&self) -> f64 {
        2.0
    }

    fn total_impulse(&self) -> f64 {
        80.0
    }

    fn length(&self) -> f64 {
        0.15
    }

    fn diameter(&self) -> f64 {
        0.029
    }
}

#[test]
fn test_failures_abort_only_the_branch() {
    println!("INTEGRATION TEST: Non-finite state and collaborator failure");

    let data = run_configuration(
        create_single_stage(0.5),
        SimulationOptions::default(),
        SimulationModels::default().with_force_model(Arc::new(NanAfter { time: 1.0 })),
        Vec::new(),
    );
    let branch = data.main_branch().unwrap();
    assert!(
        matches!(branch.status(), BranchStatus::Aborted(AbortCause::NonFiniteState(_))),
        "NaN state should abort, got {:?}",
        branch.status()
    );
    assert!(branch.len() > 1, "Partial data must be retained");
    assert!(branch.samples().iter().all(|s| s.state.check_finite().is_ok()));
    assert!(branch.last_sample().unwrap().time <= 1.0 + 1e-9);

    let mut configuration = create_single_stage(0.5);
    configuration.stages[0].motors[0].motor = Arc::new(FailingMotor);
    let data = run_configuration(configuration, SimulationOptions::default(), SimulationModels::default(), Vec::new());
    let branch = data.main_branch().unwrap();
    assert!(
        matches!(branch.status(), BranchStatus::Aborted(AbortCause::CollaboratorFailure(_))),
        "Motor failure should abort, got {:?}",
        branch.status()
    );
    assert!(branch.len() > 1);
    assert!(data.any_aborted());
}

struct Blocker {
    started: mpsc::Sender<()>,
    resume: Mutex<mpsc::Receiver<()>>,
    waited: bool,
}

impl SimulationExtension for Blocker {
    fn name(&self) -> &str {
        "blocker"
    }

    fn pre_step(&mut self, _hook: &mut HookContext<'_>) -> Result<(), SimulationError> {
        if !self.waited {
            self.waited = true;
            let _ = self.started.send(());
            let _ = self.resume.lock().unwrap().recv();
        }
        Ok(())
    }
}

#[test]
fn test_running_simulation_reports_busy() {
    println!("INTEGRATION TEST: Exclusion lock");

    let design = Arc::new(RocketDesign::new("Locked").with_configuration(create_single_stage(0.5)));
    let simulation = Arc::new(Simulation::new("Locked", design, SimulationOptions::default()));
    let (started_tx, started_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel();

    let runner = {
        let simulation = Arc::clone(&simulation);
        thread::spawn(move || {
            let blocker = Blocker {
                started: started_tx,
                resume: Mutex::new(resume_rx),
                waited: false,
            };
            simulation.simulate(vec![Box::new(blocker)], &CancellationToken::new())
        })
    };

    started_rx.recv().unwrap();
    assert!(matches!(simulation.status(), Err(SimulationError::Busy(_))));
    assert!(matches!(
        simulation.simulate(Vec::new(), &CancellationToken::new()),
        Err(SimulationError::Busy(_))
    ));
    assert!(matches!(
        simulation.set_options(SimulationOptions::default()),
        Err(SimulationError::Busy(_))
    ));

    resume_tx.send(()).unwrap();
    let data = runner.join().unwrap().unwrap();
    assert_eq!(data.branch_count(), 1);
    assert_eq!(simulation.status().unwrap(), RunStatus::UpToDate);
}

#[test]
fn test_parachute_descent_rate() {
    println!("INTEGRATION TEST: Parachute descent");

    let configuration = create_single_stage(0.5).with_recovery_device(RecoveryDevice::parachute("Main", 0, 0.6));
    let body_drag_area = 0.5 * std::f64::consts::PI * 0.025 * 0.025;
    let chute_drag_area = configuration.recovery_devices[0].drag_area();
    let options = SimulationOptions::default();
    let g = gravity_at(options.launch_site.latitude, options.launch_site.altitude);
    let density = IsaAtmosphere::standard().conditions(options.launch_site.altitude).density;

    let data = run_configuration(configuration, options, SimulationModels::default(), Vec::new());
    let branch = data.main_branch().unwrap();
    let deployment = branch.first_event(FlightEventType::RecoveryDeviceDeployment).unwrap();
    let apogee = branch.first_event(FlightEventType::Apogee).unwrap();
    assert_abs_diff_eq!(deployment.time, apogee.time);

    let expected = (2.0 * 1.0 * g / (density * (body_drag_area + chute_drag_area))).sqrt();
    let landing = branch.last_sample().unwrap();
    println!(
        "Descent rate: {:.2} m/s, expected: {:.2} m/s",
        -landing.state.velocity.z, expected
    );
    assert_relative_eq!(-landing.state.velocity.z, expected, max_relative = 0.03);
    assert_eq!(branch.phase(), FlightPhase::Landed);
}

struct VetoDeployment {
    vetoed: Arc<Mutex<usize>>,
}

impl SimulationExtension for VetoDeployment {
    fn name(&self) -> &str {
        "veto-deployment"
    }

    fn handle_event(&mut self, event: &FlightEvent, _hook: &mut HookContext<'_>) -> Result<bool, SimulationError> {
        if event.kind == FlightEventType::RecoveryDeviceDeployment {
            *self.vetoed.lock().unwrap() += 1;
            return Ok(false);
        }
        Ok(true)
    }
}

struct LowDeploy {
    altitude: f64,
}

impl SimulationExtension for LowDeploy {
    fn name(&self) -> &str {
        "low-deploy"
    }

    fn post_step(&mut self, hook: &mut HookContext<'_>) -> Result<(), SimulationError> {
        if hook.state.velocity.z < 0.0 && hook.state.altitude() < self.altitude && !hook.flight.is_deployed(0) {
            hook.deploy_recovery(0);
        }
        Ok(())
    }
}

#[test]
fn test_extensions_veto_and_deploy() {
    println!("INTEGRATION TEST: Extension veto and custom deployment");

    let vetoed = Arc::new(Mutex::new(0));
    let data = run_configuration(
        create_single_stage(0.5).with_recovery_device(RecoveryDevice::parachute("Main", 0, 0.6)),
        SimulationOptions::default(),
        SimulationModels::default(),
        vec![Box::new(VetoDeployment { vetoed: Arc::clone(&vetoed) })],
    );
    let branch = data.main_branch().unwrap();
    assert_eq!(*vetoed.lock().unwrap(), 1, "Apogee deployment should be offered once");
    assert!(branch.first_event(FlightEventType::RecoveryDeviceDeployment).is_none());
    assert!(
        branch.last_sample().unwrap().state.speed() > 20.0,
        "Without a parachute the rocket should land fast"
    );

    let configuration = create_single_stage(0.5).with_recovery_device(
        RecoveryDevice::parachute("Main", 0, 0.6).with_trigger(DeploymentTrigger::Never, 0.0),
    );
    let data = run_configuration(
        configuration,
        SimulationOptions::default(),
        SimulationModels::default(),
        vec![Box::new(LowDeploy { altitude: 50.0 })],
    );
    let branch = data.main_branch().unwrap();
    let deployment = branch.first_event(FlightEventType::RecoveryDeviceDeployment).unwrap();
    let sample = branch.sample_at(deployment.time).unwrap();
    println!(
        "Deployed at t={:.2}s, altitude {:.2} m",
        deployment.time,
        sample.state.altitude()
    );
    assert!(sample.state.altitude() < 50.0);
    assert!(sample.state.altitude() > 40.0);
    assert_eq!(branch.status(), &BranchStatus::Landed);
}

#[test]
fn test_monte_carlo_runs_are_independent() {
    println!("INTEGRATION TEST: Monte-Carlo wind variation");

    let design = RocketDesign::new("Dispersion").with_configuration(
        create_single_stage(0.5).with_recovery_device(RecoveryDevice::parachute("Main", 0, 0.6)),
    );
    let mut options = SimulationOptions::default();
    options.wind = WindSettings::PinkNoise {
        average: 5.0,
        standard_deviation: 1.5,
        direction: 0.0,
    };
    options.seed = 11;

    let runs = monte_carlo(&design, &options, &SimulationModels::default(), 4, &CancellationToken::new()).unwrap();
    let landings: Vec<(f64, f64)> = runs
        .iter()
        .map(|run| {
            let state = &run.as_ref().unwrap().main_branch().unwrap().last_sample().unwrap().state;
            (state.position.x, state.position.y)
        })
        .collect();
    for (i, (x, y)) in landings.iter().enumerate() {
        println!("Run {} landed at x = {:.2} m, y = {:.2} m", i, x, y);
        // Wind from the north pushes the rocket south
        assert!(*y < 0.0, "Run {} should drift downwind", i);
    }
    assert_ne!(landings[0], landings[1], "Different seeds should disperse the landing point");
}

#[test]
fn test_turbulence_does_not_depend_on_max_time() {
    println!("INTEGRATION TEST: Turbulence independent of the end time");

    let run = |max_time: f64| {
        let mut options = SimulationOptions::default();
        options.wind = WindSettings::PinkNoise {
            average: 4.0,
            standard_deviation: 1.0,
            direction: 0.0,
        };
        options.seed = 7;
        options.end.max_time = max_time;
        run_configuration(
            create_single_stage(0.5).with_recovery_device(RecoveryDevice::parachute("Main", 0, 0.6)),
            options,
            SimulationModels::default(),
            Vec::new(),
        )
    };
    let short = run(5.0);
    let long = run(1200.0);

    let short_branch = short.main_branch().unwrap();
    let long_branch = long.main_branch().unwrap();
    assert_eq!(short_branch.status(), &BranchStatus::EndReached);
    assert_eq!(long_branch.status(), &BranchStatus::Landed);

    let compared = short_branch
        .samples()
        .iter()
        .take_while(|s| s.time < 4.9)
        .zip(long_branch.samples())
        .map(|(a, b)| assert_eq!(a, b, "Samples diverged at t={}", a.time))
        .count();
    println!("Compared {} samples", compared);
    assert!(compared > 50);
}

struct ChildBreaker {
    steps: usize,
}

impl SimulationExtension for ChildBreaker {
    fn name(&self) -> &str {
        "child-breaker"
    }

    fn post_step(&mut self, hook: &mut HookContext<'_>) -> Result<(), SimulationError> {
        if hook.branch != BranchId(1) {
            return Ok(());
        }
        self.steps += 1;
        if self.steps >= 5 {
            return Err(SimulationError::collaborator("recorder", "buffer full"));
        }
        Ok(())
    }
}

#[test]
fn test_failing_branch_leaves_siblings_alone() {
    println!("INTEGRATION TEST: Branch isolation");

    let data = run_configuration(
        create_two_stage(),
        SimulationOptions::for_configuration("two-stage"),
        SimulationModels::default(),
        vec![Box::new(ChildBreaker { steps: 0 })],
    );
    assert_eq!(data.branch_count(), 2);

    let parent = data.main_branch().unwrap();
    let child = data.branch(BranchId(1)).unwrap();
    assert_eq!(parent.status(), &BranchStatus::Landed, "The sustainer must fly on");
    assert!(
        matches!(
            child.status(),
            BranchStatus::Aborted(AbortCause::ExtensionFailure { name, .. }) if name == "child-breaker"
        ),
        "Child should abort on the extension failure, got {:?}",
        child.status()
    );
    assert_eq!(child.len(), 6, "Separation sample plus five steps are kept");
    assert_eq!(child.phase(), FlightPhase::Aborted);
    assert!(parent.first_event(FlightEventType::GroundHit).is_some());
}

#[test]
fn test_separating_the_last_stage_ends_the_parent() {
    println!("INTEGRATION TEST: Separation of the only stage");

    let stage = Stage::new("Body", 0.9, 0.4, 1.0, 0.05)
        .with_aerodynamics(AerodynamicProfile::new(0.5, 8.0, 0.75))
        .with_motor(MotorMount::new(constant_motor(30.0, 2.0, 0.1, 0.0), 0.9))
        .with_separation(SeparationTrigger::Burnout { delay: 0.5 });
    let configuration = FlightConfiguration::new("default", vec![stage]);
    let data = run_configuration(configuration, SimulationOptions::default(), SimulationModels::default(), Vec::new());

    assert_eq!(data.branch_count(), 2, "Exactly one child takes over the body");
    let parent = data.main_branch().unwrap();
    let child = data.branch(BranchId(1)).unwrap();

    assert_eq!(parent.status(), &BranchStatus::Separated);
    assert_eq!(parent.phase(), FlightPhase::StageSeparated);
    assert!(parent.is_frozen());

    let separation = parent.first_event(FlightEventType::StageSeparation).unwrap();
    assert_relative_eq!(separation.time, 2.5, max_relative = 1e-9);
    let last = parent.last_sample().unwrap();
    assert!(
        last.time <= separation.time,
        "Parent sample at t={} after separation at t={}",
        last.time,
        separation.time
    );
    assert!(last.events.iter().any(|e| e.kind == FlightEventType::StageSeparation));

    // Event, spawn and first sample share one timestamp
    assert_eq!(child.spawn_time, separation.time);
    assert_eq!(child.samples()[0].time, separation.time);
    assert_eq!(child.parent, Some(parent.id));
    assert_eq!(child.status(), &BranchStatus::Landed);
}

#[test]
fn test_time_since_ignition_separation() {
    println!("INTEGRATION TEST: Separation on time since ignition");

    let mut configuration = create_two_stage();
    configuration.stages[1].separation = SeparationTrigger::TimeSinceIgnition(0.6);
    let data = run_configuration(
        configuration,
        SimulationOptions::for_configuration("two-stage"),
        SimulationModels::default(),
        Vec::new(),
    );

    assert_eq!(data.branch_count(), 2);
    let parent = data.main_branch().unwrap();
    let child = data.branch(BranchId(1)).unwrap();
    let separation = parent.first_event(FlightEventType::StageSeparation).unwrap();
    assert_relative_eq!(separation.time, 0.6, max_relative = 1e-9);

    // The booster still burns, so its burnout belongs to the child
    assert_eq!(child.samples()[0].phase, FlightPhase::PoweredAscent);
    let burnout = child.first_event(FlightEventType::Burnout).unwrap();
    assert_relative_eq!(burnout.time, 1.0, max_relative = 1e-9);
    assert!(parent.first_event(FlightEventType::Burnout).is_none());
}

fn create_tumbling_booster(separation: SeparationTrigger) -> FlightConfiguration {
    let sustainer = Stage::new("Sustainer", 0.5, 0.45, 1.0, 0.041)
        .with_aerodynamics(AerodynamicProfile::new(0.4, 8.0, 1.0))
        .with_motor(
            MotorMount::new(constant_motor(40.0, 1.5, 0.05, 0.04), 0.9)
                .with_ignition(IgnitionTrigger::Burnout, 0.0),
        );
    // No normal force: the booster has no centre of pressure of its own
    let booster = Stage::new("Booster", 0.3, 1.2, 0.4, 0.041)
        .with_aerodynamics(AerodynamicProfile::drag_only(0.2))
        .with_motor(MotorMount::new(constant_motor(90.0, 1.0, 0.07, 0.06), 1.3))
        .with_separation(separation);

    FlightConfiguration::new("two-stage", vec![sustainer, booster])
        .with_recovery_device(RecoveryDevice::parachute("Main", 0, 0.5))
}

#[test]
fn test_unstable_child_tumbles() {
    println!("INTEGRATION TEST: Tumbling booster");

    let data = run_configuration(
        create_tumbling_booster(SeparationTrigger::Burnout { delay: 0.0 }),
        SimulationOptions::for_configuration("two-stage"),
        SimulationModels::default(),
        Vec::new(),
    );
    let child = data.branch(BranchId(1)).unwrap();

    let tumble = child.first_event(FlightEventType::Tumble).unwrap();
    assert_eq!(tumble.time, child.spawn_time);
    assert!(child.samples().iter().any(|s| s.phase == FlightPhase::Tumbling));
    assert_eq!(child.status(), &BranchStatus::Landed);
    assert_eq!(data.main_branch().unwrap().status(), &BranchStatus::Landed);
}

#[test]
fn test_tumble_under_thrust_aborts() {
    println!("INTEGRATION TEST: Tumble under thrust");

    let data = run_configuration(
        create_tumbling_booster(SeparationTrigger::TimeSinceIgnition(0.5)),
        SimulationOptions::for_configuration("two-stage"),
        SimulationModels::default(),
        Vec::new(),
    );
    let child = data.branch(BranchId(1)).unwrap();

    assert_eq!(child.status(), &BranchStatus::Aborted(AbortCause::TumbleUnderThrust));
    let kinds: Vec<FlightEventType> = child.events().iter().map(|e| e.kind).collect();
    assert_eq!(
        &kinds[kinds.len() - 2..],
        &[FlightEventType::Tumble, FlightEventType::SimAbort],
        "The tumble is logged before the abort"
    );
    assert!(!child.is_empty(), "Partial data must be retained");
    assert_eq!(data.main_branch().unwrap().status(), &BranchStatus::Landed);
}

#[test]
fn test_deployment_under_thrust_aborts() {
    println!("INTEGRATION TEST: Deployment under thrust");

    let configuration = create_single_stage(0.5).with_recovery_device(
        RecoveryDevice::parachute("Main", 0, 0.6).with_trigger(DeploymentTrigger::Time(0.5), 0.0),
    );
    let data = run_configuration(configuration, SimulationOptions::default(), SimulationModels::default(), Vec::new());
    let branch = data.main_branch().unwrap();

    assert_eq!(branch.status(), &BranchStatus::Aborted(AbortCause::DeployUnderThrust));
    let deployment = branch.first_event(FlightEventType::RecoveryDeviceDeployment).unwrap();
    assert_relative_eq!(deployment.time, 0.5, max_relative = 1e-9);
    assert_eq!(branch.events().last().map(|e| e.kind), Some(FlightEventType::SimAbort));
    assert!(branch.last_sample().unwrap().time <= 0.5 + 1e-9);
}

#[test]
fn test_burnout_without_liftoff_aborts() {
    println!("INTEGRATION TEST: Motor too weak to lift off");

    let stage = Stage::new("Body", 0.9, 0.4, 1.0, 0.05)
        .with_aerodynamics(AerodynamicProfile::new(0.5, 8.0, 0.75))
        .with_motor(MotorMount::new(constant_motor(5.0, 2.0, 0.1, 0.0), 0.9));
    let configuration = FlightConfiguration::new("default", vec![stage]);
    let data = run_configuration(configuration, SimulationOptions::default(), SimulationModels::default(), Vec::new());
    let branch = data.main_branch().unwrap();

    assert_eq!(branch.status(), &BranchStatus::Aborted(AbortCause::NoLiftoff));
    assert!(branch.first_event(FlightEventType::Liftoff).is_none());
    let kinds: Vec<FlightEventType> = branch.events().iter().map(|e| e.kind).collect();
    assert_eq!(
        &kinds[kinds.len() - 2..],
        &[FlightEventType::Burnout, FlightEventType::SimAbort]
    );
    assert!(
        branch.samples().iter().all(|s| s.state.altitude() == 0.0),
        "The rocket must stay on the pad"
    );
}

#[test]
fn test_descent_velocity_deployment() {
    println!("INTEGRATION TEST: Deployment on descent rate");

    let configuration = create_single_stage(0.5).with_recovery_device(
        RecoveryDevice::parachute("Main", 0, 0.6)
            .with_trigger(DeploymentTrigger::DescentVelocity(15.0), 0.0),
    );
    let data = run_configuration(configuration, SimulationOptions::default(), SimulationModels::default(), Vec::new());
    let branch = data.main_branch().unwrap();

    let apogee = branch.first_event(FlightEventType::Apogee).unwrap();
    let deployment = branch.first_event(FlightEventType::RecoveryDeviceDeployment).unwrap();
    assert!(deployment.time > apogee.time);

    let sample = branch.sample_at(deployment.time).unwrap();
    println!(
        "Deployed at t={:.2}s, descending at {:.3} m/s",
        deployment.time, -sample.state.velocity.z
    );
    assert_abs_diff_eq!(-sample.state.velocity.z, 15.0, epsilon = 0.05);
    assert_eq!(branch.status(), &BranchStatus::Landed);
}
