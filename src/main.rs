use std::sync::Arc;

use flight_simulation::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn create_demo_design() -> Result<RocketDesign, SimulationError> {
    let sustainer_motor: Arc<dyn MotorModel> = Arc::new(ThrustCurveMotor::new(
        "F40",
        vec![(0.0, 0.0), (0.1, 55.0), (0.4, 45.0), (2.0, 38.0), (2.2, 0.0)],
        0.05,
        0.04,
        0.124,
        0.029,
    )?);
    let booster_motor: Arc<dyn MotorModel> = Arc::new(ThrustCurveMotor::new(
        "G80",
        vec![(0.0, 0.0), (0.05, 110.0), (0.3, 95.0), (1.4, 80.0), (1.6, 0.0)],
        0.07,
        0.06,
        0.124,
        0.029,
    )?);

    let sustainer = Stage::new("Sustainer", 0.45, 0.42, 0.95, 0.041)
        .with_aerodynamics(AerodynamicProfile::new(0.45, 9.0, 0.78))
        .with_motor(
            MotorMount::new(sustainer_motor, 0.88)
                .with_ignition(IgnitionTrigger::Burnout, 0.5)
                .with_ejection_delay(6.0),
        );
    let booster = Stage::new("Booster", 0.25, 1.2, 0.45, 0.041)
        .with_aerodynamics(AerodynamicProfile::new(0.2, 7.0, 1.32))
        .with_motor(MotorMount::new(booster_motor, 1.3))
        .with_separation(SeparationTrigger::Burnout { delay: 0.0 });

    let configuration = FlightConfiguration::new("two-stage", vec![sustainer, booster])
        .with_recovery_device(
            RecoveryDevice::parachute("Main", 0, 0.6)
                .with_trigger(DeploymentTrigger::EjectionCharge, 0.0),
        )
        .with_recovery_device(
            RecoveryDevice::parachute("Booster streamer", 1, 0.3).with_drag_coefficient(0.4),
        );

    Ok(RocketDesign::new("Demo two-stage").with_configuration(configuration))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let design = Arc::new(create_demo_design()?);

    let mut options = SimulationOptions::for_configuration("two-stage");
    options.launch_rod = LaunchRod {
        length: 1.5,
        angle: 5f64.to_radians(),
        azimuth: 0.0,
    };
    options.wind = WindSettings::PinkNoise {
        average: 3.0,
        standard_deviation: 0.6,
        direction: 270f64.to_radians(),
    };
    options.seed = 2024;

    let simulation = Simulation::new("Demo flight", design, options);
    if let RunStatus::CantRun(reason) = simulation.status()? {
        println!("Simulation cannot run: {}", reason);
        return Ok(());
    }

    let data = simulation.simulate(Vec::new(), &CancellationToken::new())?;
    Telemetry::display_data(&data);

    if data.any_aborted() {
        println!("At least one branch was aborted.");
    }

    Ok(())
}
