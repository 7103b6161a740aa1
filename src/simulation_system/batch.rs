use std::sync::Arc;

use rayon::prelude::*;
use tracing::info;

use super::branch::FlightData;
use super::engine::{CancellationToken, SimulationEngine};
use super::simulation::{check_runnable, Simulation};
use crate::control::conditions::{SimulationConditions, SimulationModels, SimulationOptions};
use crate::control::structure::RocketDesign;
use crate::errors::SimulationError;

const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Seed of the `index`-th run derived from a base seed.
pub fn run_seed(base: u64, index: usize) -> u64 {
    base.wrapping_add((index as u64).wrapping_mul(SEED_STRIDE))
}

/// Runs independent simulations in parallel, without extensions.
/// Results come back in input order.
pub fn run_batch(
    simulations: &[Arc<Simulation>],
    cancel: &CancellationToken,
) -> Vec<Result<Arc<FlightData>, SimulationError>> {
    info!(simulations = simulations.len(), "Running batch");
    simulations
        .par_iter()
        .map(|simulation| simulation.simulate(Vec::new(), cancel))
        .collect()
}

/// Flies the selected configuration `runs` times with a different wind seed each
/// time. Every run is deterministic for its seed, independent of thread count.
pub fn monte_carlo(
    design: &RocketDesign,
    options: &SimulationOptions,
    models: &SimulationModels,
    runs: usize,
    cancel: &CancellationToken,
) -> Result<Vec<Result<FlightData, SimulationError>>, SimulationError> {
    let configuration = check_runnable(design, options).map_err(SimulationError::CantRun)?;
    options.validate()?;
    info!(
        design = %design.name,
        configuration = %configuration.id,
        runs,
        base_seed = options.seed,
        "Running Monte-Carlo batch"
    );

    Ok((0..runs)
        .into_par_iter()
        .map(|index| {
            let mut options = options.clone();
            options.seed = run_seed(options.seed, index);
            let conditions =
                SimulationConditions::new(options, Arc::clone(&configuration), models.clone())?;
            SimulationEngine::new(conditions, Vec::new(), cancel.clone()).run()
        })
        .collect())
}
