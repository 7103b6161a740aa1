use std::fmt::Debug;
use std::sync::Mutex;

use nalgebra::Vector3;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

/// Sampling interval of turbulence tables.
pub const WIND_TABLE_INTERVAL: f64 = 0.05; // s
/// Samples generated each time a turbulence table has to grow.
pub const WIND_CHUNK_SAMPLES: usize = 256;
/// Lookups past this sample hold the last value (about 58 hours).
pub const MAX_WIND_SAMPLES: usize = 1 << 22;

const SEED_STREAM_STEP: u64 = 0x9E37_79B9_7F4A_7C15;

/// Wind velocity in the world frame as a function of time and altitude above the launch site.
pub trait WindModel: Send + Sync + Debug {
    fn velocity(&self, time: f64, altitude: f64) -> Vector3<f64>;
}

/// `direction` is the azimuth the wind blows from (0 = from north, π/2 = from east).
pub fn wind_vector(speed: f64, direction: f64) -> Vector3<f64> {
    Vector3::new(-speed * direction.sin(), -speed * direction.cos(), 0.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantWind {
    velocity: Vector3<f64>,
}

impl ConstantWind {
    pub fn new(speed: f64, direction: f64) -> Self {
        ConstantWind {
            velocity: wind_vector(speed, direction),
        }
    }

    pub fn calm() -> Self {
        ConstantWind {
            velocity: Vector3::zeros(),
        }
    }
}

impl WindModel for ConstantWind {
    fn velocity(&self, _time: f64, _altitude: f64) -> Vector3<f64> {
        self.velocity
    }
}

/// Turbulent wind whose speed follows a pink-noise process around an average.
///
/// Speeds are generated from the seed in fixed chunks as later times are
/// looked up, so the value at a given time depends only on the seed and never
/// on how long the run is allowed to last.
#[derive(Debug)]
pub struct PinkNoiseWind {
    average: f64,
    standard_deviation: f64,
    direction: f64,
    seed: u64,
    table: Option<Mutex<PinkNoiseTable>>,
}

impl PinkNoiseWind {
    pub fn new(average: f64, standard_deviation: f64, direction: f64, seed: u64) -> Self {
        let table = (standard_deviation > 0.0).then(|| {
            Mutex::new(PinkNoiseTable::new(average, standard_deviation, seed))
        });

        PinkNoiseWind {
            average,
            standard_deviation,
            direction,
            seed,
            table,
        }
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn standard_deviation(&self) -> f64 {
        self.standard_deviation
    }

    pub fn speed_at(&self, time: f64) -> f64 {
        let Some(table) = &self.table else {
            return self.average;
        };

        let position = (time.max(0.0) / WIND_TABLE_INTERVAL).min(MAX_WIND_SAMPLES as f64);
        let index = position.floor() as usize;
        let fraction = position - index as f64;

        let mut table = match table.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.extend_to(index + 1);
        let (a, b) = (table.speeds[index], table.speeds[index + 1]);
        a + (b - a) * fraction
    }
}

impl Clone for PinkNoiseWind {
    fn clone(&self) -> Self {
        let table = self.table.as_ref().map(|table| {
            let table = match table.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            Mutex::new(table)
        });

        PinkNoiseWind {
            average: self.average,
            standard_deviation: self.standard_deviation,
            direction: self.direction,
            seed: self.seed,
            table,
        }
    }
}

// The generated table is a pure function of these, so it takes no part in equality.
impl PartialEq for PinkNoiseWind {
    fn eq(&self, other: &Self) -> bool {
        self.average == other.average
            && self.standard_deviation == other.standard_deviation
            && self.direction == other.direction
            && self.seed == other.seed
    }
}

impl WindModel for PinkNoiseWind {
    fn velocity(&self, time: f64, _altitude: f64) -> Vector3<f64> {
        wind_vector(self.speed_at(time), self.direction)
    }
}

// Paul Kellet's economy pink filter over gaussian white noise.
const KELLET_POLES: [f64; 3] = [0.99765, 0.96300, 0.57000];
const KELLET_GAINS: [f64; 3] = [0.099_046_0, 0.296_516_4, 1.052_691_3];
const KELLET_DIRECT: f64 = 0.1848;

/// Stationary variance of the filter output for unit white noise.
fn kellet_variance() -> f64 {
    let impulse = KELLET_GAINS.iter().sum::<f64>() + KELLET_DIRECT;
    let mut variance = impulse * impulse;
    for (pole_i, gain_i) in KELLET_POLES.iter().zip(KELLET_GAINS.iter()) {
        for (pole_j, gain_j) in KELLET_POLES.iter().zip(KELLET_GAINS.iter()) {
            let pole = pole_i * pole_j;
            variance += gain_i * gain_j * pole / (1.0 - pole);
        }
    }
    variance
}

#[derive(Debug, Clone)]
struct PinkNoiseTable {
    rng: Pcg64,
    filter: [f64; 3],
    average: f64,
    scale: f64,
    speeds: Vec<f64>,
}

impl PinkNoiseTable {
    fn new(average: f64, standard_deviation: f64, seed: u64) -> Self {
        PinkNoiseTable {
            rng: Pcg64::seed_from_u64(seed),
            filter: [0.0; 3],
            average,
            scale: standard_deviation / kellet_variance().sqrt(),
            speeds: Vec::new(),
        }
    }

    fn extend_to(&mut self, index: usize) {
        while self.speeds.len() <= index {
            for _ in 0..WIND_CHUNK_SAMPLES {
                let white: f64 = StandardNormal.sample(&mut self.rng);
                let mut pink = white * KELLET_DIRECT;
                for ((b, pole), gain) in self.filter.iter_mut().zip(KELLET_POLES).zip(KELLET_GAINS) {
                    *b = pole * *b + white * gain;
                    pink += *b;
                }
                self.speeds.push(self.average + pink * self.scale);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindLevel {
    pub altitude: f64,
    pub model: PinkNoiseWind,
}

/// Altitude-dependent wind: linear interpolation between levels, clamped outside them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiLevelWind {
    levels: Vec<WindLevel>,
}

impl MultiLevelWind {
    pub fn new(mut levels: Vec<WindLevel>) -> Self {
        levels.sort_by(|a, b| a.altitude.total_cmp(&b.altitude));
        levels.dedup_by(|a, b| a.altitude == b.altitude);
        MultiLevelWind { levels }
    }

    pub fn levels(&self) -> &[WindLevel] {
        &self.levels
    }
}

impl WindModel for MultiLevelWind {
    fn velocity(&self, time: f64, altitude: f64) -> Vector3<f64> {
        let (first, last) = match (self.levels.first(), self.levels.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Vector3::zeros(),
        };
        if altitude <= first.altitude {
            return first.model.velocity(time, altitude);
        }
        if altitude >= last.altitude {
            return last.model.velocity(time, altitude);
        }

        let upper = self
            .levels
            .iter()
            .position(|level| level.altitude > altitude)
            .unwrap_or(self.levels.len() - 1);
        let lower = &self.levels[upper - 1];
        let upper = &self.levels[upper];
        let fraction = (altitude - lower.altitude) / (upper.altitude - lower.altitude);

        lower.model.velocity(time, altitude).lerp(&upper.model.velocity(time, altitude), fraction)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindLevelSettings {
    pub altitude: f64,
    pub speed: f64,
    pub direction: f64,
    pub standard_deviation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WindSettings {
    Constant {
        speed: f64,
        direction: f64,
    },
    PinkNoise {
        average: f64,
        standard_deviation: f64,
        direction: f64,
    },
    MultiLevel(Vec<WindLevelSettings>),
}

impl Default for WindSettings {
    fn default() -> Self {
        WindSettings::Constant {
            speed: 0.0,
            direction: 0.0,
        }
    }
}

impl WindSettings {
    /// Builds the run's wind model.
    pub fn build(&self, seed: u64) -> Box<dyn WindModel> {
        match self {
            WindSettings::Constant { speed, direction } => {
                Box::new(ConstantWind::new(*speed, *direction))
            }
            WindSettings::PinkNoise {
                average,
                standard_deviation,
                direction,
            } => Box::new(PinkNoiseWind::new(
                *average,
                *standard_deviation,
                *direction,
                seed,
            )),
            WindSettings::MultiLevel(levels) => Box::new(MultiLevelWind::new(
                levels
                    .iter()
                    .enumerate()
                    .map(|(i, level)| WindLevel {
                        altitude: level.altitude,
                        model: PinkNoiseWind::new(
                            level.speed,
                            level.standard_deviation,
                            level.direction,
                            seed.wrapping_add((i as u64).wrapping_mul(SEED_STREAM_STEP)),
                        ),
                    })
                    .collect(),
            )),
        }
    }
}
