use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::constants::{
    EARTH_RADIUS, GAS_CONSTANT_AIR, HEAT_CAPACITY_RATIO, SEA_LEVEL_PRESSURE,
    SEA_LEVEL_TEMPERATURE, STANDARD_GRAVITY, TROPOSPHERE_HEIGHT, TROPOSPHERE_TEMP_GRADIENT,
    WGS84_ECCENTRICITY_SQUARED, WGS84_EQUATORIAL_GRAVITY, WGS84_GRAVITY_K,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtmosphericConditions {
    pub temperature: f64,    // K
    pub pressure: f64,       // Pa
    pub density: f64,        // kg/m³
    pub speed_of_sound: f64, // m/s
}

impl AtmosphericConditions {
    pub fn new(temperature: f64, pressure: f64) -> Self {
        let (density, speed_of_sound) = if pressure > 0.0 && temperature > 0.0 {
            (
                pressure / (GAS_CONSTANT_AIR * temperature),
                (HEAT_CAPACITY_RATIO * GAS_CONSTANT_AIR * temperature).sqrt(),
            )
        } else {
            (0.0, 0.0)
        };

        AtmosphericConditions {
            temperature,
            pressure,
            density,
            speed_of_sound,
        }
    }
}

/// Atmosphere as a function of altitude above mean sea level.
pub trait AtmosphereModel: Send + Sync + Debug {
    fn conditions(&self, altitude: f64) -> AtmosphericConditions;
}

// (base altitude m, lapse rate K/m). The last layer is isothermal to infinity.
const ISA_LAYERS: [(f64, f64); 8] = [
    (0.0, TROPOSPHERE_TEMP_GRADIENT),
    (TROPOSPHERE_HEIGHT, 0.0),
    (20_000.0, 1.0 / 1_000.0),
    (32_000.0, 2.8 / 1_000.0),
    (47_000.0, 0.0),
    (51_000.0, -2.8 / 1_000.0),
    (71_000.0, -2.0 / 1_000.0),
    (84_852.0, 0.0),
];

#[derive(Debug, Clone, PartialEq)]
struct Layer {
    base_altitude: f64,
    base_temperature: f64,
    base_pressure: f64,
    lapse_rate: f64,
}

impl Layer {
    fn temperature(&self, altitude: f64) -> f64 {
        self.base_temperature + self.lapse_rate * (altitude - self.base_altitude)
    }

    fn pressure(&self, altitude: f64) -> f64 {
        let dh = altitude - self.base_altitude;
        if self.lapse_rate.abs() < 1e-12 {
            self.base_pressure
                * (-STANDARD_GRAVITY * dh / (GAS_CONSTANT_AIR * self.base_temperature)).exp()
        } else {
            let ratio = self.temperature(altitude) / self.base_temperature;
            self.base_pressure
                * ratio.powf(-STANDARD_GRAVITY / (GAS_CONSTANT_AIR * self.lapse_rate))
        }
    }
}

/// Layered International Standard Atmosphere, optionally re-based on measured launch conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct IsaAtmosphere {
    layers: Vec<Layer>,
}

impl IsaAtmosphere {
    pub fn standard() -> Self {
        Self::from_sea_level(SEA_LEVEL_TEMPERATURE, SEA_LEVEL_PRESSURE)
    }

    pub fn from_sea_level(temperature: f64, pressure: f64) -> Self {
        let mut layers: Vec<Layer> = Vec::with_capacity(ISA_LAYERS.len());
        for &(base_altitude, lapse_rate) in ISA_LAYERS.iter() {
            let (base_temperature, base_pressure) = match layers.last() {
                Some(previous) => (
                    previous.temperature(base_altitude),
                    previous.pressure(base_altitude),
                ),
                None => (temperature, pressure),
            };
            layers.push(Layer {
                base_altitude,
                base_temperature,
                base_pressure,
                lapse_rate,
            });
        }
        IsaAtmosphere { layers }
    }

    /// Standard profile shifted so that `temperature` and `pressure` hold at `altitude`.
    pub fn custom(altitude: f64, temperature: f64, pressure: f64) -> Self {
        let standard = Self::standard();
        let temperature_offset = temperature - standard.conditions(altitude).temperature;
        let unit = Self::from_sea_level(SEA_LEVEL_TEMPERATURE + temperature_offset, 1.0);
        let ratio = unit.conditions(altitude).pressure;
        Self::from_sea_level(SEA_LEVEL_TEMPERATURE + temperature_offset, pressure / ratio)
    }

    fn layer_for(&self, altitude: f64) -> &Layer {
        self.layers
            .iter()
            .rev()
            .find(|layer| altitude >= layer.base_altitude)
            .unwrap_or(&self.layers[0])
    }
}

impl Default for IsaAtmosphere {
    fn default() -> Self {
        Self::standard()
    }
}

impl AtmosphereModel for IsaAtmosphere {
    fn conditions(&self, altitude: f64) -> AtmosphericConditions {
        let layer = self.layer_for(altitude);
        AtmosphericConditions::new(layer.temperature(altitude), layer.pressure(altitude))
    }
}

/// WGS84 surface gravity at `latitude` (rad), reduced with the inverse square of the distance.
pub fn gravity_at(latitude: f64, altitude: f64) -> f64 {
    let sin2 = latitude.sin().powi(2);
    let surface = WGS84_EQUATORIAL_GRAVITY * (1.0 + WGS84_GRAVITY_K * sin2)
        / (1.0 - WGS84_ECCENTRICITY_SQUARED * sin2).sqrt();
    let ratio = EARTH_RADIUS / (EARTH_RADIUS + altitude.max(-EARTH_RADIUS * 0.5));
    surface * ratio * ratio
}
