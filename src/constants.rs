// Physical Constants
pub const STANDARD_GRAVITY: f64 = 9.80665; // m/s²
pub const EARTH_RADIUS: f64 = 6_371_000.0; // meters
pub const GAS_CONSTANT_AIR: f64 = 287.053; // J/(kg·K)
pub const HEAT_CAPACITY_RATIO: f64 = 1.4;

// WGS84 gravity (Somigliana)
pub const WGS84_EQUATORIAL_GRAVITY: f64 = 9.780_326_771_4; // m/s²
pub const WGS84_GRAVITY_K: f64 = 0.001_931_851_386_39;
pub const WGS84_ECCENTRICITY_SQUARED: f64 = 0.006_694_379_990_13;

// Environmental Constants
pub const SEA_LEVEL_TEMPERATURE: f64 = 288.15; // K
pub const SEA_LEVEL_PRESSURE: f64 = 101_325.0; // Pa
pub const TROPOSPHERE_TEMP_GRADIENT: f64 = -6.5 / 1_000.0; // K per meter
pub const TROPOSPHERE_HEIGHT: f64 = 11_000.0; // m

// Simulation Parameters
pub const RECOMMENDED_TIME_STEP: f64 = 0.05; // s
pub const RECOMMENDED_MAX_TIME: f64 = 1200.0; // s
pub const RECOMMENDED_ANGLE_STEP: f64 = 3.0 * std::f64::consts::PI / 180.0; // rad
pub const DEFAULT_MAX_STEPS: usize = 1_000_000;
pub const LAUNCH_ROD_STEP_DIVISOR: f64 = 5.0;
pub const MIN_STEP_DIVISOR: f64 = 20.0;

// Event Detection
pub const DEFAULT_EVENT_VALUE_TOLERANCE: f64 = 1e-3;
pub const DEFAULT_EVENT_TIME_TOLERANCE: f64 = 1e-9; // s
pub const DEFAULT_EVENT_TIE_TOLERANCE: f64 = 1e-6; // s
pub const DEFAULT_EVENT_MAX_ITERATIONS: usize = 50;

// Flight Rules
pub const LIFTOFF_DISTANCE: f64 = 0.02; // m along the launch rod
pub const AOA_TUMBLE_CONDITION: f64 = std::f64::consts::PI / 9.0; // 20°
pub const THRUST_TUMBLE_CONDITION: f64 = 0.01; // N
pub const LARGE_AOA_WARNING: f64 = 17.0 * std::f64::consts::PI / 180.0;
pub const HIGH_SPEED_DEPLOYMENT: f64 = 20.0; // m/s
pub const TUMBLE_DRAG_COEFFICIENT: f64 = 0.56;

// Aerodynamic Constants
pub const VELOCITY_EPSILON: f64 = 1e-6; // m/s below which the airflow direction is undefined
