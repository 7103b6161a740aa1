use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// Unit vector of the launch rod. `angle` is measured from vertical, `azimuth` clockwise from north.
/// World frame: x east, y north, z up.
pub fn launch_rod_direction(angle: f64, azimuth: f64) -> Vector3<f64> {
    Vector3::new(
        angle.sin() * azimuth.sin(),
        angle.sin() * azimuth.cos(),
        angle.cos(),
    )
}

/// Orientation that points the body z-axis (the nose) along `direction`.
pub fn orientation_along(direction: &Vector3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::rotation_between(&Vector3::z(), direction).unwrap_or_else(|| {
        // Antiparallel: flip about the x-axis
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI)
    })
}

/// Time derivative of the orientation for a body-frame angular velocity: ½·q⊗(0, ω).
pub fn quaternion_derivative(
    orientation: &UnitQuaternion<f64>,
    angular_velocity: &Vector3<f64>,
) -> Quaternion<f64> {
    let omega = Quaternion::from_imag(*angular_velocity);
    orientation.quaternion() * omega * 0.5
}

pub fn is_finite_vector(v: &Vector3<f64>) -> bool {
    v.iter().all(|c| c.is_finite())
}

pub fn is_finite_quaternion(q: &Quaternion<f64>) -> bool {
    q.coords.iter().all(|c| c.is_finite())
}
