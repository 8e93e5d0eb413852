use std::f64::consts::PI;

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

/// Constant body -> sensor offset, applied before rotating into the world frame.
pub const SENSOR_OFFSET_METERS: [f64; 3] = [0.05512, 0.02226, 0.0297];

pub fn sensor_offset() -> Vector3<f64> {
    Vector3::from(SENSOR_OFFSET_METERS)
}

pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Rodrigues' formula. Below the degeneracy threshold the first-order
/// expansion `I + skew(w)` is used instead.
pub fn so3_exp(omega: &Vector3<f64>) -> Matrix3<f64> {
    let angle = omega.norm();
    if angle < 1e-11 {
        return Matrix3::identity() + skew(omega);
    }
    let axis = omega / angle;
    let k = skew(&axis);
    Matrix3::identity() + angle.sin() * k + (1.0 - angle.cos()) * (k * k)
}

pub fn so3_log(rot: &Matrix3<f64>) -> Vector3<f64> {
    let cos = ((rot.trace() - 1.0) * 0.5).clamp(-1.0, 1.0);
    let angle = cos.acos();
    let axis = Vector3::new(
        rot[(2, 1)] - rot[(1, 2)],
        rot[(0, 2)] - rot[(2, 0)],
        rot[(1, 0)] - rot[(0, 1)],
    );
    if angle < 1e-7 {
        0.5 * axis
    } else {
        axis * (angle / (2.0 * angle.sin()))
    }
}

/// Wraps an angle to (-pi, pi].
pub fn wrap_angle(angle: f64) -> f64 {
    let mut wrapped = angle % (2.0 * PI);
    if wrapped <= -PI {
        wrapped += 2.0 * PI;
    } else if wrapped > PI {
        wrapped -= 2.0 * PI;
    }
    wrapped
}

/// Euler angles for the rotation order Y-X-Z, each wrapped to (-pi, pi].
/// Component 0 is the Y-axis angle, 1 the X-axis angle, 2 the Z-axis angle.
pub fn euler_yxz(rot: &Matrix3<f64>) -> Vector3<f64> {
    let y = rot[(0, 2)].atan2(rot[(2, 2)]);
    let x = (-rot[(1, 2)]).clamp(-1.0, 1.0).asin();
    let z = rot[(1, 0)].atan2(rot[(1, 1)]);
    Vector3::new(wrap_angle(y), wrap_angle(x), wrap_angle(z))
}

pub fn rotation_yxz(euler: &Vector3<f64>) -> Matrix3<f64> {
    so3_exp(&(euler.x * Vector3::y()))
        * so3_exp(&(euler.y * Vector3::x()))
        * so3_exp(&(euler.z * Vector3::z()))
}

/// Rigid transform of a body-frame point into the world frame.
pub fn body_to_world(
    p_body: &Vector3<f64>,
    rot: &Matrix3<f64>,
    trans: &Vector3<f64>,
    offset: &Vector3<f64>,
) -> Vector3<f64> {
    rot * (p_body + offset) + trans
}

/// Quaternion published with odometry, as (x, y, z, w). The Euler remap
/// (roll = Z angle, pitch = -Y angle, yaw = -X angle) and the component
/// shuffle are what downstream consumers expect; keep both exactly.
pub fn odometry_quaternion(euler: &Vector3<f64>) -> [f64; 4] {
    let q = UnitQuaternion::from_euler_angles(euler.z, -euler.x, -euler.y);
    [-q.j, -q.k, q.i, q.w]
}
