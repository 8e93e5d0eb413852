use log::warn;
use nalgebra::{DMatrix, DVector, Matrix3, SMatrix, SVector, Vector3};
use rayon::prelude::*;

use crate::cloud::PointCloud;
use crate::geometry::{skew, so3_exp, so3_log};
use crate::matcher::MatchRecord;

pub const STATE_DIM: usize = 18;
pub const MAX_ITERATIONS: usize = 15;
/// LiDAR-time window during which the anchoring path replaces the
/// measurement update.
pub const INIT_WINDOW_SECS: f64 = 3.0;
/// Per-point measurement variance.
pub const POINT_VARIANCE: f64 = 1.0e-3;
const ANCHOR_REGULARIZER: f64 = 1.0e-4;

pub type StateCov = SMatrix<f64, STATE_DIM, STATE_DIM>;

/// Full filter state. The rotation is kept as a matrix; its tangent-space
/// perturbation occupies the first three state coordinates.
#[derive(Debug, Clone)]
pub struct NavState {
    pub rot: Matrix3<f64>,
    pub pos: Vector3<f64>,
    pub vel: Vector3<f64>,
    pub bias_g: Vector3<f64>,
    pub bias_a: Vector3<f64>,
    pub gravity: Vector3<f64>,
    pub cov: StateCov,
}

impl NavState {
    pub fn identity() -> Self {
        NavState {
            rot: Matrix3::identity(),
            pos: Vector3::zeros(),
            vel: Vector3::zeros(),
            bias_g: Vector3::zeros(),
            bias_a: Vector3::zeros(),
            gravity: Vector3::zeros(),
            cov: StateCov::identity(),
        }
    }
}

/// Gain and Jacobian of the last solved iteration, kept for the final
/// covariance update at convergence.
pub struct UpdateGain {
    k: DMatrix<f64>,
    h: DMatrix<f64>,
}

/// Magnitude of one update step, in the units the convergence test uses.
#[derive(Debug, Clone, Copy)]
pub struct StepDelta {
    pub rot_deg: f64,
    pub trans_cm: f64,
}

impl StepDelta {
    pub const SETTLED: StepDelta = StepDelta {
        rot_deg: 0.0,
        trans_cm: 0.0,
    };

    /// Both pose increments below 0.015 (degrees / centimeters) count as a
    /// settled step, which arms rematching.
    pub fn settled(&self) -> bool {
        self.rot_deg < 0.015 && self.trans_cm < 0.015
    }
}

fn cov_dyn(cov: &StateCov) -> DMatrix<f64> {
    DMatrix::from_fn(STATE_DIM, STATE_DIM, |r, c| cov[(r, c)])
}

fn cov_fixed(cov: &DMatrix<f64>) -> StateCov {
    StateCov::from_fn(|r, c| cov[(r, c)])
}

/// Builds the stacked measurement Jacobian and measurement vector from the
/// match records of the points in `included`. Rows are independent and are
/// assembled in parallel.
///
/// One row is `[(p_hat . R^T . n)^T, n^T, 0 ...]` with `p_hat` the skew of
/// the sensor-frame point and `n` the weighted plane normal; the
/// measurement is the negated weighted residual.
pub fn assemble_measurement(
    cloud: &PointCloud,
    records: &[MatchRecord],
    included: &[usize],
    rot: &Matrix3<f64>,
) -> (DMatrix<f64>, DVector<f64>) {
    let rot_t = rot.transpose();
    let rows: Vec<([f64; 6], f64)> = included
        .par_iter()
        .map(|&slot| {
            let record = &records[slot];
            let normal = Vector3::new(
                record.normal[0] as f64,
                record.normal[1] as f64,
                record.normal[2] as f64,
            );
            let rotated = skew(&cloud.points[slot].position()) * rot_t * normal;
            (
                [rotated.x, rotated.y, rotated.z, normal.x, normal.y, normal.z],
                -(record.weighted_residual as f64),
            )
        })
        .collect();

    let mut h = DMatrix::zeros(rows.len(), STATE_DIM);
    let mut z = DVector::zeros(rows.len());
    for (row, (coeffs, measurement)) in rows.iter().enumerate() {
        for (col, value) in coeffs.iter().enumerate() {
            h[(row, col)] = *value;
        }
        z[row] = *measurement;
    }
    (h, z)
}

/// One iterated-EKF measurement step:
/// `K = (H^T.H + (P / sigma^2)^-1)^-1 . H^T`, `delta = K.z`, applied
/// multiplicatively to the rotation and additively to the rest. Returns
/// None when an inverse fails numerically; the caller keeps the previous
/// iterate in that case.
pub fn measurement_update(
    state: &mut NavState,
    h: DMatrix<f64>,
    z: &DVector<f64>,
) -> Option<(StepDelta, UpdateGain)> {
    let prior_information = (cov_dyn(&state.cov) / POINT_VARIANCE).try_inverse()?;
    let gain_base = (h.transpose() * &h + prior_information).try_inverse()?;
    let k = gain_base * h.transpose();
    let delta = &k * z;

    let rot_add = Vector3::new(delta[0], delta[1], delta[2]);
    let trans_add = Vector3::new(delta[3], delta[4], delta[5]);
    state.rot *= so3_exp(&rot_add);
    state.pos += trans_add;
    state.vel += Vector3::new(delta[6], delta[7], delta[8]);
    state.bias_g += Vector3::new(delta[9], delta[10], delta[11]);
    state.bias_a += Vector3::new(delta[12], delta[13], delta[14]);
    state.gravity += Vector3::new(delta[15], delta[16], delta[17]);

    let step = StepDelta {
        rot_deg: rot_add.norm().to_degrees(),
        trans_cm: trans_add.norm() * 100.0,
    };
    Some((step, UpdateGain { k, h }))
}

/// Final covariance update at convergence, `P = (I - K.H).P`.
pub fn finalize_covariance(state: &mut NavState, gain: &UpdateGain) {
    let identity = DMatrix::<f64>::identity(STATE_DIM, STATE_DIM);
    let updated = (identity - &gain.k * &gain.h) * cov_dyn(&state.cov);
    state.cov = cov_fixed(&updated);
}

/// Initialization-window update: anchors rotation, position and gravity to
/// a zero prior instead of using the LiDAR measurements. The pose and
/// velocity are re-zeroed afterwards; bias and gravity corrections stick.
///
/// With `anchor_rotation` cleared the legacy behavior is reproduced: the
/// rotation rows of the anchoring vector carry `-t` and the position rows
/// stay zero.
pub fn init_update(state: &mut NavState, anchor_rotation: bool) {
    let mut h0 = SMatrix::<f64, 9, STATE_DIM>::zeros();
    h0.fixed_view_mut::<3, 3>(0, 0).copy_from(&Matrix3::identity());
    h0.fixed_view_mut::<3, 3>(3, 3).copy_from(&Matrix3::identity());
    h0.fixed_view_mut::<3, 3>(6, 15).copy_from(&Matrix3::identity());

    let mut z0 = SVector::<f64, 9>::zeros();
    if anchor_rotation {
        z0.fixed_rows_mut::<3>(0).copy_from(&(-so3_log(&state.rot)));
        z0.fixed_rows_mut::<3>(3).copy_from(&(-state.pos));
    } else {
        z0.fixed_rows_mut::<3>(0).copy_from(&(-state.pos));
    }

    let h0_t = h0.transpose();
    let innovation =
        h0 * state.cov * h0_t + SMatrix::<f64, 9, 9>::identity() * ANCHOR_REGULARIZER;
    let Some(innovation_inv) = innovation.try_inverse() else {
        warn!("anchoring gain inverse failed, skipping the init correction");
        return;
    };
    let k = state.cov * h0_t * innovation_inv;
    let delta = k * z0;

    state.rot = Matrix3::identity();
    state.pos = Vector3::zeros();
    state.vel = Vector3::zeros();
    state.bias_g += delta.fixed_rows::<3>(9).into_owned();
    state.bias_a += delta.fixed_rows::<3>(12).into_owned();
    state.gravity += delta.fixed_rows::<3>(15).into_owned();
    state.cov = (StateCov::identity() - k * h0) * state.cov;
}
