use kdtree::distance::squared_euclidean;
use kdtree::KdTree;
use lstsq::lstsq;
use nalgebra::{Matrix3, OMatrix, OVector, Vector3, U3, U5};
use rayon::prelude::*;

use crate::cloud::{associate_to_map, PointCloud};
use crate::geometry::sensor_offset;

pub const NUM_MATCH_POINTS: usize = 5;

/// Candidates whose farthest neighbor is beyond this squared distance are
/// not matched.
const MAX_NEIGHBOR_SQ_DIST: f32 = 5.0;
/// Every neighbor must lie within this distance of the fitted plane.
const PLANE_INLIER_LIMIT: f32 = 0.1;
const MIN_WEIGHT: f32 = 0.1;

/// Per-point match state, reused across the outer iterations of a frame.
/// `neighbors` caches the map indices found on the last rematch.
#[derive(Debug, Clone, Default)]
pub struct MatchRecord {
    pub selected: bool,
    pub neighbors: Vec<usize>,
    /// Weighted plane normal, `s * (a, b, c)`.
    pub normal: [f32; 3],
    /// Weighted signed residual, `s * r`.
    pub weighted_residual: f32,
    /// Raw signed point-to-plane residual.
    pub residual: f32,
}

impl MatchRecord {
    pub fn fresh() -> Self {
        MatchRecord {
            selected: true,
            ..Default::default()
        }
    }
}

pub type MapIndex = KdTree<f32, usize, [f32; 3]>;

pub fn build_index(map: &PointCloud) -> MapIndex {
    let mut index = KdTree::with_capacity(3, 128);
    for (slot, p) in map.points.iter().enumerate() {
        // add only fails on non-finite coordinates
        let _ = index.add([p.x, p.y, p.z], slot);
    }
    index
}

/// Matches every input point against a locally fitted map plane. Points are
/// independent; the loop runs data-parallel with each worker writing only
/// its own record and world-point slot.
///
/// When `rematch` is set the nearest neighbors are looked up again and
/// re-cached, otherwise the cached associations are reused.
pub fn match_points(
    cloud: &PointCloud,
    world: &mut PointCloud,
    map: &PointCloud,
    index: &MapIndex,
    rot: &Matrix3<f64>,
    trans: &Vector3<f64>,
    records: &mut [MatchRecord],
    rematch: bool,
) {
    let offset = sensor_offset();
    world
        .points
        .par_iter_mut()
        .zip(records.par_iter_mut())
        .zip(cloud.points.par_iter())
        .for_each(|((world_point, record), point)| {
            *world_point = associate_to_map(point, rot, trans, &offset);

            if rematch {
                let found = index.nearest(
                    &[world_point.x, world_point.y, world_point.z],
                    NUM_MATCH_POINTS,
                    &squared_euclidean,
                );
                match found {
                    Ok(neighbors)
                        if neighbors.len() == NUM_MATCH_POINTS
                            && neighbors[NUM_MATCH_POINTS - 1].0 < MAX_NEIGHBOR_SQ_DIST =>
                    {
                        record.selected = true;
                        record.neighbors.clear();
                        record.neighbors.extend(neighbors.iter().map(|&(_, &slot)| slot));
                    }
                    _ => {
                        record.selected = false;
                        return;
                    }
                }
            }
            if !record.selected {
                return;
            }

            let Some((normal, d)) = fit_plane(map, &record.neighbors) else {
                record.selected = false;
                return;
            };

            let residual =
                normal.x * world_point.x + normal.y * world_point.y + normal.z * world_point.z + d;
            let range_sq = world_point.x * world_point.x
                + world_point.y * world_point.y
                + world_point.z * world_point.z;
            let weight = 1.0 - 0.9 * residual.abs() / range_sq.sqrt().sqrt();
            if weight > MIN_WEIGHT {
                record.selected = true;
                record.normal = [weight * normal.x, weight * normal.y, weight * normal.z];
                record.weighted_residual = weight * residual;
                record.residual = residual;
            } else {
                record.selected = false;
            }
        });
}

/// Least-squares plane through the neighbor set: solve `A.x = -1` by QR,
/// then normalize so the normal is unit length and `d` the signed offset.
/// Returns None when a neighbor sits farther than `PLANE_INLIER_LIMIT` from
/// the fit.
fn fit_plane(map: &PointCloud, neighbors: &[usize]) -> Option<(Vector3<f32>, f32)> {
    let mut a = OMatrix::<f32, U5, U3>::zeros();
    let b = OVector::<f32, U5>::from_element(-1.0);
    for (row, &slot) in neighbors.iter().enumerate() {
        let p = &map.points[slot];
        a[(row, 0)] = p.x;
        a[(row, 1)] = p.y;
        a[(row, 2)] = p.z;
    }
    let solution = lstsq(&a, &b, 1e-8).ok()?.solution;
    let norm = solution.norm();
    if norm < f32::EPSILON {
        return None;
    }
    let normal = solution / norm;
    let d = 1.0 / norm;
    for &slot in neighbors {
        let p = &map.points[slot];
        if (normal.x * p.x + normal.y * p.y + normal.z * p.z + d).abs() > PLANE_INLIER_LIMIT {
            return None;
        }
    }
    Some((normal, d))
}
