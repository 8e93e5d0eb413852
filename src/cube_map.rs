use nalgebra::Vector3;

use crate::cloud::{voxel_downsample, Point, PointCloud};

pub const MAP_WIDTH: usize = 21;
pub const MAP_HEIGHT: usize = 11;
pub const MAP_DEPTH: usize = 21;
pub const MAP_CUBES: usize = MAP_WIDTH * MAP_HEIGHT * MAP_DEPTH;

const DIMS: [usize; 3] = [MAP_WIDTH, MAP_HEIGHT, MAP_DEPTH];

/// Center cubes closer than this to a grid face trigger a recenter shift.
const EDGE_MARGIN: i64 = 3;

/// Sliding grid of cube-sized point clouds. The grid itself never moves in
/// memory; recentering rotates cloud handles along an axis and advances the
/// logical origin `center`, so cube contents are never copied.
pub struct CubeMap {
    cubes: Vec<PointCloud>,
    center: [i64; 3],
    cube_len: f64,
    valid: Vec<usize>,
    surround: Vec<usize>,
}

impl CubeMap {
    pub fn new(cube_len: f64) -> Self {
        CubeMap {
            cubes: vec![PointCloud::new(); MAP_CUBES],
            center: [10, 5, 10],
            cube_len,
            valid: Vec::new(),
            surround: Vec::new(),
        }
    }

    fn slot(i: usize, j: usize, k: usize) -> usize {
        i + MAP_WIDTH * j + MAP_WIDTH * MAP_HEIGHT * k
    }

    pub fn center(&self) -> [i64; 3] {
        self.center
    }

    pub fn cube(&self, i: usize, j: usize, k: usize) -> &PointCloud {
        &self.cubes[Self::slot(i, j, k)]
    }

    /// Grid indices owning a world position. May fall outside the grid.
    pub fn cube_index(&self, p: &Vector3<f64>) -> [i64; 3] {
        let mut index = [0i64; 3];
        for axis in 0..3 {
            index[axis] =
                ((p[axis] + 0.5 * self.cube_len) / self.cube_len).floor() as i64 + self.center[axis];
        }
        index
    }

    fn in_grid(index: [i64; 3]) -> bool {
        (0..3).all(|axis| index[axis] >= 0 && index[axis] < DIMS[axis] as i64)
    }

    /// Rotates cube handles one step along `axis`. `toward_high` moves
    /// contents to higher indices (the grid origin moves to lower world
    /// coordinates) and clears the vacated slot.
    fn shift(&mut self, axis: usize, toward_high: bool) {
        let n = DIMS[axis];
        let (u_axis, v_axis) = match axis {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        };
        for u in 0..DIMS[u_axis] {
            for v in 0..DIMS[v_axis] {
                let at = |w: usize| {
                    let mut idx = [0usize; 3];
                    idx[axis] = w;
                    idx[u_axis] = u;
                    idx[v_axis] = v;
                    Self::slot(idx[0], idx[1], idx[2])
                };
                if toward_high {
                    for w in (1..n).rev() {
                        self.cubes.swap(at(w), at(w - 1));
                    }
                    self.cubes[at(0)].clear();
                } else {
                    for w in 0..n - 1 {
                        self.cubes.swap(at(w), at(w + 1));
                    }
                    self.cubes[at(n - 1)].clear();
                }
            }
        }
        self.center[axis] += if toward_high { 1 } else { -1 };
    }

    /// Slides the grid until the cube owning `t` sits at least `EDGE_MARGIN`
    /// cubes away from every face. Returns the center cube indices.
    pub fn recenter(&mut self, t: &Vector3<f64>) -> [i64; 3] {
        let mut center_cube = self.cube_index(t);
        for axis in 0..3 {
            while center_cube[axis] < EDGE_MARGIN {
                self.shift(axis, true);
                center_cube[axis] += 1;
            }
            while center_cube[axis] >= DIMS[axis] as i64 - EDGE_MARGIN {
                self.shift(axis, false);
                center_cube[axis] -= 1;
            }
        }
        center_cube
    }

    fn fov_cosine(range: f64, d1_sq: f64, d2_sq: f64) -> f64 {
        (range * range + d1_sq - d2_sq) / (2.0 * range * d1_sq.sqrt())
    }

    /// Marks the cubes around `center_cube` that fall inside the sensor
    /// field of view. `axis_point` is the on-axis point at `range` meters,
    /// already transformed to the world frame.
    pub fn update_fov(
        &mut self,
        t: &Vector3<f64>,
        axis_point: &Vector3<f64>,
        range: f64,
        center_cube: [i64; 3],
    ) {
        self.valid.clear();
        self.surround.clear();
        let half = 0.5 * self.cube_len;
        for i in center_cube[0] - 2..=center_cube[0] + 2 {
            for j in center_cube[1] - 2..=center_cube[1] + 2 {
                for k in center_cube[2] - 2..=center_cube[2] + 2 {
                    if !Self::in_grid([i, j, k]) {
                        continue;
                    }
                    let cube_center = Vector3::new(
                        self.cube_len * (i - self.center[0]) as f64,
                        self.cube_len * (j - self.center[1]) as f64,
                        self.cube_len * (k - self.center[2]) as f64,
                    );

                    let mut in_fov = 'corners: {
                        for ii in [-1.0, 1.0] {
                            for jj in [-1.0, 1.0] {
                                for kk in [-1.0, 1.0] {
                                    let corner =
                                        cube_center + half * Vector3::new(ii, jj, kk);
                                    let d1_sq = (t - corner).norm_squared();
                                    let d2_sq = (axis_point - corner).norm_squared();
                                    let cos = if d1_sq <= 3.0 {
                                        1.0
                                    } else {
                                        Self::fov_cosine(range, d1_sq, d2_sq)
                                    };
                                    if cos >= 0.7 {
                                        break 'corners true;
                                    }
                                }
                            }
                        }
                        false
                    };

                    if !in_fov {
                        // fall back on the cube center with looser bounds
                        let d1_sq = (t - cube_center).norm_squared();
                        if d1_sq <= 0.4 * self.cube_len * self.cube_len {
                            in_fov = true;
                        } else {
                            let d2_sq = (axis_point - cube_center).norm_squared();
                            let cos = if d2_sq <= 0.5 * self.cube_len {
                                1.0
                            } else {
                                Self::fov_cosine(range, d1_sq, d2_sq)
                            };
                            if cos >= 0.5 {
                                in_fov = true;
                            }
                        }
                    }

                    let slot = Self::slot(i as usize, j as usize, k as usize);
                    if in_fov {
                        self.valid.push(slot);
                    }
                    self.surround.push(slot);
                }
            }
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.len()
    }

    pub fn surround_count(&self) -> usize {
        self.surround.len()
    }

    /// Materializes the union of the in-FOV cube clouds.
    pub fn submap(&self) -> PointCloud {
        let total = self.valid.iter().map(|&slot| self.cubes[slot].len()).sum();
        let mut cloud = PointCloud::with_capacity(total);
        for &slot in &self.valid {
            cloud.extend(&self.cubes[slot]);
        }
        cloud
    }

    /// Appends world-frame points to their owning cubes, dropping points
    /// that fall outside the grid. Returns the touched cube slots.
    pub fn ingest(&mut self, points: &[Point]) -> Vec<usize> {
        let mut touched = vec![false; MAP_CUBES];
        for p in points {
            let index = self.cube_index(&p.position());
            if Self::in_grid(index) {
                let slot = Self::slot(index[0] as usize, index[1] as usize, index[2] as usize);
                self.cubes[slot].push(*p);
                touched[slot] = true;
            }
        }
        touched
            .iter()
            .enumerate()
            .filter(|(_, &t)| t)
            .map(|(slot, _)| slot)
            .collect()
    }

    pub fn downsample_cubes(&mut self, slots: &[usize], leaf: f32) {
        for &slot in slots {
            self.cubes[slot] = voxel_downsample(&self.cubes[slot], leaf);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const CUBE_LEN: f64 = 50.0;

    #[test]
    fn test_index_of_origin() {
        let map = CubeMap::new(CUBE_LEN);
        assert_eq!(map.cube_index(&Vector3::zeros()), [10, 5, 10]);
        // the cube spans [-L/2, L/2) around its center
        assert_eq!(map.cube_index(&Vector3::new(24.9, 0.0, 0.0)), [10, 5, 10]);
        assert_eq!(map.cube_index(&Vector3::new(25.1, 0.0, 0.0)), [11, 5, 10]);
        assert_eq!(map.cube_index(&Vector3::new(-25.1, 0.0, 0.0)), [9, 5, 10]);
    }

    #[test]
    fn test_recenter_keeps_margin() {
        let mut map = CubeMap::new(CUBE_LEN);
        let positions = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(400.0, 0.0, 0.0),
            Vector3::new(-400.0, 120.0, -380.0),
            Vector3::new(1000.0, -300.0, 1000.0),
        ];
        for t in positions {
            let center = map.recenter(&t);
            assert!(center[0] >= 3 && center[0] <= MAP_WIDTH as i64 - 4, "{center:?}");
            assert!(center[1] >= 3 && center[1] <= MAP_HEIGHT as i64 - 4, "{center:?}");
            assert!(center[2] >= 3 && center[2] <= MAP_DEPTH as i64 - 4, "{center:?}");
            // the reported center still owns the position
            assert_eq!(map.cube_index(&t), center);
        }
    }

    #[test]
    fn test_recenter_moves_contents() {
        let mut map = CubeMap::new(CUBE_LEN);
        let p = Point::new(0.0, 0.0, 0.0, 1.0);
        let slots = map.ingest(&[p]);
        assert_eq!(slots.len(), 1);

        // ten cubes of forward travel puts the center three cubes past the
        // margin, so the grid shifts exactly three slots
        let t = Vector3::new(10.0 * CUBE_LEN, 0.0, 0.0);
        let center = map.recenter(&t);
        assert_eq!(map.center(), [7, 5, 10]);
        assert_eq!(center, [17, 5, 10]);

        // the stored point still re-indexes to the cube that owns it
        let index = map.cube_index(&p.position());
        assert_eq!(index, [7, 5, 10]);
        let cube = map.cube(index[0] as usize, index[1] as usize, index[2] as usize);
        assert_eq!(cube.len(), 1);
        assert_eq!(cube.points[0], p);

        // the three vacated far-side rows are empty
        for i in MAP_WIDTH - 3..MAP_WIDTH {
            for j in 0..MAP_HEIGHT {
                for k in 0..MAP_DEPTH {
                    assert!(map.cube(i, j, k).is_empty());
                }
            }
        }
    }

    #[test]
    fn test_reindex_after_operations() {
        let mut map = CubeMap::new(CUBE_LEN);
        let mut points = Vec::new();
        for i in 0..40 {
            let x = (i as f64) * 13.7 - 250.0;
            let y = (i as f64) * 3.1 - 60.0;
            let z = (i as f64) * 7.9 - 150.0;
            points.push(Point::new(x as f32, y as f32, z as f32, i as f32));
        }
        map.ingest(&points);
        map.recenter(&Vector3::new(180.0, 40.0, -90.0));
        for i in 0..MAP_WIDTH {
            for j in 0..MAP_HEIGHT {
                for k in 0..MAP_DEPTH {
                    for p in &map.cube(i, j, k).points {
                        let index = map.cube_index(&p.position());
                        assert_eq!(index, [i as i64, j as i64, k as i64]);
                    }
                }
            }
        }
    }

    #[test]
    fn test_fov_includes_cube_at_sensor() {
        let mut map = CubeMap::new(CUBE_LEN);
        map.ingest(&[Point::new(1.0, 1.0, 1.0, 0.0)]);
        let t = Vector3::zeros();
        let center = map.recenter(&t);
        map.update_fov(&t, &Vector3::new(2.0, 0.0, 0.0), 2.0, center);
        assert!(map.valid_count() > 0);
        assert!(map.surround_count() >= map.valid_count());
        assert_eq!(map.submap().len(), 1);
    }

    #[test]
    fn test_ingest_outside_grid_dropped() {
        let mut map = CubeMap::new(CUBE_LEN);
        let far = Point::new(1.0e5, 0.0, 0.0, 0.0);
        let touched = map.ingest(&[far]);
        assert!(touched.is_empty());
        let total: usize = (0..MAP_CUBES).map(|s| map.cubes[s].len()).sum();
        assert_eq!(total, 0);
    }

    #[test]
    fn test_touched_cubes_downsampled() {
        let mut map = CubeMap::new(CUBE_LEN);
        let mut points = Vec::new();
        for i in 0..10 {
            points.push(Point::new(0.01 * i as f32, 0.0, 0.0, 1.0));
        }
        let touched = map.ingest(&points);
        assert_eq!(touched.len(), 1);
        map.downsample_cubes(&touched, 0.5);
        assert_eq!(map.cubes[touched[0]].len(), 1);
    }
}
