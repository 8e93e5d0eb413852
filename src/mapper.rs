use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Instant;

use log::{debug, info, warn};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::cloud::{
    associate_to_map, intensity_color, save_pcd, voxel_downsample, ColorPoint, PointCloud,
};
use crate::config::{MapperConfig, MapperError};
use crate::cube_map::CubeMap;
use crate::filter::{
    self, NavState, StateCov, StepDelta, INIT_WINDOW_SECS, MAX_ITERATIONS, STATE_DIM,
};
use crate::geometry::{body_to_world, euler_yxz, odometry_quaternion, sensor_offset};
use crate::matcher::{self, MatchRecord};

/// On-axis point distance used by the FOV cull, meters.
const SENSOR_SCAN_RANGE: f64 = 2.0;
/// Below this submap size the update is skipped and the prior published.
const MIN_SUBMAP_POINTS: usize = 100;
/// Below this many effective matches an iteration skips its solve.
const MIN_EFFECTIVE_POINTS: usize = 50;
/// Points whose raw residual exceeds this are left out of the solve.
const RESIDUAL_LIMIT: f32 = 0.5;
const QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFrame {
    pub timestamp: f64,
    pub cloud: PointCloud,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImuSample {
    pub timestamp: f64,
    pub gyro: [f64; 3],
    pub accel: [f64; 3],
}

/// Propagated inertial state accompanying each feature cloud, and the shape
/// the posterior is published in. The covariance is row-major 18x18.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagatedState {
    pub timestamp: f64,
    pub rot_end: [[f64; 3]; 3],
    pub pos_end: [f64; 3],
    pub vel_end: [f64; 3],
    pub bias_gyr: [f64; 3],
    pub bias_acc: [f64; 3],
    pub gravity: [f64; 3],
    pub cov: Vec<f64>,
}

impl PropagatedState {
    pub fn to_nav_state(&self) -> NavState {
        NavState {
            rot: Matrix3::from_fn(|r, c| self.rot_end[r][c]),
            pos: Vector3::from(self.pos_end),
            vel: Vector3::from(self.vel_end),
            bias_g: Vector3::from(self.bias_gyr),
            bias_a: Vector3::from(self.bias_acc),
            gravity: Vector3::from(self.gravity),
            cov: StateCov::from_fn(|r, c| {
                self.cov.get(r * STATE_DIM + c).copied().unwrap_or(0.0)
            }),
        }
    }

    pub fn from_nav_state(timestamp: f64, state: &NavState) -> Self {
        let mut rot_end = [[0.0; 3]; 3];
        for r in 0..3 {
            for c in 0..3 {
                rot_end[r][c] = state.rot[(r, c)];
            }
        }
        PropagatedState {
            timestamp,
            rot_end,
            pos_end: state.pos.into(),
            vel_end: state.vel.into(),
            bias_gyr: state.bias_g.into(),
            bias_acc: state.bias_a.into(),
            gravity: state.gravity.into(),
            cov: (0..STATE_DIM * STATE_DIM)
                .map(|i| state.cov[(i / STATE_DIM, i % STATE_DIM)])
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Odometry {
    pub timestamp: f64,
    pub position: [f64; 3],
    /// (x, y, z, w)
    pub orientation: [f64; 4],
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameOutput {
    pub state: PropagatedState,
    pub registered: Vec<ColorPoint>,
    pub submap: PointCloud,
    pub odometry: Odometry,
    /// Body pose for flight-controller consumers: y and z are negated.
    pub body_pose: Odometry,
}

pub trait OutputSink: Send {
    fn publish(&mut self, output: FrameOutput);
}

#[derive(Default)]
struct InputQueues {
    lidar: VecDeque<FeatureFrame>,
    imu: VecDeque<ImuSample>,
    states: VecDeque<PropagatedState>,
    last_lidar_stamp: Option<f64>,
    last_imu_stamp: Option<f64>,
    imu_reset: bool,
}

fn push_bounded<T>(queue: &mut VecDeque<T>, value: T) {
    if queue.len() >= QUEUE_CAPACITY {
        queue.pop_front();
    }
    queue.push_back(value);
}

/// Shared input side of the pipeline. Transport callbacks push into the
/// three queues under one mutex; the driver thread blocks on the condition
/// variable until a paired frame is available. No work happens under the
/// lock.
pub struct Core {
    queues: Mutex<InputQueues>,
    arrivals: Condvar,
    shutdown: AtomicBool,
}

impl Core {
    pub fn new() -> Self {
        Core {
            queues: Mutex::new(InputQueues::default()),
            arrivals: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn push_features(&self, frame: FeatureFrame) {
        let mut queues = self.queues.lock().unwrap();
        if queues
            .last_lidar_stamp
            .is_some_and(|last| frame.timestamp < last)
        {
            warn!("lidar timestamp went backwards, clearing the feature queue");
            queues.lidar.clear();
        }
        queues.last_lidar_stamp = Some(frame.timestamp);
        push_bounded(&mut queues.lidar, frame);
        drop(queues);
        self.arrivals.notify_all();
    }

    pub fn push_imu(&self, sample: ImuSample) {
        let mut queues = self.queues.lock().unwrap();
        if queues
            .last_imu_stamp
            .is_some_and(|last| sample.timestamp < last)
        {
            warn!("imu timestamp went backwards, clearing the imu queue");
            queues.imu.clear();
            queues.imu_reset = true;
        }
        queues.last_imu_stamp = Some(sample.timestamp);
        push_bounded(&mut queues.imu, sample);
        drop(queues);
        self.arrivals.notify_all();
    }

    pub fn push_state(&self, state: PropagatedState) {
        let mut queues = self.queues.lock().unwrap();
        push_bounded(&mut queues.states, state);
        drop(queues);
        self.arrivals.notify_all();
    }

    /// Pops a paired frame without blocking. The cloud and state streams
    /// arrive 1:1 and in order; a frame is formed only while the two queues
    /// are equally long. The returned flag reports a pending IMU reset.
    pub fn try_next_frame(&self) -> Option<(FeatureFrame, PropagatedState, bool)> {
        let mut queues = self.queues.lock().unwrap();
        Self::pop_pair(&mut queues)
    }

    /// Blocks until a paired frame is available or shutdown is requested.
    pub fn next_frame(&self) -> Option<(FeatureFrame, PropagatedState, bool)> {
        let mut queues = self.queues.lock().unwrap();
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(pair) = Self::pop_pair(&mut queues) {
                return Some(pair);
            }
            queues = self.arrivals.wait(queues).unwrap();
        }
    }

    fn pop_pair(queues: &mut InputQueues) -> Option<(FeatureFrame, PropagatedState, bool)> {
        if queues.lidar.is_empty() || queues.lidar.len() != queues.states.len() {
            return None;
        }
        let frame = queues.lidar.pop_front()?;
        let state = queues.states.pop_front()?;
        let reset = std::mem::take(&mut queues.imu_reset);
        Some((frame, state, reset))
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.arrivals.notify_all();
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-frame orchestration: recenter and cull the cube map, downsample,
/// run the iterated update, ingest the frame into the map and build the
/// published outputs. Owned exclusively by the driver thread.
pub struct Mapper {
    config: MapperConfig,
    map: CubeMap,
    first_lidar_time: Option<f64>,
    /// Corner features are not produced by the surface-only pipeline; the
    /// buffer exists so the shutdown persistence rule can check it.
    corner_points: PointCloud,
    last_submap: PointCloud,
    last_iterations: usize,
    last_mean_residual: f64,
    frame_count: u64,
    avg_frame_secs: f64,
}

impl Mapper {
    pub fn new(config: MapperConfig) -> Self {
        let cube_len = config.cube_side_length as f64;
        Mapper {
            config,
            map: CubeMap::new(cube_len),
            first_lidar_time: None,
            corner_points: PointCloud::new(),
            last_submap: PointCloud::new(),
            last_iterations: 0,
            last_mean_residual: 0.0,
            frame_count: 0,
            avg_frame_secs: 0.0,
        }
    }

    pub fn last_iterations(&self) -> usize {
        self.last_iterations
    }

    pub fn last_mean_residual(&self) -> f64 {
        self.last_mean_residual
    }

    /// Frame loop: block for paired input, process, publish. Saves the map
    /// on the way out.
    pub fn run(&mut self, core: &Core, sink: &mut dyn OutputSink) {
        while let Some((frame, prior, imu_reset)) = core.next_frame() {
            if imu_reset {
                warn!("imu stream was reset upstream, state propagation restarted");
            }
            let output = self.process_frame(frame, prior);
            sink.publish(output);
        }
        if let Err(err) = self.save_map() {
            warn!("{err}");
        }
    }

    pub fn process_frame(&mut self, frame: FeatureFrame, prior: PropagatedState) -> FrameOutput {
        let frame_started = Instant::now();
        let mut state = prior.to_nav_state();
        let offset = sensor_offset();

        let first = *self.first_lidar_time.get_or_insert(frame.timestamp);
        let need_init = frame.timestamp - first < INIT_WINDOW_SECS;
        if need_init {
            info!("initializing, anchoring pose during the first {INIT_WINDOW_SECS} s");
        }

        let center_cube = self.map.recenter(&state.pos);
        let axis_point = body_to_world(
            &Vector3::new(SENSOR_SCAN_RANGE, 0.0, 0.0),
            &state.rot,
            &state.pos,
            &offset,
        );
        self.map
            .update_fov(&state.pos, &axis_point, SENSOR_SCAN_RANGE, center_cube);

        let submap = voxel_downsample(&self.map.submap(), self.config.filter_size_map);
        let input_down = voxel_downsample(&frame.cloud, self.config.filter_size_surf);
        info!(
            "raw features: {}, downsampled: {}, submap: {}",
            frame.cloud.len(),
            input_down.len(),
            submap.len()
        );

        let mut updated = input_down.clone();
        let mut match_secs = 0.0;
        let mut solve_secs = 0.0;
        self.last_iterations = 0;
        self.last_mean_residual = 0.0;

        if submap.len() > MIN_SUBMAP_POINTS {
            let index = matcher::build_index(&submap);
            let mut records = vec![MatchRecord::fresh(); input_down.len()];
            let mut rematch_enabled = false;
            let mut rematch_count = 0;
            let mut gain = None;

            for iteration in 0..MAX_ITERATIONS {
                self.last_iterations = iteration + 1;
                let match_started = Instant::now();
                let rematch = iteration == 0 || rematch_enabled;
                matcher::match_points(
                    &input_down,
                    &mut updated,
                    &submap,
                    &index,
                    &state.rot,
                    &state.pos,
                    &mut records,
                    rematch,
                );
                let included: Vec<usize> = records
                    .iter()
                    .enumerate()
                    .filter(|(_, record)| {
                        record.selected && record.residual.abs() < RESIDUAL_LIMIT
                    })
                    .map(|(slot, _)| slot)
                    .collect();
                match_secs += match_started.elapsed().as_secs_f64();

                if iteration == 0 {
                    debug!("effective feature count: {}", included.len());
                }
                if included.len() < MIN_EFFECTIVE_POINTS {
                    debug!(
                        "only {} effective features, skipping this solve",
                        included.len()
                    );
                    continue;
                }
                self.last_mean_residual = included
                    .iter()
                    .map(|&slot| records[slot].residual.abs() as f64)
                    .sum::<f64>()
                    / included.len() as f64;

                let solve_started = Instant::now();
                let step = if need_init {
                    filter::init_update(&mut state, self.config.init_anchor_rotation);
                    // anchoring re-zeroes the pose, so the step reports as
                    // settled and the frame winds down after two passes
                    StepDelta::SETTLED
                } else {
                    let (h, z) =
                        filter::assemble_measurement(&input_down, &records, &included, &state.rot);
                    match filter::measurement_update(&mut state, h, &z) {
                        Some((step, new_gain)) => {
                            gain = Some(new_gain);
                            step
                        }
                        None => {
                            warn!("covariance inverse failed, keeping the previous iterate");
                            solve_secs += solve_started.elapsed().as_secs_f64();
                            continue;
                        }
                    }
                };
                solve_secs += solve_started.elapsed().as_secs_f64();
                debug!(
                    "iteration {iteration}: rot {:.4} deg, trans {:.4} cm",
                    step.rot_deg, step.trans_cm
                );

                rematch_enabled = step.settled();
                if rematch_enabled {
                    rematch_count += 1;
                }
                if rematch_count >= 2 {
                    if !need_init {
                        if let Some(gain) = gain.take() {
                            filter::finalize_covariance(&mut state, &gain);
                        }
                    }
                    break;
                }
            }
            debug!("iteration count: {}", self.last_iterations);
        } else {
            // nothing to match against yet, keep the prior and seed the map
            info!("submap holds {} points, skipping the update", submap.len());
            for (world_point, point) in updated.points.iter_mut().zip(input_down.points.iter()) {
                *world_point = associate_to_map(point, &state.rot, &state.pos, &offset);
            }
        }

        let touched = self.map.ingest(&updated.points);
        self.map
            .downsample_cubes(&touched, self.config.filter_size_surf);

        let euler = euler_yxz(&state.rot);
        let orientation = odometry_quaternion(&euler);
        let registered_source = if self.config.dense_map_enable {
            &frame.cloud
        } else {
            &input_down
        };
        let registered: Vec<ColorPoint> = registered_source
            .points
            .iter()
            .map(|point| {
                let world_point = associate_to_map(point, &state.rot, &state.pos, &offset);
                let [r, g, b] = intensity_color(point.intensity);
                ColorPoint {
                    x: world_point.x,
                    y: world_point.y,
                    z: world_point.z,
                    r,
                    g,
                    b,
                }
            })
            .collect();

        self.last_submap = submap.clone();
        let total_secs = frame_started.elapsed().as_secs_f64();
        self.frame_count += 1;
        self.avg_frame_secs += (total_secs - self.avg_frame_secs) / self.frame_count as f64;
        info!(
            "frame {}: match {match_secs:.4}s solve {solve_secs:.4}s total {total_secs:.4}s (avg {:.4}s)",
            self.frame_count, self.avg_frame_secs
        );

        FrameOutput {
            state: PropagatedState::from_nav_state(frame.timestamp, &state),
            registered,
            submap,
            odometry: Odometry {
                timestamp: frame.timestamp,
                position: state.pos.into(),
                orientation,
            },
            body_pose: Odometry {
                timestamp: frame.timestamp,
                position: [state.pos.x, -state.pos.y, -state.pos.z],
                orientation,
            },
        }
    }

    /// Writes the surface and corner clouds as binary PCD files, but only
    /// when both hold points; the surface-only pipeline therefore skips the
    /// write and says so.
    pub fn save_map(&self) -> Result<(), MapperError> {
        if self.last_submap.is_empty() || self.corner_points.is_empty() {
            info!("map not saved, surface or corner buffer is empty");
            return Ok(());
        }
        let dir = &self.config.map_file_path;
        let surf_path = dir.join("surf.pcd");
        save_pcd(&surf_path, &self.last_submap).map_err(|source| MapperError::MapWrite {
            path: surf_path.clone(),
            source,
        })?;
        let corner_path = dir.join("corner.pcd");
        save_pcd(&corner_path, &self.corner_points).map_err(|source| MapperError::MapWrite {
            path: corner_path.clone(),
            source,
        })?;
        info!("map saved to {}", dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cloud::Point;
    use crate::geometry::{so3_log, so3_exp};

    fn test_config() -> MapperConfig {
        MapperConfig {
            filter_size_surf: 0.3,
            filter_size_map: 0.3,
            dense_map_enable: false,
            ..MapperConfig::default()
        }
    }

    fn identity_prior(timestamp: f64, pos: [f64; 3]) -> PropagatedState {
        let mut state = NavState::identity();
        state.pos = Vector3::from(pos);
        PropagatedState::from_nav_state(timestamp, &state)
    }

    /// Deterministic uniform jitter in [-amplitude, amplitude].
    fn jitter(seed: &mut u64, amplitude: f32) -> f32 {
        *seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let unit = (*seed >> 33) as f32 / (1u64 << 31) as f32;
        (2.0 * unit - 1.0) * amplitude
    }

    /// A 10x10 m patch of the plane z = 0, seen from a sensor `height`
    /// meters above it, expressed in the sensor frame with the body offset
    /// removed and per-point noise added.
    fn plane_frame(timestamp: f64, height: f64, seed: &mut u64) -> FeatureFrame {
        let offset = sensor_offset();
        let mut cloud = PointCloud::new();
        for i in 0..32 {
            for j in 0..32 {
                let x = i as f64 * 10.0 / 31.0 - 5.0;
                let y = j as f64 * 10.0 / 31.0 - 5.0;
                let z = jitter(seed, 0.004) as f64 - height;
                cloud.push(Point::new(
                    (x - offset.x) as f32,
                    (y - offset.y) as f32,
                    (z - offset.z) as f32,
                    0.5,
                ));
            }
        }
        FeatureFrame { timestamp, cloud }
    }

    #[test]
    fn test_empty_map_publishes_prior() {
        let mut mapper = Mapper::new(test_config());
        let mut seed = 7;
        let frame = plane_frame(0.0, 1.0, &mut seed);
        let prior = identity_prior(0.0, [0.0, 0.0, 1.0]);
        let output = mapper.process_frame(frame, prior.clone());

        assert_eq!(output.state.pos_end, prior.pos_end);
        assert_eq!(output.state.rot_end, prior.rot_end);
        assert_eq!(mapper.last_iterations(), 0);
        // the frame was still ingested, in world coordinates
        let total: usize = (0..crate::cube_map::MAP_WIDTH)
            .flat_map(|i| {
                (0..crate::cube_map::MAP_HEIGHT).flat_map(move |j| {
                    (0..crate::cube_map::MAP_DEPTH).map(move |k| (i, j, k))
                })
            })
            .map(|(i, j, k)| mapper.map.cube(i, j, k).len())
            .sum();
        assert!(total > 100);
        // ingested points sit near the world plane z = 0
        for p in &mapper.map.cube(10, 5, 10).points {
            assert!(p.z.abs() < 0.05, "point {p:?} not in world frame");
        }
    }

    #[test]
    fn test_planar_scene_converges() {
        let mut mapper = Mapper::new(test_config());
        let mut seed = 11;
        // first frame seeds the map; its timestamp also opens the init
        // window, so the refinement frame comes after it
        let output = mapper.process_frame(
            plane_frame(0.0, 1.0, &mut seed),
            identity_prior(0.0, [0.0, 0.0, 1.0]),
        );
        assert_eq!(output.state.pos_end, [0.0, 0.0, 1.0]);

        let output = mapper.process_frame(
            plane_frame(10.0, 1.0, &mut seed),
            identity_prior(10.0, [0.0, 0.0, 1.0]),
        );
        assert!(mapper.last_iterations() > 0);
        let pos = Vector3::from(output.state.pos_end);
        let error = (pos - Vector3::new(0.0, 0.0, 1.0)).norm();
        assert!(error < 0.02, "position error {error}");
        let rot = Matrix3::from_fn(|r, c| output.state.rot_end[r][c]);
        let angle = so3_log(&rot).norm().to_degrees();
        assert!(angle < 0.3, "rotation error {angle} deg");
    }

    #[test]
    fn test_perturbed_prior_converges() {
        let mut mapper = Mapper::new(test_config());
        let mut seed = 23;
        mapper.process_frame(
            plane_frame(0.0, 1.0, &mut seed),
            identity_prior(0.0, [0.0, 0.0, 1.0]),
        );

        // prior off by 30 cm in x and 2 degrees of yaw
        let mut state = NavState::identity();
        state.pos = Vector3::new(0.3, 0.0, 1.0);
        state.rot = so3_exp(&Vector3::new(0.0, 0.0, 2.0_f64.to_radians()));
        let prior = PropagatedState::from_nav_state(10.0, &state);
        mapper.process_frame(plane_frame(10.0, 1.0, &mut seed), prior);

        assert!(
            mapper.last_iterations() <= 8,
            "took {} iterations",
            mapper.last_iterations()
        );
        assert!(
            mapper.last_mean_residual() < 0.005,
            "mean residual {}",
            mapper.last_mean_residual()
        );
    }

    #[test]
    fn test_init_window_anchors_pose() {
        let mut mapper = Mapper::new(test_config());
        let mut seed = 31;
        // seed the map so the anchoring path actually iterates
        mapper.process_frame(
            plane_frame(0.0, 1.0, &mut seed),
            identity_prior(0.0, [0.0, 0.0, 1.0]),
        );

        for step in 1..=3 {
            let timestamp = step as f64 * 0.5;
            let sign = if step % 2 == 0 { -1.0 } else { 1.0 };
            let mut state = NavState::identity();
            state.pos = Vector3::new(0.1 * sign, -0.05 * sign, 1.0);
            // couple position-x with accel-bias-x so the anchor has
            // something unanchored to push against
            state.cov[(3, 12)] = 0.4;
            state.cov[(12, 3)] = 0.4;
            let prior = PropagatedState::from_nav_state(timestamp, &state);
            let output = mapper.process_frame(plane_frame(timestamp, 1.0, &mut seed), prior);

            assert_eq!(output.state.pos_end, [0.0, 0.0, 0.0]);
            let rot = Matrix3::from_fn(|r, c| output.state.rot_end[r][c]);
            assert_eq!(rot, Matrix3::identity());
            // the position anchor leaks into the bias through the coupling
            assert!(Vector3::from(output.state.bias_acc).norm() > 0.01);
        }
    }

    #[test]
    fn test_lidar_regression_clears_queue() {
        let core = Core::new();
        core.push_features(FeatureFrame {
            timestamp: 1.0,
            cloud: PointCloud::new(),
        });
        core.push_features(FeatureFrame {
            timestamp: 0.5,
            cloud: PointCloud::new(),
        });
        // only the fresh stream remains
        core.push_state(identity_prior(0.5, [0.0; 3]));
        let (frame, state, _) = core.try_next_frame().unwrap();
        assert_eq!(frame.timestamp, 0.5);
        assert_eq!(state.timestamp, 0.5);
        assert!(core.try_next_frame().is_none());
    }

    #[test]
    fn test_unequal_queues_form_no_frame() {
        let core = Core::new();
        core.push_features(FeatureFrame {
            timestamp: 1.0,
            cloud: PointCloud::new(),
        });
        core.push_features(FeatureFrame {
            timestamp: 2.0,
            cloud: PointCloud::new(),
        });
        core.push_state(identity_prior(1.0, [0.0; 3]));
        assert!(core.try_next_frame().is_none());
        core.push_state(identity_prior(2.0, [0.0; 3]));
        let (frame, _, _) = core.try_next_frame().unwrap();
        assert_eq!(frame.timestamp, 1.0);
    }

    #[test]
    fn test_imu_regression_flags_reset() {
        let core = Core::new();
        core.push_imu(ImuSample {
            timestamp: 1.0,
            gyro: [0.0; 3],
            accel: [0.0; 3],
        });
        core.push_imu(ImuSample {
            timestamp: 0.2,
            gyro: [0.0; 3],
            accel: [0.0; 3],
        });
        core.push_features(FeatureFrame {
            timestamp: 1.0,
            cloud: PointCloud::new(),
        });
        core.push_state(identity_prior(1.0, [0.0; 3]));
        let (_, _, reset) = core.try_next_frame().unwrap();
        assert!(reset);
    }

    #[test]
    fn test_shutdown_unblocks_driver() {
        let core = Core::new();
        core.request_shutdown();
        assert!(core.next_frame().is_none());
    }

    #[test]
    fn test_save_map_needs_both_buffers() {
        let dir = std::env::temp_dir().join("lio_mapper_save_test");
        std::fs::create_dir_all(&dir).unwrap();
        let mut config = test_config();
        config.map_file_path = dir.clone();
        let mut mapper = Mapper::new(config);
        let mut seed = 3;
        mapper.process_frame(
            plane_frame(0.0, 1.0, &mut seed),
            identity_prior(0.0, [0.0, 0.0, 1.0]),
        );
        // the corner buffer is empty, so nothing may be written
        mapper.save_map().unwrap();
        assert!(!dir.join("surf.pcd").exists());
        assert!(!dir.join("corner.pcd").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
