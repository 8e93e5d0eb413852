use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::body_to_world;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32, z: f32, intensity: f32) -> Self {
        Point { x, y, z, intensity }
    }

    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.x as f64, self.y as f64, self.z as f64)
    }

    pub fn with_position(&self, p: &Vector3<f64>) -> Point {
        Point::new(p.x as f32, p.y as f32, p.z as f32, self.intensity)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointCloud {
    pub points: Vec<Point>,
}

impl PointCloud {
    pub fn new() -> Self {
        PointCloud { points: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        PointCloud {
            points: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    pub fn extend(&mut self, other: &PointCloud) {
        self.points.extend_from_slice(&other.points);
    }
}

/// Transforms a sensor-frame point into the world frame, keeping intensity.
pub fn associate_to_map(
    point: &Point,
    rot: &Matrix3<f64>,
    trans: &Vector3<f64>,
    offset: &Vector3<f64>,
) -> Point {
    point.with_position(&body_to_world(&point.position(), rot, trans, offset))
}

#[derive(Default)]
struct LeafAccumulator {
    x: f64,
    y: f64,
    z: f64,
    intensity: f64,
    count: u32,
}

/// Spatial decimation with cubic leaves of side `leaf`: one centroid point
/// (mean position, mean intensity) per non-empty leaf, emitted in first-seen
/// leaf order so the output is deterministic for a given input order.
pub fn voxel_downsample(cloud: &PointCloud, leaf: f32) -> PointCloud {
    if leaf <= 0.0 {
        return cloud.clone();
    }
    let mut slots: HashMap<(i64, i64, i64), usize> = HashMap::new();
    let mut leaves: Vec<LeafAccumulator> = Vec::new();
    for p in &cloud.points {
        let key = (
            (p.x / leaf).floor() as i64,
            (p.y / leaf).floor() as i64,
            (p.z / leaf).floor() as i64,
        );
        let slot = *slots.entry(key).or_insert_with(|| {
            leaves.push(LeafAccumulator::default());
            leaves.len() - 1
        });
        let acc = &mut leaves[slot];
        acc.x += p.x as f64;
        acc.y += p.y as f64;
        acc.z += p.z as f64;
        acc.intensity += p.intensity as f64;
        acc.count += 1;
    }
    let mut out = PointCloud::with_capacity(leaves.len());
    for acc in leaves {
        let n = acc.count as f64;
        out.push(Point::new(
            (acc.x / n) as f32,
            (acc.y / n) as f32,
            (acc.z / n) as f32,
            (acc.intensity / n) as f32,
        ));
    }
    out
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ColorPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Four-band reflectivity ramp over the fractional part of intensity scaled
/// by 10000, with band edges at 30, 90, 150 and 255.
pub fn intensity_color(intensity: f32) -> [u8; 3] {
    let reflection = ((intensity - intensity.floor()) * 10000.0) as i32;
    if reflection < 30 {
        [0x00, (reflection * 255 / 30 & 0xff) as u8, 0xff]
    } else if reflection < 90 {
        [0x00, 0xff, ((90 - reflection) * 255 / 60 & 0xff) as u8]
    } else if reflection < 150 {
        [((reflection - 90) * 255 / 60 & 0xff) as u8, 0xff, 0x00]
    } else {
        [0xff, ((255 - reflection) * 255 / (255 - 150) & 0xff) as u8, 0x00]
    }
}

/// Writes a binary PCD v0.7 file with x, y, z and intensity as
/// little-endian f32 fields.
pub fn save_pcd(path: &Path, cloud: &PointCloud) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write!(
        out,
        "# .PCD v0.7 - Point Cloud Data file format\n\
         VERSION 0.7\n\
         FIELDS x y z intensity\n\
         SIZE 4 4 4 4\n\
         TYPE F F F F\n\
         COUNT 1 1 1 1\n\
         WIDTH {}\n\
         HEIGHT 1\n\
         VIEWPOINT 0 0 0 1 0 0 0\n\
         POINTS {}\n\
         DATA binary\n",
        cloud.len(),
        cloud.len()
    )?;
    for p in &cloud.points {
        out.write_all(&p.x.to_le_bytes())?;
        out.write_all(&p.y.to_le_bytes())?;
        out.write_all(&p.z.to_le_bytes())?;
        out.write_all(&p.intensity.to_le_bytes())?;
    }
    out.flush()
}
