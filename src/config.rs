use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapperError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
    #[error("failed to write map file {path}: {source}")]
    MapWrite {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Publish the raw input cloud instead of the downsampled one.
    pub dense_map_enable: bool,
    /// Directory the map is written to on shutdown.
    pub map_file_path: PathBuf,
    /// Corner leaf size; the surface-only pipeline keeps it for config
    /// compatibility but never reads it.
    pub filter_size_corner: f32,
    /// Leaf size for the input cloud and freshly touched cubes.
    pub filter_size_surf: f32,
    /// Leaf size for the materialized submap.
    pub filter_size_map: f32,
    /// Cube side length of the sliding map grid, meters.
    pub cube_side_length: f32,
    /// Keep the rotation rows of the anchoring vector during the init
    /// window. Clearing this reproduces the legacy overwrite, which anchors
    /// translation through the rotation rows instead.
    pub init_anchor_rotation: bool,
    /// Listen address of the transport shell.
    pub bind_addr: String,
}

impl Default for MapperConfig {
    fn default() -> Self {
        MapperConfig {
            dense_map_enable: true,
            map_file_path: PathBuf::from("."),
            filter_size_corner: 0.5,
            filter_size_surf: 0.5,
            filter_size_map: 0.5,
            cube_side_length: 50.0,
            init_anchor_rotation: true,
            bind_addr: "0.0.0.0:3000".into(),
        }
    }
}

impl MapperConfig {
    pub fn load(path: &Path) -> Result<Self, MapperError> {
        let file = File::open(path).map_err(|source| MapperError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_reader(file)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MapperConfig::default();
        assert!(config.dense_map_enable);
        assert_eq!(config.cube_side_length, 50.0);
        assert!(config.init_anchor_rotation);
    }

    #[test]
    fn test_partial_yaml_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join("lio_mapper_config_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("mapper.yaml");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "filter_size_surf: 0.2\ncube_side_length: 25.0").unwrap();
        drop(file);

        let config = MapperConfig::load(&path).unwrap();
        assert_eq!(config.filter_size_surf, 0.2);
        assert_eq!(config.cube_side_length, 25.0);
        assert_eq!(config.filter_size_map, 0.5);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let missing = Path::new("/nonexistent/lio-mapper.yaml");
        assert!(matches!(
            MapperConfig::load(missing),
            Err(MapperError::ConfigRead { .. })
        ));
    }
}
