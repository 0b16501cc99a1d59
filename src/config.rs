use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TilerError};
use crate::geo::GeoOrigin;
use crate::types::BoundingBox;

/// Deepest LOD level any strategy accepts.
pub const MAX_LOD_LEVEL: u32 = 20;

/// Highest accepted compression level.
pub const MAX_COMPRESSION_LEVEL: u8 = 10;

/// Spatial partitioning algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[value(name = "grid")]
    Grid,
    #[value(name = "octree")]
    Octree,
    #[value(name = "kdtree")]
    KdTree,
    #[value(name = "adaptive")]
    Adaptive,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Grid => write!(f, "grid"),
            StrategyKind::Octree => write!(f, "octree"),
            StrategyKind::KdTree => write!(f, "kdtree"),
            StrategyKind::Adaptive => write!(f, "adaptive"),
        }
    }
}

/// Encoded tile container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Batched container wrapping an embedded mesh
    #[value(name = "b3dm")]
    B3dm,
    /// Standalone mesh container
    #[value(name = "glb")]
    Glb,
    /// Structural metadata only
    #[value(name = "json")]
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::B3dm => "b3dm",
            OutputFormat::Glb => "glb",
            OutputFormat::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::B3dm => "application/octet-stream",
            OutputFormat::Glb => "model/gltf-binary",
            OutputFormat::Json => "application/json",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[value(name = "local")]
    Local,
    #[value(name = "object")]
    Object,
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageKind::Local => write!(f, "local"),
            StorageKind::Object => write!(f, "object"),
        }
    }
}

/// Immutable per-task tiling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    pub strategy: StrategyKind,
    pub max_level: u32,
    /// Base tile size in model units; 0 fits it to the model extent.
    pub tile_size: f64,
    pub output_format: OutputFormat,
    pub storage: StorageKind,
    /// Worker threads per level; 0 uses all available cores.
    pub parallelism: usize,
    pub compression_level: u8,
    pub geometric_error_threshold: f64,
    pub incremental: bool,
    /// Write tiles whose clipped geometry is empty.
    pub emit_empty_tiles: bool,
    /// Georeference the root tile; `None` keeps model coordinates.
    pub geo_origin: Option<GeoOrigin>,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Grid,
            max_level: 3,
            tile_size: 0.0,
            output_format: OutputFormat::B3dm,
            storage: StorageKind::Local,
            parallelism: 0,
            compression_level: 0,
            geometric_error_threshold: 1.0,
            incremental: false,
            emit_empty_tiles: false,
            geo_origin: None,
        }
    }
}

impl TilingConfig {
    /// Reject out-of-range parameters before any work begins.
    pub fn validate(&self) -> Result<()> {
        if self.max_level > MAX_LOD_LEVEL {
            return Err(TilerError::Validation(format!(
                "max_level {} exceeds the maximum of {MAX_LOD_LEVEL}",
                self.max_level
            )));
        }
        if !self.tile_size.is_finite() || self.tile_size < 0.0 {
            return Err(TilerError::Validation(format!(
                "tile_size must be a finite non-negative number, got {}",
                self.tile_size
            )));
        }
        if self.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(TilerError::Validation(format!(
                "compression_level {} exceeds the maximum of {MAX_COMPRESSION_LEVEL}",
                self.compression_level
            )));
        }
        if !self.geometric_error_threshold.is_finite() || self.geometric_error_threshold <= 0.0 {
            return Err(TilerError::Validation(format!(
                "geometric_error_threshold must be positive, got {}",
                self.geometric_error_threshold
            )));
        }
        if self.parallelism > 1024 {
            return Err(TilerError::Validation(format!(
                "parallelism {} is out of range (0..=1024)",
                self.parallelism
            )));
        }
        if let Some(geo) = &self.geo_origin {
            geo.validate()?;
        }
        Ok(())
    }

    /// Parallelism degree with 0 resolved to the available CPU parallelism.
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            self.parallelism
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Resolve an automatic (`0`) tile size against the model bounds.
    ///
    /// Grid and adaptive lattices span `tile_size` at level 0, so the size
    /// is the largest model extent. Octree and kd-tree leaves are
    /// `tile_size` wide at `max_level`, so the extent is divided down.
    pub fn fit_to_bounds(&self, bounds: &BoundingBox) -> TilingConfig {
        let mut out = self.clone();
        if self.tile_size > 0.0 {
            return out;
        }
        let extent = if bounds.is_empty() {
            1.0
        } else {
            bounds.max_extent().max(crate::types::MIN_EXTENT)
        };
        out.tile_size = match self.strategy {
            StrategyKind::Grid | StrategyKind::Adaptive => extent,
            StrategyKind::Octree | StrategyKind::KdTree => {
                extent / 2f64.powi(self.max_level as i32)
            }
        };
        out
    }
}

/// CLI argument definition (clap derive).
#[derive(Parser, Debug)]
#[command(
    name = "lod-tiler",
    about = "Spatial LOD tiling engine for large 3D models",
    version
)]
pub struct CliArgs {
    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Tile a model into an output directory
    Tile(TileArgs),
    /// Validate (and optionally repair) the index of an output directory
    Validate {
        /// Output directory of a previous run
        #[arg(short = 'o', long)]
        output: PathBuf,

        /// Attempt automated repair when validation fails
        #[arg(long)]
        repair: bool,
    },
    /// Decode a single tile file and print its summary
    Inspect {
        /// Tile file (.b3dm, .glb or .json)
        file: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
pub struct TileArgs {
    /// Input model (OBJ, PLY, STL, glTF, GLB) or a `synthetic:` source
    #[arg(short = 'i', long)]
    pub input: String,

    /// Output directory
    #[arg(short = 'o', long)]
    pub output: PathBuf,

    /// Partitioning strategy
    #[arg(long, value_enum, default_value = "grid")]
    pub strategy: StrategyKind,

    /// Deepest LOD level (0-20)
    #[arg(long, default_value_t = 3)]
    pub max_level: u32,

    /// Base tile size in model units (0 = fit to model)
    #[arg(long, default_value_t = 0.0)]
    pub tile_size: f64,

    /// Tile container format
    #[arg(long, value_enum, default_value = "b3dm")]
    pub format: OutputFormat,

    /// Compression level (0-10)
    #[arg(long, default_value_t = 0)]
    pub compression: u8,

    /// Geometric error floor for inner levels
    #[arg(long, default_value_t = 1.0)]
    pub error_threshold: f64,

    /// Only rewrite tiles whose fingerprint changed
    #[arg(long)]
    pub incremental: bool,

    /// Also write tiles without geometry
    #[arg(long)]
    pub emit_empty: bool,

    /// Worker thread count (default: all cores)
    #[arg(short = 'j', long, default_value_t = 0)]
    pub threads: usize,

    /// Origin longitude in degrees (georeferences the tileset)
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lon: Option<f64>,

    /// Origin latitude in degrees
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Origin height above the ellipsoid in metres
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub height: f64,
}

impl From<&TileArgs> for TilingConfig {
    fn from(args: &TileArgs) -> Self {
        TilingConfig {
            strategy: args.strategy,
            max_level: args.max_level,
            tile_size: args.tile_size,
            output_format: args.format,
            storage: StorageKind::Local,
            parallelism: args.threads,
            compression_level: args.compression,
            geometric_error_threshold: args.error_threshold,
            incremental: args.incremental,
            emit_empty_tiles: args.emit_empty,
            geo_origin: args
                .lon
                .zip(args.lat)
                .map(|(lon, lat)| GeoOrigin::new(lon, lat, args.height)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tiling_config() {
        let tc = TilingConfig::default();
        assert_eq!(tc.strategy, StrategyKind::Grid);
        assert_eq!(tc.max_level, 3);
        assert_eq!(tc.output_format, OutputFormat::B3dm);
        assert!(!tc.incremental);
        assert!(tc.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let c = TilingConfig {
            max_level: 21,
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(TilerError::Validation(_))));

        let c = TilingConfig {
            tile_size: -1.0,
            ..Default::default()
        };
        assert!(c.validate().is_err());

        let c = TilingConfig {
            tile_size: f64::NAN,
            ..Default::default()
        };
        assert!(c.validate().is_err());

        let c = TilingConfig {
            compression_level: 11,
            ..Default::default()
        };
        assert!(c.validate().is_err());

        let c = TilingConfig {
            geometric_error_threshold: 0.0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn effective_parallelism_resolves_zero() {
        let c = TilingConfig::default();
        assert!(c.effective_parallelism() >= 1);
        let c = TilingConfig {
            parallelism: 3,
            ..Default::default()
        };
        assert_eq!(c.effective_parallelism(), 3);
    }

    #[test]
    fn fit_to_bounds_per_strategy() {
        let bounds = BoundingBox::new([0.0; 3], [80.0, 40.0, 10.0]);
        let grid = TilingConfig::default().fit_to_bounds(&bounds);
        assert_eq!(grid.tile_size, 80.0);

        let octree = TilingConfig {
            strategy: StrategyKind::Octree,
            max_level: 3,
            ..Default::default()
        }
        .fit_to_bounds(&bounds);
        assert_eq!(octree.tile_size, 10.0);

        let fixed = TilingConfig {
            tile_size: 25.0,
            ..Default::default()
        }
        .fit_to_bounds(&bounds);
        assert_eq!(fixed.tile_size, 25.0);
    }

    #[test]
    fn enum_display() {
        assert_eq!(StrategyKind::KdTree.to_string(), "kdtree");
        assert_eq!(OutputFormat::Glb.to_string(), "glb");
        assert_eq!(StorageKind::Object.to_string(), "object");
    }

    #[test]
    fn config_serde_lowercase_enums() {
        let json = serde_json::to_value(TilingConfig::default()).unwrap();
        assert_eq!(json["strategy"], "grid");
        assert_eq!(json["output_format"], "b3dm");
        let partial: TilingConfig = serde_json::from_str(r#"{"strategy":"octree"}"#).unwrap();
        assert_eq!(partial.strategy, StrategyKind::Octree);
        assert_eq!(partial.max_level, 3);
    }

    #[test]
    fn cli_args_to_tiling_config() {
        let args = CliArgs::parse_from([
            "lod-tiler",
            "-v",
            "tile",
            "-i",
            "model.obj",
            "-o",
            "./out",
            "--strategy",
            "adaptive",
            "--max-level",
            "5",
            "--tile-size",
            "64",
            "--format",
            "glb",
            "--incremental",
            "-j",
            "8",
        ]);

        assert!(args.verbose);
        let Command::Tile(tile) = &args.command else {
            panic!("expected tile subcommand");
        };
        let config: TilingConfig = tile.into();
        assert_eq!(tile.input, "model.obj");
        assert_eq!(tile.output, PathBuf::from("./out"));
        assert_eq!(config.strategy, StrategyKind::Adaptive);
        assert_eq!(config.max_level, 5);
        assert_eq!(config.tile_size, 64.0);
        assert_eq!(config.output_format, OutputFormat::Glb);
        assert!(config.incremental);
        assert_eq!(config.parallelism, 8);
        assert!(config.geo_origin.is_none());
    }

    #[test]
    fn cli_geo_origin() {
        let args = CliArgs::parse_from([
            "lod-tiler", "tile", "-i", "m.ply", "-o", "out", "--lon", "-0.1278", "--lat",
            "51.5074", "--height", "35",
        ]);
        let Command::Tile(tile) = &args.command else {
            panic!("expected tile subcommand");
        };
        let config = TilingConfig::from(tile);
        assert_eq!(config.geo_origin, Some(GeoOrigin::new(-0.1278, 51.5074, 35.0)));

        // Longitude alone is not an origin.
        assert!(CliArgs::try_parse_from(["lod-tiler", "tile", "-i", "m", "-o", "o", "--lon", "1"]).is_err());
    }

    #[test]
    fn validate_checks_geo_origin() {
        let c = TilingConfig {
            geo_origin: Some(GeoOrigin::new(0.0, 95.0, 0.0)),
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(TilerError::Validation(_))));

        let json = serde_json::to_string(&TilingConfig {
            geo_origin: Some(GeoOrigin::new(10.0, 20.0, 0.0)),
            ..Default::default()
        })
        .unwrap();
        let back: TilingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.geo_origin.map(|g| g.latitude), Some(20.0));
    }

    #[test]
    fn cli_args_validate_subcommand() {
        let args = CliArgs::parse_from(["lod-tiler", "validate", "-o", "out", "--repair"]);
        match args.command {
            Command::Validate { output, repair } => {
                assert_eq!(output, PathBuf::from("out"));
                assert!(repair);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
