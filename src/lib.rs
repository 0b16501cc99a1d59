pub mod codec;
pub mod config;
pub mod density;
pub mod error;
pub mod geo;
pub mod incremental;
pub mod index;
pub mod ingestion;
pub mod orchestrator;
pub mod progress;
pub mod repository;
pub mod service;
pub mod spatial;
pub mod storage;
pub mod tiling;
pub mod tileset;
pub mod types;

pub use config::{OutputFormat, StorageKind, StrategyKind, TilingConfig};
pub use error::{Result, TilerError};
pub use orchestrator::{Orchestrator, RunSummary};
pub use service::{ServiceSettings, TaskService};
pub use types::{BoundingBox, Tile, TileCoord, TilingTask};
