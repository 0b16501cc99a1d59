pub mod clipper;
pub mod extract;
pub mod lod;
pub mod simplifier;
pub mod strategy;

pub use extract::TileExtractor;
pub use lod::{LodLadder, LodLevel, build_lod_ladder};
pub use simplifier::{Decimator, MeshoptDecimator};
pub use strategy::SlicingStrategy;
