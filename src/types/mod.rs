pub mod mesh;
pub mod task;
pub mod tile;

pub use mesh::{IndexedMesh, Triangle, Vertex, triangles_bounds};
pub use task::{TaskStatus, TilingTask, now_millis};
pub use tile::{BoundingBox, MIN_EXTENT, Tile, TileCoord, TileDescriptor};
