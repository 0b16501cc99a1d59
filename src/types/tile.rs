use serde::{Deserialize, Serialize};

/// Minimum extent on every axis; degenerate boxes are widened to this.
pub const MIN_EXTENT: f64 = 1e-6;

/// Axis-aligned bounding box in 3-D.
///
/// Serialized as the six doubles `[minX, minY, minZ, maxX, maxY, maxZ]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 6]", into = "[f64; 6]")]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingBox {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// Box that contains nothing; merging anything into it yields that thing.
    pub fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.max[i] < self.min[i])
    }

    /// Centre point of the box.
    pub fn center(&self) -> [f64; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Half-extents along each axis.
    pub fn half_extents(&self) -> [f64; 3] {
        [
            (self.max[0] - self.min[0]) * 0.5,
            (self.max[1] - self.min[1]) * 0.5,
            (self.max[2] - self.min[2]) * 0.5,
        ]
    }

    /// Full extents along each axis.
    pub fn extents(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Largest extent over the three axes.
    pub fn max_extent(&self) -> f64 {
        let e = self.extents();
        e[0].max(e[1]).max(e[2])
    }

    /// Length of the space diagonal.
    pub fn diagonal(&self) -> f64 {
        let [dx, dy, dz] = self.extents();
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn volume(&self) -> f64 {
        let [dx, dy, dz] = self.extents();
        dx * dy * dz
    }

    /// Whether a point lies inside (or on the boundary of) the box.
    pub fn contains_point(&self, p: [f64; 3]) -> bool {
        p[0] >= self.min[0]
            && p[0] <= self.max[0]
            && p[1] >= self.min[1]
            && p[1] <= self.max[1]
            && p[2] >= self.min[2]
            && p[2] <= self.max[2]
    }

    /// Whether the two boxes share any point (touching counts).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        (0..3).all(|i| self.min[i] <= other.max[i] && other.min[i] <= self.max[i])
    }

    /// Return the smallest box that contains both `self` and `other`.
    pub fn merge(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: [
                self.min[0].min(other.min[0]),
                self.min[1].min(other.min[1]),
                self.min[2].min(other.min[2]),
            ],
            max: [
                self.max[0].max(other.max[0]),
                self.max[1].max(other.max[1]),
                self.max[2].max(other.max[2]),
            ],
        }
    }

    /// Grow the box to include a point.
    pub fn include_point(&mut self, p: [f64; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    /// Box padded by `pad` on every side.
    pub fn expanded(&self, pad: f64) -> BoundingBox {
        BoundingBox {
            min: [self.min[0] - pad, self.min[1] - pad, self.min[2] - pad],
            max: [self.max[0] + pad, self.max[1] + pad, self.max[2] + pad],
        }
    }

    /// Box shifted by `offset`.
    pub fn translated(&self, offset: [f64; 3]) -> BoundingBox {
        BoundingBox {
            min: [
                self.min[0] + offset[0],
                self.min[1] + offset[1],
                self.min[2] + offset[2],
            ],
            max: [
                self.max[0] + offset[0],
                self.max[1] + offset[1],
                self.max[2] + offset[2],
            ],
        }
    }

    /// Enforce `max >= min + MIN_EXTENT` on every axis.
    ///
    /// Inverted axes are swapped first; collapsed axes are widened around
    /// their centre rather than rejected.
    pub fn normalized(&self) -> BoundingBox {
        let mut out = *self;
        for i in 0..3 {
            if out.max[i] < out.min[i] {
                std::mem::swap(&mut out.min[i], &mut out.max[i]);
            }
            if out.max[i] - out.min[i] < MIN_EXTENT {
                let c = (out.min[i] + out.max[i]) * 0.5;
                out.min[i] = c - MIN_EXTENT * 0.5;
                out.max[i] = c + MIN_EXTENT * 0.5;
            }
        }
        out
    }

    pub fn to_array(&self) -> [f64; 6] {
        (*self).into()
    }

    /// Component-wise comparison within `eps`.
    pub fn approx_eq(&self, other: &BoundingBox, eps: f64) -> bool {
        (0..3).all(|i| {
            (self.min[i] - other.min[i]).abs() <= eps && (self.max[i] - other.max[i]).abs() <= eps
        })
    }
}

impl From<[f64; 6]> for BoundingBox {
    fn from(v: [f64; 6]) -> Self {
        BoundingBox {
            min: [v[0], v[1], v[2]],
            max: [v[3], v[4], v[5]],
        }
    }
}

impl From<BoundingBox> for [f64; 6] {
    fn from(b: BoundingBox) -> Self {
        [b.min[0], b.min[1], b.min[2], b.max[0], b.max[1], b.max[2]]
    }
}

/// Grid address of a tile, unique within a task.
///
/// Ordering is by level, then X, Y, Z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl TileCoord {
    pub fn new(level: u32, x: u32, y: u32, z: u32) -> Self {
        Self { level, x, y, z }
    }

    /// Human-readable name used in batch tables: `tile_L_X_Y_Z`.
    pub fn name(&self) -> String {
        format!("tile_{}_{}_{}_{}", self.level, self.x, self.y, self.z)
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}/{}", self.level, self.x, self.y, self.z)
    }
}

/// One tile produced by a partitioning strategy, before encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct TileDescriptor {
    pub coord: TileCoord,
    /// Declared box written to the manifests.
    pub bounds: BoundingBox,
    /// Partition cell the geometry is clipped to. Equal to `bounds` unless
    /// the strategy pads the declared box.
    pub cell: BoundingBox,
    pub geometric_error: f64,
    /// Estimated encoded size in bytes.
    pub estimated_size: u64,
    /// Composite density in [0, 1]; only set by the adaptive strategy.
    pub density: Option<f64>,
}

/// Persisted tile row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub id: u64,
    pub task_id: u64,
    pub coord: TileCoord,
    pub bounds: BoundingBox,
    /// Storage path of the encoded content.
    pub path: String,
    /// Encoded size in bytes.
    pub size: u64,
    /// Hex SHA-256 fingerprint, recorded when incremental mode is on.
    pub content_hash: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}
