//! Tile grid model: the 3-D axis-aligned extent of a volume dataset and its
//! division into a flat grid of root tiles.

use serde::{Deserialize, Serialize};

use crate::error::{VolumeError, VolumeResult};

/// Axis-aligned 3-D extent in dataset coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeExtent {
    pub min_x: f64,
    pub min_y: f64,
    pub min_z: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub max_z: f64,
}

impl VolumeExtent {
    pub fn new(min_x: f64, min_y: f64, min_z: f64, max_x: f64, max_y: f64, max_z: f64) -> Self {
        Self {
            min_x,
            min_y,
            min_z,
            max_x,
            max_y,
            max_z,
        }
    }

    pub fn size_x(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn size_y(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn size_z(&self) -> f64 {
        self.max_z - self.min_z
    }

    pub fn center(&self) -> [f64; 3] {
        [
            (self.min_x + self.max_x) * 0.5,
            (self.min_y + self.max_y) * 0.5,
            (self.min_z + self.max_z) * 0.5,
        ]
    }

    pub fn contains(&self, x: f64, y: f64, z: f64) -> bool {
        x >= self.min_x
            && x <= self.max_x
            && y >= self.min_y
            && y <= self.max_y
            && z >= self.min_z
            && z <= self.max_z
    }

    /// Map a point into [0, 1]^3 relative to this extent. Not clamped.
    pub fn normalize(&self, x: f64, y: f64, z: f64) -> [f64; 3] {
        [
            (x - self.min_x) / self.size_x(),
            (y - self.min_y) / self.size_y(),
            (z - self.min_z) / self.size_z(),
        ]
    }

    /// Each axis must be ordered (`min < max`).
    pub fn validate(&self) -> VolumeResult<()> {
        for (name, min, max) in [
            ("x", self.min_x, self.max_x),
            ("y", self.min_y, self.max_y),
            ("z", self.min_z, self.max_z),
        ] {
            if !(min < max) {
                return Err(VolumeError::InvalidGrid(format!(
                    "extent {} axis is not ordered: min={}, max={}",
                    name, min, max
                )));
            }
        }
        Ok(())
    }
}

/// Address of one cell in the root tile grid.
///
/// `level` is reserved for future subdivision; the current engine is
/// single-level, so it is always 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileKey {
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl TileKey {
    pub fn new(level: u32, x: u32, y: u32, z: u32) -> Self {
        Self { level, x, y, z }
    }

    pub fn root(x: u32, y: u32, z: u32) -> Self {
        Self::new(0, x, y, z)
    }
}

/// Description of a volume dataset's tiling: spatial extent, its coordinate
/// reference system, the count of root tiles per axis, and the pixel
/// footprint of one slice within a tile's atlas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileGrid {
    pub extent: VolumeExtent,
    pub srs: String,
    pub num_root_tiles: [u32; 3],
    pub tile_size: [u32; 2],
}

impl TileGrid {
    /// Fail fast on a malformed grid description (programmer error).
    pub fn validate(&self) -> VolumeResult<()> {
        self.extent.validate()?;
        if self.num_root_tiles[0] == 0 || self.num_root_tiles[1] == 0 {
            return Err(VolumeError::InvalidGrid(format!(
                "num_root_tiles must be >= 1 per axis, got {:?}",
                self.num_root_tiles
            )));
        }
        if self.tile_size[0] == 0 || self.tile_size[1] == 0 {
            return Err(VolumeError::InvalidGrid(format!(
                "tile_size must be >= 1 pixel per axis, got {:?}",
                self.tile_size
            )));
        }
        Ok(())
    }

    fn tiles_per_axis(&self) -> [u32; 3] {
        [
            self.num_root_tiles[0],
            self.num_root_tiles[1],
            self.num_root_tiles[2].max(1),
        ]
    }

    /// Absolute sub-extent of one tile, derived by dividing the grid extent
    /// per axis by the root-tile count scaled by `2^level`.
    pub fn tile_extent(&self, key: TileKey) -> VolumeExtent {
        let n = self.tiles_per_axis();
        let nx = (n[0] << key.level) as f64;
        let ny = (n[1] << key.level) as f64;
        let nz = (n[2] << key.level) as f64;
        let step_x = self.extent.size_x() / nx;
        let step_y = self.extent.size_y() / ny;
        let step_z = self.extent.size_z() / nz;
        let min_x = self.extent.min_x + key.x as f64 * step_x;
        let min_y = self.extent.min_y + key.y as f64 * step_y;
        let min_z = self.extent.min_z + key.z as f64 * step_z;
        VolumeExtent::new(
            min_x,
            min_y,
            min_z,
            min_x + step_x,
            min_y + step_y,
            min_z + step_z,
        )
    }

    pub fn tile_count(&self) -> u32 {
        let n = self.tiles_per_axis();
        n[0] * n[1] * n[2]
    }

    /// Flat index of a root tile in canonical x-outer / y / z-inner order.
    pub fn tile_index(&self, key: TileKey) -> usize {
        let n = self.tiles_per_axis();
        ((key.x * n[1] + key.y) * n[2] + key.z) as usize
    }

    /// Root tile keys in canonical x-outer / y / z-inner order.
    pub fn keys(&self) -> impl Iterator<Item = TileKey> {
        let n = self.tiles_per_axis();
        (0..n[0]).flat_map(move |x| {
            (0..n[1]).flat_map(move |y| (0..n[2]).map(move |z| TileKey::root(x, y, z)))
        })
    }
}
