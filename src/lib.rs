//! strata3d: volumetric tile rendering core for map engines.
//!
//! Streams a 3-D scalar field (x, y, height) as per-tile z-slices, packs the
//! slices into 2-D texture atlases that emulate 3-D textures on 2-D sampling
//! hardware, and renders each tile either as a stack of semi-transparent
//! horizontal slabs or as orthogonal cross-section planes. The host engine
//! owns camera, scene composition and presentation; this crate exposes a
//! per-frame `update` + `render` pair and synchronous mutators, and consumes
//! an injected slice-request generator, an optional slice decoder, and a
//! byte transport.
//!
//! Asynchronous slice arrivals are reconciled with the render loop through
//! revision (epoch) counters instead of cancellation: every completion
//! carries the source revision it was started under and is discarded when it
//! no longer matches.

pub mod colormap;
pub mod error;
pub mod geo;
pub mod gpu;
pub mod grid;
pub mod layer;
pub mod primitive;
pub mod source;
pub mod texture;
pub mod tileset;

pub use colormap::{ColorMapImage, ColorMapParams};
pub use error::{VolumeError, VolumeResult};
pub use grid::{TileGrid, TileKey, VolumeExtent};
pub use layer::VolumeLayer;
pub use primitive::{SliceView, StackView, ViewParams, VolumeView};
pub use source::{
    FetchDone, HttpTransport, Slice, SliceData, SliceDecoder, SliceRequest, SliceRequests,
    SliceTransport, VolumeSource,
};
pub use texture::{slice_grid_size, AtlasLayout, TextureState, TileTexture};
pub use tileset::{FrameParams, FrameStats, TileSet};
