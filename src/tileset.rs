//! TileSet: the flat 3-D array of root tiles, the active view strategy, the
//! colormap state, and the per-frame traversal that lazily rebuilds stale
//! resources.
//!
//! All GPU work happens here on the render thread. Asynchronous slice
//! completions arrive through an mpsc channel stamped with the source
//! revision they were started under; the traversal discards events whose
//! revision no longer matches instead of cancelling in-flight fetches.

use std::sync::mpsc::{channel, Receiver, Sender};

use glam::Mat4;

use crate::colormap::{ColorMapImage, ColorMapState};
use crate::error::VolumeResult;
use crate::geo::Reprojector;
use crate::grid::{TileKey, VolumeExtent};
use crate::primitive::{
    FrameUniform, GeometryContext, TilePrimitive, ViewParams, VolumePipeline, VolumeView,
    FRAME_FLAG_CLAMP, FRAME_FLAG_COLORMAP,
};
use crate::source::{SliceEvent, SliceSink, VolumeSource};
use crate::texture::{TextureState, TileTexture};

/// Host camera state for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameParams {
    pub view_proj: Mat4,
}

/// Counters produced by one `update` traversal.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameStats {
    pub tiles: usize,
    pub textures_ready: usize,
    pub draw_commands: usize,
    pub slices_applied: usize,
    pub slices_stale: usize,
}

/// One cell of the root tile grid, holding its current texture and primitive
/// with the revisions they were built for. The two revisions are independent:
/// a source swap invalidates textures, a view parameter change invalidates
/// geometry.
pub struct Tile {
    pub key: TileKey,
    pub extent: VolumeExtent,
    pub texture: Option<TileTexture>,
    pub texture_revision: u64,
    pub primitive: Option<TilePrimitive>,
    pub primitive_revision: u64,
    pub load_started: bool,
}

pub struct TileSet {
    pipeline: VolumePipeline,
    display_srs: String,
    source: Option<VolumeSource>,
    reprojector: Reprojector,
    source_revision: u64,
    tiles: Vec<Tile>,
    view: VolumeView,
    colormap: ColorMapState,
    vertical_scale: f64,
    frame_uniform: wgpu::Buffer,
    frame_group: wgpu::BindGroup,
    slice_tx: Sender<SliceEvent>,
    slice_rx: Receiver<SliceEvent>,
    draw_list: Vec<usize>,
}

impl TileSet {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        display_srs: impl Into<String>,
        view: VolumeView,
        color_format: wgpu::TextureFormat,
        depth_format: Option<wgpu::TextureFormat>,
    ) -> Self {
        let pipeline = VolumePipeline::new(device, queue, color_format, depth_format);
        let frame_uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("strata3d.frame.uniform"),
            size: std::mem::size_of::<FrameUniform>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_group = pipeline.create_frame_bind_group(device, &frame_uniform, None);
        let (slice_tx, slice_rx) = channel();

        Self {
            pipeline,
            display_srs: display_srs.into(),
            source: None,
            reprojector: Reprojector::identity(),
            source_revision: 0,
            tiles: Vec::new(),
            view,
            colormap: ColorMapState::new(),
            vertical_scale: 1.0,
            frame_uniform,
            frame_group,
            slice_tx,
            slice_rx,
            draw_list: Vec::new(),
        }
    }

    pub fn source_revision(&self) -> u64 {
        self.source_revision
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn view(&self) -> &VolumeView {
        &self.view
    }

    /// Strategy parameter setters live on the views themselves; they bump the
    /// view revision so the next traversal rebuilds geometry.
    pub fn view_mut(&mut self) -> &mut VolumeView {
        &mut self.view
    }

    /// Replace the data source. Validates the grid and the CRS pair first, so
    /// a bad configuration fails fast and leaves the current tiles untouched.
    /// On success every root tile is destroyed, the source revision advances
    /// (orphaning all in-flight slice fetches), and the flat tile array is
    /// rebuilt from the new grid.
    pub fn set_source(&mut self, source: Option<VolumeSource>) -> VolumeResult<()> {
        let reprojector = match &source {
            Some(src) => {
                src.grid.validate()?;
                Reprojector::new(&src.grid.srs, &self.display_srs)?
            }
            None => Reprojector::identity(),
        };

        self.tiles.clear();
        self.draw_list.clear();
        self.source_revision += 1;
        self.reprojector = reprojector;

        if let Some(src) = &source {
            self.tiles = src
                .grid
                .keys()
                .map(|key| Tile {
                    key,
                    extent: src.grid.tile_extent(key),
                    texture: None,
                    texture_revision: 0,
                    primitive: None,
                    primitive_revision: 0,
                    load_started: false,
                })
                .collect();
            log::info!(
                "volume source set: {} root tiles, revision {}",
                self.tiles.len(),
                self.source_revision
            );
        } else {
            log::info!("volume source cleared, revision {}", self.source_revision);
        }
        self.source = source;
        Ok(())
    }

    /// Swap the active view strategy. Existing tiles keep their stale
    /// primitive revisions and rebuild against the new strategy on the next
    /// traversal.
    pub fn set_view(&mut self, view: VolumeView) {
        self.view = view;
    }

    pub fn set_view_mode(&mut self, id: &str, params: ViewParams) -> VolumeResult<()> {
        self.view = VolumeView::create(id, params)?;
        Ok(())
    }

    pub fn set_color_map(&mut self, image: Option<ColorMapImage>) {
        self.colormap.set_image(image);
    }

    pub fn set_map_range(&mut self, min: f32, max: f32) {
        self.colormap.params.range = (min, max);
    }

    pub fn set_clamp(&mut self, clamp: bool) {
        self.colormap.params.clamp = clamp;
    }

    pub fn set_no_data_value(&mut self, value: f32) {
        self.colormap.params.no_data_value = value;
    }

    /// Vertical exaggeration participates in vertex positions, so changing it
    /// invalidates the active view's geometry.
    pub fn set_vertical_scale(&mut self, scale: f64) {
        self.vertical_scale = scale;
        self.view.invalidate();
    }

    /// Per-frame traversal: drain arrived slices (epoch-guarded), apply a
    /// pending colormap upload, rebuild stale textures/primitives, kick off
    /// tile loads, and collect the frame draw list.
    pub fn update(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        frame: &FrameParams,
    ) -> FrameStats {
        let mut stats = FrameStats::default();

        while let Ok(event) = self.slice_rx.try_recv() {
            if event.revision != self.source_revision {
                stats.slices_stale += 1;
                log::debug!(
                    "discarding stale slice for {:?} (revision {} != {})",
                    event.key,
                    event.revision,
                    self.source_revision
                );
                continue;
            }
            let index = match &self.source {
                Some(src) => src.grid.tile_index(event.key),
                None => continue,
            };
            let tile = match self.tiles.get_mut(index) {
                Some(tile) => tile,
                None => continue,
            };
            if let Some(texture) = tile.texture.as_mut() {
                match texture.update_texture_slice(device, queue, event.total, &event.slice) {
                    Ok(()) => stats.slices_applied += 1,
                    Err(e) => log::warn!("slice upload for {:?} rejected: {}", event.key, e),
                }
            }
        }

        if self.colormap.apply_pending(device, queue) {
            self.frame_group = self.pipeline.create_frame_bind_group(
                device,
                &self.frame_uniform,
                self.colormap.lut_view(),
            );
        }
        self.write_frame_uniform(queue, frame);

        for i in 0..self.tiles.len() {
            self.update_tile_for_rendering(device, queue, i);
        }

        self.draw_list.clear();
        for (i, tile) in self.tiles.iter().enumerate() {
            stats.tiles += 1;
            let texture = match &tile.texture {
                Some(texture) => texture,
                None => continue,
            };
            if texture.state() == TextureState::Ready {
                stats.textures_ready += 1;
            }
            if let Some(primitive) = &tile.primitive {
                // Partial atlases render by design; unwritten texels stay
                // transparent.
                if texture.is_renderable() {
                    self.draw_list.push(i);
                    stats.draw_commands += primitive.draw_count();
                }
            }
        }
        stats
    }

    fn write_frame_uniform(&self, queue: &wgpu::Queue, frame: &FrameParams) {
        let params = &self.colormap.params;
        let mut flags = 0u32;
        if self.colormap.is_active() {
            flags |= FRAME_FLAG_COLORMAP;
        }
        if params.clamp {
            flags |= FRAME_FLAG_CLAMP;
        }
        let uniform = FrameUniform {
            view_proj: frame.view_proj.to_cols_array_2d(),
            range_min: params.range.0,
            range_max: params.range.1,
            no_data: params.no_data_value,
            flags,
        };
        queue.write_buffer(&self.frame_uniform, 0, bytemuck::bytes_of(&uniform));
    }

    fn update_tile_for_rendering(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, i: usize) {
        let source = match &self.source {
            Some(source) => source,
            None => return,
        };
        let tile = &mut self.tiles[i];

        // Texture epoch: rebuild only when the source revision moved past the
        // stamp, keeping the texture object identity-stable otherwise.
        if tile.texture.is_none() || tile.texture_revision < self.source_revision {
            tile.texture = Some(TileTexture::new(
                source.grid.tile_size,
                tile.extent.min_z,
                tile.extent.max_z,
            ));
            tile.texture_revision = self.source_revision;
            tile.load_started = false;
        }

        let view_revision = self.view.revision();
        if tile.primitive_revision != view_revision {
            let ctx = GeometryContext {
                extent: tile.extent,
                reprojector: &self.reprojector,
                vertical_scale: self.vertical_scale,
            };
            let mesh = self.view.build_mesh(&ctx);
            tile.primitive = if mesh.is_empty() {
                None
            } else {
                Some(TilePrimitive::new(device, &self.pipeline, &mesh))
            };
            tile.primitive_revision = view_revision;
        }

        if let (Some(primitive), Some(texture)) = (tile.primitive.as_mut(), tile.texture.as_ref())
        {
            if !primitive.has_volume() && texture.is_renderable() {
                primitive.attach_texture(device, queue, &self.pipeline, texture);
            }
        }

        if !tile.load_started {
            let sink = SliceSink::new(self.slice_tx.clone(), self.source_revision);
            source.load_tile_data(tile.key, &sink);
            tile.load_started = true;
        }
    }

    /// Encode the draw list collected by the last `update`.
    pub fn render<'p>(&'p self, pass: &mut wgpu::RenderPass<'p>) {
        if self.draw_list.is_empty() {
            return;
        }
        pass.set_pipeline(&self.pipeline.pipeline);
        pass.set_bind_group(0, &self.frame_group, &[]);
        for &i in &self.draw_list {
            if let Some(primitive) = &self.tiles[i].primitive {
                primitive.render(pass);
            }
        }
    }
}
