//! Tile primitives: shared geometry/pipeline construction and the pluggable
//! view strategies that turn a tile's atlas into renderable geometry.

mod slice;
mod stack;

pub use slice::SliceView;
pub use stack::StackView;

use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::error::{VolumeError, VolumeResult};
use crate::geo::Reprojector;
use crate::grid::VolumeExtent;
use crate::texture::{PayloadKind, TileTexture};

/// Monotone revision source shared by every view. A fresh value per view
/// construction and per parameter change means no two geometry generations
/// ever share a revision, so swapping strategies always triggers rebuilds.
static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

fn next_revision() -> u64 {
    NEXT_REVISION.fetch_add(1, Ordering::Relaxed)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct VolumeVertex {
    pub position: [f32; 3],
    pub uvw: [f32; 3],
}

/// One draw command's index sub-range within a tile's index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRange {
    pub first: u32,
    pub count: u32,
}

/// CPU-side geometry for one tile, before GPU upload.
#[derive(Debug, Default)]
pub struct VolumeMesh {
    pub vertices: Vec<VolumeVertex>,
    pub indices: Vec<u32>,
    pub draws: Vec<DrawRange>,
}

impl VolumeMesh {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Append an axis-aligned quad given its four corners in v0/v1/v2/v3
    /// order (v1 adjacent to v0 along the first axis, v2 along the second).
    pub fn push_quad(&mut self, corners: [VolumeVertex; 4]) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&corners);
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 1, base + 3]);
    }
}

/// Explicit reprojection dependency handed to geometry builders: tile-local
/// x/y go through the display transform, heights only through the vertical
/// exaggeration factor.
pub struct GeometryContext<'a> {
    pub extent: VolumeExtent,
    pub reprojector: &'a Reprojector,
    pub vertical_scale: f64,
}

impl GeometryContext<'_> {
    pub fn vertex(&self, x: f64, y: f64, z: f64, uvw: [f32; 3]) -> VolumeVertex {
        let (dx, dy) = self.reprojector.to_display(x, y);
        VolumeVertex {
            position: [dx as f32, dy as f32, (z * self.vertical_scale) as f32],
            uvw,
        }
    }
}

/// Factory parameters for [`VolumeView::create`].
#[derive(Debug, Clone, Default)]
pub struct ViewParams {
    pub num_slices: Option<u32>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

/// The closed set of view strategies. Both share the tile/texture lifecycle
/// and differ only in the geometry they generate.
pub enum VolumeView {
    Stack(StackView),
    Slice(SliceView),
}

impl VolumeView {
    /// String-id factory, the extension point for hosts that configure the
    /// view mode from data.
    pub fn create(id: &str, params: ViewParams) -> VolumeResult<Self> {
        match id {
            "stack" => Ok(VolumeView::Stack(StackView::new(
                params.num_slices.unwrap_or(16),
            ))),
            "slice" => Ok(VolumeView::Slice(SliceView::new(
                params.x, params.y, params.z,
            ))),
            other => Err(VolumeError::UnknownView(other.to_string())),
        }
    }

    pub fn revision(&self) -> u64 {
        match self {
            VolumeView::Stack(v) => v.revision(),
            VolumeView::Slice(v) => v.revision(),
        }
    }

    /// Force a fresh revision without a parameter change (e.g. when a
    /// geometry input outside the view, like vertical scale, moves).
    pub fn invalidate(&mut self) {
        match self {
            VolumeView::Stack(v) => v.touch(),
            VolumeView::Slice(v) => v.touch(),
        }
    }

    pub fn build_mesh(&self, ctx: &GeometryContext<'_>) -> VolumeMesh {
        match self {
            VolumeView::Stack(v) => v.build_mesh(ctx),
            VolumeView::Slice(v) => v.build_mesh(ctx),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct FrameUniform {
    pub view_proj: [[f32; 4]; 4],
    pub range_min: f32,
    pub range_max: f32,
    pub no_data: f32,
    pub flags: u32,
}

pub(crate) const FRAME_FLAG_COLORMAP: u32 = 1;
pub(crate) const FRAME_FLAG_CLAMP: u32 = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct TileUniform {
    slice_cols: u32,
    slice_rows: u32,
    payload: u32,
    has_volume: u32,
}

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];

/// Shared GPU program for all tiles of a set: shader module, bind group
/// layouts (group 0 = frame/set, group 1 = per tile), pipeline, and the
/// placeholder bindings that keep every bind group complete before any
/// texture exists.
pub struct VolumePipeline {
    pub(crate) pipeline: wgpu::RenderPipeline,
    pub(crate) frame_layout: wgpu::BindGroupLayout,
    tile_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    pub(crate) placeholder_lut: wgpu::TextureView,
    placeholder_atlas: wgpu::TextureView,
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn placeholder_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    pixel: [u8; 4],
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &pixel,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(4),
            rows_per_image: Some(1),
        },
        wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

impl VolumePipeline {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        color_format: wgpu::TextureFormat,
        depth_format: Option<wgpu::TextureFormat>,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("strata3d.volume-tile.shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/volume_tile.wgsl").into()),
        });

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("strata3d.volume-tile.frame-layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::VERTEX_FRAGMENT),
                texture_entry(1),
                sampler_entry(2),
            ],
        });
        let tile_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("strata3d.volume-tile.tile-layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
                texture_entry(1),
                sampler_entry(2),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("strata3d.volume-tile.pipeline-layout"),
            bind_group_layouts: &[&frame_layout, &tile_layout],
            push_constant_ranges: &[],
        });

        // Semi-transparent slabs: alpha blend, read depth, never write it.
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("strata3d.volume-tile.pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<VolumeVertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &VERTEX_ATTRIBUTES,
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: color_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: depth_format.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("strata3d.volume-tile.sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let placeholder_lut =
            placeholder_texture(device, queue, "strata3d.placeholder-lut", [255; 4]);
        let placeholder_atlas =
            placeholder_texture(device, queue, "strata3d.placeholder-atlas", [0; 4]);

        Self {
            pipeline,
            frame_layout,
            tile_layout,
            sampler,
            placeholder_lut,
            placeholder_atlas,
        }
    }

    pub(crate) fn create_frame_bind_group(
        &self,
        device: &wgpu::Device,
        uniform: &wgpu::Buffer,
        lut_view: Option<&wgpu::TextureView>,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("strata3d.volume-tile.frame-group"),
            layout: &self.frame_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(
                        lut_view.unwrap_or(&self.placeholder_lut),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }

    fn create_tile_bind_group(
        &self,
        device: &wgpu::Device,
        uniform: &wgpu::Buffer,
        atlas_view: Option<&wgpu::TextureView>,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("strata3d.volume-tile.tile-group"),
            layout: &self.tile_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(
                        atlas_view.unwrap_or(&self.placeholder_atlas),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }
}

/// One tile's uploaded geometry plus its per-tile GPU bindings.
pub struct TilePrimitive {
    vertex_buf: wgpu::Buffer,
    index_buf: wgpu::Buffer,
    uniform_buf: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    draws: Vec<DrawRange>,
    has_volume: bool,
}

impl TilePrimitive {
    /// Upload a built mesh. The atlas binding starts as the transparent
    /// placeholder; `attach_texture` swaps the real atlas in once it exists.
    pub fn new(device: &wgpu::Device, pipeline: &VolumePipeline, mesh: &VolumeMesh) -> Self {
        let vertex_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("strata3d.tile.vertices"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("strata3d.tile.indices"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        let uniform_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("strata3d.tile.uniform"),
            contents: bytemuck::bytes_of(&TileUniform {
                slice_cols: 1,
                slice_rows: 1,
                payload: 0,
                has_volume: 0,
            }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = pipeline.create_tile_bind_group(device, &uniform_buf, None);

        Self {
            vertex_buf,
            index_buf,
            uniform_buf,
            bind_group,
            draws: mesh.draws.clone(),
            has_volume: false,
        }
    }

    pub fn has_volume(&self) -> bool {
        self.has_volume
    }

    pub fn draw_count(&self) -> usize {
        self.draws.len()
    }

    /// Bind a renderable atlas: rebuild the tile bind group around its view
    /// and flip the has-volume flag in the tile uniform.
    pub fn attach_texture(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        pipeline: &VolumePipeline,
        texture: &TileTexture,
    ) {
        let layout = match texture.layout() {
            Some(layout) => *layout,
            None => return,
        };
        queue.write_buffer(
            &self.uniform_buf,
            0,
            bytemuck::bytes_of(&TileUniform {
                slice_cols: layout.cols,
                slice_rows: layout.rows,
                payload: match texture.payload_kind() {
                    PayloadKind::Rgba => 0,
                    PayloadKind::Scalar => 1,
                },
                has_volume: 1,
            }),
        );
        self.bind_group = pipeline.create_tile_bind_group(device, &self.uniform_buf, texture.view());
        self.has_volume = true;
    }

    /// Encode this primitive's draw ranges. Group 0 must already be set.
    pub fn render<'p>(&'p self, pass: &mut wgpu::RenderPass<'p>) {
        pass.set_bind_group(1, &self.bind_group, &[]);
        pass.set_vertex_buffer(0, self.vertex_buf.slice(..));
        pass.set_index_buffer(self.index_buf.slice(..), wgpu::IndexFormat::Uint32);
        for draw in &self.draws {
            pass.draw_indexed(draw.first..draw.first + draw.count, 0, 0..1);
        }
    }
}
