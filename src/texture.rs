//! Per-tile atlas texture: packs the tile's z-slices into a grid of
//! sub-rectangles inside one 2-D texture, emulating a 3-D texture on 2-D
//! sampling hardware. Allocated lazily on the first arriving slice; a
//! partially populated atlas is valid and renderable.

use crate::error::{VolumeError, VolumeResult};
use crate::source::{Slice, SliceData};

/// Slice-grid layout for `n` slices: `cols = floor(sqrt(n))`, kept `<= rows`.
/// The WGSL sampler derives a slice's atlas offset from this same pair with
/// integer division, so placement and sampling cannot desynchronize.
pub fn slice_grid_size(n: u32) -> (u32, u32) {
    let n = n.max(1);
    let cols = (n as f64).sqrt().floor() as u32;
    let cols = cols.max(1);
    let rows = (n + cols - 1) / cols;
    (cols, rows)
}

/// Pixel layout of one tile's atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasLayout {
    pub cols: u32,
    pub rows: u32,
    pub tile_w: u32,
    pub tile_h: u32,
}

impl AtlasLayout {
    pub fn new(slice_count: u32, tile_w: u32, tile_h: u32) -> Self {
        let (cols, rows) = slice_grid_size(slice_count);
        Self {
            cols,
            rows,
            tile_w,
            tile_h,
        }
    }

    pub fn texture_size(&self) -> (u32, u32) {
        (self.tile_w * self.cols, self.tile_h * self.rows)
    }

    pub fn cell_count(&self) -> u32 {
        self.cols * self.rows
    }

    /// Linear cell index for a normalized z position within the tile.
    pub fn cell_index(&self, norm_z: f64) -> u32 {
        let cells = self.cell_count();
        let idx = (norm_z.clamp(0.0, 1.0) * cells as f64).floor() as u32;
        idx.min(cells - 1)
    }

    /// Pixel origin of a cell, decomposed as `(idx % cols, idx / cols)`.
    pub fn cell_origin(&self, idx: u32) -> (u32, u32) {
        ((idx % self.cols) * self.tile_w, (idx / self.cols) * self.tile_h)
    }
}

/// Payload kind flag carried into the per-tile uniform. Scalar payloads are
/// expanded to grayscale by the shader when no colormap is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Rgba,
    Scalar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureState {
    Unallocated,
    PartiallyPopulated,
    Ready,
}

/// One tile's GPU atlas. Constructed empty and CPU-only; the first arriving
/// slice fixes the slice-grid layout and the pixel format, allocates the
/// texture, and every slice (first included) is copied into its sub-rectangle
/// as it arrives.
pub struct TileTexture {
    tile_w: u32,
    tile_h: u32,
    z_min: f64,
    z_max: f64,
    total: u32,
    applied: u32,
    layout: Option<AtlasLayout>,
    format: wgpu::TextureFormat,
    payload: PayloadKind,
    texture: Option<wgpu::Texture>,
    view: Option<wgpu::TextureView>,
}

impl TileTexture {
    pub fn new(tile_size: [u32; 2], z_min: f64, z_max: f64) -> Self {
        Self {
            tile_w: tile_size[0],
            tile_h: tile_size[1],
            z_min,
            z_max,
            total: 0,
            applied: 0,
            layout: None,
            format: wgpu::TextureFormat::Rgba8Unorm,
            payload: PayloadKind::Rgba,
            texture: None,
            view: None,
        }
    }

    pub fn state(&self) -> TextureState {
        if self.layout.is_none() {
            TextureState::Unallocated
        } else if self.total > 0 && self.applied >= self.total {
            TextureState::Ready
        } else {
            TextureState::PartiallyPopulated
        }
    }

    /// An allocated atlas is renderable, even while slices are still missing.
    pub fn is_renderable(&self) -> bool {
        self.layout.is_some()
    }

    pub fn layout(&self) -> Option<&AtlasLayout> {
        self.layout.as_ref()
    }

    pub fn payload_kind(&self) -> PayloadKind {
        self.payload
    }

    pub fn view(&self) -> Option<&wgpu::TextureView> {
        self.view.as_ref()
    }

    pub fn applied_slices(&self) -> u32 {
        self.applied
    }

    /// Pick the atlas format from the first slice's payload kind. R32Float
    /// needs the float32-filterable feature for linear sampling; fall back to
    /// R16Float otherwise.
    fn infer_format(device: &wgpu::Device, data: &SliceData) -> (wgpu::TextureFormat, PayloadKind) {
        match data {
            SliceData::Rgba8 { .. } => (wgpu::TextureFormat::Rgba8Unorm, PayloadKind::Rgba),
            SliceData::F32 { .. } => {
                let format = if device
                    .features()
                    .contains(wgpu::Features::FLOAT32_FILTERABLE)
                {
                    wgpu::TextureFormat::R32Float
                } else {
                    wgpu::TextureFormat::R16Float
                };
                (format, PayloadKind::Scalar)
            }
            SliceData::U8 { .. } => (wgpu::TextureFormat::R8Unorm, PayloadKind::Scalar),
        }
    }

    fn allocate(&mut self, device: &wgpu::Device, total: u32, first: &SliceData) {
        let layout = AtlasLayout::new(total, self.tile_w, self.tile_h);
        let (format, payload) = Self::infer_format(device, first);
        let (w, h) = layout.texture_size();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("strata3d-tile-atlas"),
            size: wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.view = Some(texture.create_view(&wgpu::TextureViewDescriptor::default()));
        self.texture = Some(texture);
        self.layout = Some(layout);
        self.format = format;
        self.payload = payload;
        self.total = total;
    }

    /// Copy one arrived slice into its computed sub-rectangle, allocating the
    /// atlas on the first call.
    pub fn update_texture_slice(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        total: u32,
        slice: &Slice,
    ) -> VolumeResult<()> {
        let (got_w, got_h) = (slice.data.width(), slice.data.height());
        if got_w != self.tile_w || got_h != self.tile_h {
            return Err(VolumeError::SliceMismatch {
                got_w,
                got_h,
                want_w: self.tile_w,
                want_h: self.tile_h,
            });
        }

        if self.layout.is_none() {
            self.allocate(device, total, &slice.data);
        }
        let layout = self.layout.expect("atlas layout set above");

        let span = self.z_max - self.z_min;
        let norm_z = if span > 0.0 {
            (slice.z - self.z_min) / span
        } else {
            0.0
        };
        let (off_x, off_y) = layout.cell_origin(layout.cell_index(norm_z));

        let (bytes, bytes_per_row): (Vec<u8>, u32) = match (&slice.data, self.format) {
            (SliceData::Rgba8 { pixels, .. }, wgpu::TextureFormat::Rgba8Unorm) => {
                (pixels.clone(), 4 * self.tile_w)
            }
            (SliceData::F32 { values, .. }, wgpu::TextureFormat::R32Float) => {
                (bytemuck::cast_slice(values).to_vec(), 4 * self.tile_w)
            }
            (SliceData::F32 { values, .. }, wgpu::TextureFormat::R16Float) => {
                let halves: Vec<u8> = values
                    .iter()
                    .flat_map(|v| half::f16::from_f32(*v).to_le_bytes())
                    .collect();
                (halves, 2 * self.tile_w)
            }
            (SliceData::U8 { values, .. }, wgpu::TextureFormat::R8Unorm) => {
                (values.clone(), self.tile_w)
            }
            _ => {
                // A tile whose slices change payload kind mid-stream.
                return Err(VolumeError::Decode(format!(
                    "slice payload does not match atlas format {:?}",
                    self.format
                )));
            }
        };

        let expected = (bytes_per_row * self.tile_h) as usize;
        if bytes.len() != expected {
            return Err(VolumeError::Decode(format!(
                "slice byte length mismatch: got {}, expected {}",
                bytes.len(),
                expected
            )));
        }

        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: self.texture.as_ref().expect("atlas allocated above"),
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: off_x,
                    y: off_y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            &bytes,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(self.tile_h),
            },
            wgpu::Extent3d {
                width: self.tile_w,
                height: self.tile_h,
                depth_or_array_layers: 1,
            },
        );

        self.applied += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_grid_size_values() {
        assert_eq!(slice_grid_size(1), (1, 1));
        assert_eq!(slice_grid_size(2), (1, 2));
        assert_eq!(slice_grid_size(3), (1, 3));
        assert_eq!(slice_grid_size(4), (2, 2));
        assert_eq!(slice_grid_size(5), (2, 3));
        assert_eq!(slice_grid_size(6), (2, 3));
        assert_eq!(slice_grid_size(9), (3, 3));
        assert_eq!(slice_grid_size(10), (3, 4));
        assert_eq!(slice_grid_size(12), (3, 4));
        assert_eq!(slice_grid_size(16), (4, 4));
    }

    #[test]
    fn test_slice_grid_size_capacity_and_asymmetry() {
        for n in 1..=256u32 {
            let (cols, rows) = slice_grid_size(n);
            assert!(cols * rows >= n, "n={} under-allocates {}x{}", n, cols, rows);
            assert!(cols <= rows, "n={} violates cols <= rows", n);
            assert_eq!(cols, (n as f64).sqrt().floor().max(1.0) as u32);
        }
    }

    #[test]
    fn test_cell_index_and_origin() {
        let layout = AtlasLayout::new(5, 10, 20);
        assert_eq!((layout.cols, layout.rows), (2, 3));
        assert_eq!(layout.texture_size(), (20, 60));

        assert_eq!(layout.cell_index(0.0), 0);
        assert_eq!(layout.cell_index(1.0), 5);
        assert_eq!(layout.cell_index(0.5), 3);
        assert_eq!(layout.cell_index(-2.0), 0);
        assert_eq!(layout.cell_index(9.0), 5);

        assert_eq!(layout.cell_origin(0), (0, 0));
        assert_eq!(layout.cell_origin(1), (10, 0));
        assert_eq!(layout.cell_origin(2), (0, 20));
        assert_eq!(layout.cell_origin(5), (10, 40));
    }

    #[test]
    fn test_new_texture_is_unallocated() {
        let tex = TileTexture::new([4, 4], 0.0, 100.0);
        assert_eq!(tex.state(), TextureState::Unallocated);
        assert!(!tex.is_renderable());
        assert!(tex.view().is_none());
    }
}
