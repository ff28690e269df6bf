//! Color mapping: 1-D lookup image, value-range parameters, and the GPU LUT
//! state owned by the TileSet.
//!
//! The fragment rule, mirrored by [`resolve_scalar`] for tests: a sampled
//! scalar equal to `no_data_value` is fully transparent; an out-of-range
//! scalar is transparent when `clamp` is off and clamped into range before
//! the lookup when it is on.

use crate::error::{VolumeError, VolumeResult};

/// Built-in colormap names (case-sensitive).
pub static SUPPORTED: [&str; 3] = ["viridis", "magma", "terrain"];

const VIRIDIS_STOPS: &[(f32, [u8; 4])] = &[
    (0.0, [68, 1, 84, 255]),
    (0.25, [59, 82, 139, 255]),
    (0.5, [33, 145, 140, 255]),
    (0.75, [94, 201, 98, 255]),
    (1.0, [253, 231, 37, 255]),
];

const MAGMA_STOPS: &[(f32, [u8; 4])] = &[
    (0.0, [0, 0, 4, 255]),
    (0.25, [81, 18, 124, 255]),
    (0.5, [183, 55, 121, 255]),
    (0.75, [252, 137, 97, 255]),
    (1.0, [252, 253, 191, 255]),
];

const TERRAIN_STOPS: &[(f32, [u8; 4])] = &[
    (0.0, [51, 102, 153, 255]),
    (0.25, [0, 153, 102, 255]),
    (0.5, [230, 214, 126, 255]),
    (0.75, [130, 88, 57, 255]),
    (1.0, [255, 255, 255, 255]),
];

/// The 1-D lookup image, one row of RGBA8 texels.
#[derive(Debug, Clone)]
pub struct ColorMapImage {
    pub width: u32,
    pub pixels: Vec<u8>,
}

impl ColorMapImage {
    pub fn from_pixels(width: u32, pixels: Vec<u8>) -> VolumeResult<Self> {
        if width == 0 || pixels.len() != (width * 4) as usize {
            return Err(VolumeError::ColorMap(format!(
                "pixel length mismatch: got {}, expected {}",
                pixels.len(),
                width * 4
            )));
        }
        Ok(Self { width, pixels })
    }

    /// Interpolate gradient stops (position in [0, 1], RGBA color) into a
    /// lookup row of the given resolution.
    pub fn from_stops(stops: &[(f32, [u8; 4])], resolution: u32) -> VolumeResult<Self> {
        if stops.len() < 2 {
            return Err(VolumeError::ColorMap(
                "stops must contain at least two entries".to_string(),
            ));
        }
        if resolution < 2 {
            return Err(VolumeError::ColorMap("resolution must be >= 2".to_string()));
        }
        if stops.iter().any(|(pos, _)| !pos.is_finite()) {
            return Err(VolumeError::ColorMap(
                "stop positions must be finite".to_string(),
            ));
        }

        let mut sorted: Vec<(f32, [u8; 4])> = stops.to_vec();
        sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut pixels = Vec::with_capacity((resolution * 4) as usize);
        for i in 0..resolution {
            let t = i as f32 / (resolution - 1) as f32;
            pixels.extend_from_slice(&color_at(&sorted, t));
        }
        Ok(Self {
            width: resolution,
            pixels,
        })
    }

    /// Resolve a built-in colormap by name at 256 samples.
    pub fn preset(name: &str) -> VolumeResult<Self> {
        let stops = match name {
            "viridis" => VIRIDIS_STOPS,
            "magma" => MAGMA_STOPS,
            "terrain" => TERRAIN_STOPS,
            _ => {
                return Err(VolumeError::ColorMap(format!(
                    "Unknown colormap '{}'. Supported: {}",
                    name,
                    SUPPORTED.join(", ")
                )))
            }
        };
        Self::from_stops(stops, 256)
    }
}

fn color_at(sorted: &[(f32, [u8; 4])], t: f32) -> [u8; 4] {
    if t <= sorted[0].0 {
        return sorted[0].1;
    }
    if t >= sorted[sorted.len() - 1].0 {
        return sorted[sorted.len() - 1].1;
    }
    for pair in sorted.windows(2) {
        let (p0, c0) = pair[0];
        let (p1, c1) = pair[1];
        if t >= p0 && t <= p1 {
            let f = if p1 > p0 { (t - p0) / (p1 - p0) } else { 0.0 };
            return [
                lerp_u8(c0[0], c1[0], f),
                lerp_u8(c0[1], c1[1], f),
                lerp_u8(c0[2], c1[2], f),
                lerp_u8(c0[3], c1[3], f),
            ];
        }
    }
    sorted[sorted.len() - 1].1
}

fn lerp_u8(a: u8, b: u8, t: f32) -> u8 {
    (a as f32 + (b as f32 - a as f32) * t.clamp(0.0, 1.0))
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Numeric parameters of the color path.
#[derive(Debug, Clone, Copy)]
pub struct ColorMapParams {
    pub range: (f32, f32),
    pub clamp: bool,
    pub no_data_value: f32,
}

impl Default for ColorMapParams {
    fn default() -> Self {
        Self {
            range: (0.0, 1.0),
            clamp: false,
            // NaN never compares equal, so no scalar is treated as no-data
            // until the host sets a value.
            no_data_value: f32::NAN,
        }
    }
}

/// CPU reference of the fragment rule. Returns the normalized lookup
/// coordinate, or `None` when the scalar resolves to fully transparent.
pub fn resolve_scalar(value: f32, params: &ColorMapParams) -> Option<f32> {
    if value == params.no_data_value {
        return None;
    }
    let (min, max) = params.range;
    let v = if params.clamp {
        value.clamp(min, max)
    } else {
        if value < min || value > max {
            return None;
        }
        value
    };
    Some((v - min) / (max - min))
}

/// Pending colormap state owned by the TileSet. Parameter edits and image
/// swaps land here synchronously; the LUT texture (re)upload happens once per
/// frame at the start of `update`, never mid-frame.
pub struct ColorMapState {
    image: Option<ColorMapImage>,
    pub params: ColorMapParams,
    pending_upload: bool,
    lut_view: Option<wgpu::TextureView>,
}

impl ColorMapState {
    pub fn new() -> Self {
        Self {
            image: None,
            params: ColorMapParams::default(),
            pending_upload: false,
            lut_view: None,
        }
    }

    pub fn set_image(&mut self, image: Option<ColorMapImage>) {
        self.pending_upload = image.is_some();
        if image.is_none() {
            self.lut_view = None;
        }
        self.image = image;
    }

    pub fn is_active(&self) -> bool {
        self.image.is_some()
    }

    pub fn lut_view(&self) -> Option<&wgpu::TextureView> {
        self.lut_view.as_ref()
    }

    /// Upload the lookup texture if a change is pending. Returns true when
    /// the LUT view changed and dependent bind groups must be rebuilt.
    pub fn apply_pending(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> bool {
        if !self.pending_upload {
            return false;
        }
        self.pending_upload = false;

        let image = match &self.image {
            Some(image) => image,
            None => return false,
        };

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("strata3d-colormap-lut"),
            size: wgpu::Extent3d {
                width: image.width,
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
            &image.pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(image.width * 4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: image.width,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        self.lut_view = Some(texture.create_view(&wgpu::TextureViewDescriptor::default()));
        true
    }
}

impl Default for ColorMapState {
    fn default() -> Self {
        Self::new()
    }
}
