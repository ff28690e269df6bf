//! VolumeLayer: thin binding of a TileSet to a host map layer lifecycle.

use crate::colormap::ColorMapImage;
use crate::error::VolumeResult;
use crate::primitive::{ViewParams, VolumeView};
use crate::source::VolumeSource;
use crate::tileset::{FrameParams, FrameStats, TileSet};

pub struct VolumeLayer {
    tileset: TileSet,
    active: bool,
}

impl VolumeLayer {
    pub fn new(tileset: TileSet) -> Self {
        Self {
            tileset,
            active: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn tileset(&self) -> &TileSet {
        &self.tileset
    }

    pub fn set_source(&mut self, source: Option<VolumeSource>) -> VolumeResult<()> {
        self.tileset.set_source(source)
    }

    pub fn set_view_mode(&mut self, id: &str, params: ViewParams) -> VolumeResult<()> {
        self.tileset.set_view_mode(id, params)
    }

    pub fn set_view(&mut self, view: VolumeView) {
        self.tileset.set_view(view);
    }

    pub fn set_color_map(&mut self, image: Option<ColorMapImage>) {
        self.tileset.set_color_map(image);
    }

    pub fn set_map_range(&mut self, min: f32, max: f32) {
        self.tileset.set_map_range(min, max);
    }

    pub fn set_clamp(&mut self, clamp: bool) {
        self.tileset.set_clamp(clamp);
    }

    pub fn set_no_data_value(&mut self, value: f32) {
        self.tileset.set_no_data_value(value);
    }

    pub fn set_vertical_scale(&mut self, scale: f64) {
        self.tileset.set_vertical_scale(scale);
    }

    pub fn update(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        frame: &FrameParams,
    ) -> FrameStats {
        if !self.active {
            return FrameStats::default();
        }
        self.tileset.update(device, queue, frame)
    }

    pub fn render<'p>(&'p self, pass: &mut wgpu::RenderPass<'p>) {
        if self.active {
            self.tileset.render(pass);
        }
    }
}
