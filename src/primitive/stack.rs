//! Stack view: `n` horizontal translucent slabs spanning the tile's z-range.

use super::{next_revision, DrawRange, GeometryContext, VolumeMesh};

pub struct StackView {
    num_slices: u32,
    revision: u64,
}

impl StackView {
    pub fn new(num_slices: u32) -> Self {
        Self {
            num_slices: num_slices.max(1),
            revision: next_revision(),
        }
    }

    pub fn num_slices(&self) -> u32 {
        self.num_slices
    }

    pub fn set_num_slices(&mut self, num_slices: u32) {
        self.num_slices = num_slices.max(1);
        self.revision = next_revision();
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn touch(&mut self) {
        self.revision = next_revision();
    }

    /// One quad per slab, evenly spaced at slab centers, each with a constant
    /// `w = (i + 0.5) / n` texture coordinate and its own draw range so the
    /// host can order translucent slabs.
    pub fn build_mesh(&self, ctx: &GeometryContext<'_>) -> VolumeMesh {
        let e = ctx.extent;
        let n = self.num_slices;
        let step = e.size_z() / n as f64;

        let mut mesh = VolumeMesh::default();
        for i in 0..n {
            let z = e.min_z + (i as f64 + 0.5) * step;
            let w = (i as f32 + 0.5) / n as f32;
            mesh.push_quad([
                ctx.vertex(e.min_x, e.min_y, z, [0.0, 0.0, w]),
                ctx.vertex(e.max_x, e.min_y, z, [1.0, 0.0, w]),
                ctx.vertex(e.min_x, e.max_y, z, [0.0, 1.0, w]),
                ctx.vertex(e.max_x, e.max_y, z, [1.0, 1.0, w]),
            ]);
            mesh.draws.push(DrawRange {
                first: i * 6,
                count: 6,
            });
        }
        mesh
    }
}
