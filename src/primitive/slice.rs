//! Slice view: up to three orthogonal cross-section quads at explicit
//! world coordinates.

use super::{next_revision, DrawRange, GeometryContext, VolumeMesh};

/// Cross-section coordinates in dataset/world units. Any subset may be
/// present; a coordinate whose normalized position falls outside the tile's
/// extent on that axis omits that quad for that tile only.
pub struct SliceView {
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
    revision: u64,
}

impl SliceView {
    pub fn new(x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Self {
        Self {
            x,
            y,
            z,
            revision: next_revision(),
        }
    }

    pub fn coords(&self) -> (Option<f64>, Option<f64>, Option<f64>) {
        (self.x, self.y, self.z)
    }

    pub fn set_x(&mut self, x: Option<f64>) {
        self.x = x;
        self.revision = next_revision();
    }

    pub fn set_y(&mut self, y: Option<f64>) {
        self.y = y;
        self.revision = next_revision();
    }

    pub fn set_z(&mut self, z: Option<f64>) {
        self.z = z;
        self.revision = next_revision();
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn touch(&mut self) {
        self.revision = next_revision();
    }

    /// Present quads are concatenated x, then y, then z into one vertex and
    /// index buffer with a single draw range.
    pub fn build_mesh(&self, ctx: &GeometryContext<'_>) -> VolumeMesh {
        let e = ctx.extent;
        let mut mesh = VolumeMesh::default();

        if let Some(t) = normalized(self.x, e.min_x, e.max_x) {
            let x = self.x.expect("present when normalized");
            mesh.push_quad([
                ctx.vertex(x, e.min_y, e.min_z, [t, 0.0, 0.0]),
                ctx.vertex(x, e.max_y, e.min_z, [t, 1.0, 0.0]),
                ctx.vertex(x, e.min_y, e.max_z, [t, 0.0, 1.0]),
                ctx.vertex(x, e.max_y, e.max_z, [t, 1.0, 1.0]),
            ]);
        }
        if let Some(t) = normalized(self.y, e.min_y, e.max_y) {
            let y = self.y.expect("present when normalized");
            mesh.push_quad([
                ctx.vertex(e.min_x, y, e.min_z, [0.0, t, 0.0]),
                ctx.vertex(e.max_x, y, e.min_z, [1.0, t, 0.0]),
                ctx.vertex(e.min_x, y, e.max_z, [0.0, t, 1.0]),
                ctx.vertex(e.max_x, y, e.max_z, [1.0, t, 1.0]),
            ]);
        }
        if let Some(t) = normalized(self.z, e.min_z, e.max_z) {
            let z = self.z.expect("present when normalized");
            mesh.push_quad([
                ctx.vertex(e.min_x, e.min_y, z, [0.0, 0.0, t]),
                ctx.vertex(e.max_x, e.min_y, z, [1.0, 0.0, t]),
                ctx.vertex(e.min_x, e.max_y, z, [0.0, 1.0, t]),
                ctx.vertex(e.max_x, e.max_y, z, [1.0, 1.0, t]),
            ]);
        }

        if !mesh.indices.is_empty() {
            mesh.draws.push(DrawRange {
                first: 0,
                count: mesh.indices.len() as u32,
            });
        }
        mesh
    }
}

fn normalized(coord: Option<f64>, min: f64, max: f64) -> Option<f32> {
    let c = coord?;
    let t = (c - min) / (max - min);
    if (0.0..=1.0).contains(&t) {
        Some(t as f32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Reprojector;
    use crate::grid::VolumeExtent;

    fn ctx(reprojector: &Reprojector) -> GeometryContext<'_> {
        GeometryContext {
            extent: VolumeExtent::new(0.0, 0.0, 0.0, 10.0, 10.0, 100.0),
            reprojector,
            vertical_scale: 1.0,
        }
    }

    #[test]
    fn test_three_planes_in_range() {
        let reprojector = Reprojector::identity();
        let view = SliceView::new(Some(5.0), Some(2.5), Some(75.0));
        let mesh = view.build_mesh(&ctx(&reprojector));

        assert_eq!(mesh.vertices.len(), 12);
        assert_eq!(mesh.indices.len(), 18);
        assert_eq!(mesh.draws, vec![DrawRange { first: 0, count: 18 }]);

        // x plane first: constant position x, constant u
        for v in &mesh.vertices[0..4] {
            assert_eq!(v.position[0], 5.0);
            assert!((v.uvw[0] - 0.5).abs() < 1e-6);
        }
        // then y: constant v
        for v in &mesh.vertices[4..8] {
            assert_eq!(v.position[1], 2.5);
            assert!((v.uvw[1] - 0.25).abs() < 1e-6);
        }
        // then z: constant w
        for v in &mesh.vertices[8..12] {
            assert_eq!(v.position[2], 75.0);
            assert!((v.uvw[2] - 0.75).abs() < 1e-6);
        }
    }

    #[test]
    fn test_out_of_range_axes_are_omitted_independently() {
        let reprojector = Reprojector::identity();
        let view = SliceView::new(Some(-1.0), Some(5.0), Some(101.0));
        let mesh = view.build_mesh(&ctx(&reprojector));
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
        assert_eq!(mesh.vertices[0].position[1], 5.0);
    }

    #[test]
    fn test_all_absent_builds_empty_mesh() {
        let reprojector = Reprojector::identity();
        let view = SliceView::new(None, None, None);
        let mesh = view.build_mesh(&ctx(&reprojector));
        assert!(mesh.is_empty());
        assert!(mesh.draws.is_empty());
    }

    #[test]
    fn test_boundary_coordinates_are_included() {
        let reprojector = Reprojector::identity();
        let view = SliceView::new(Some(0.0), None, Some(100.0));
        let mesh = view.build_mesh(&ctx(&reprojector));
        assert_eq!(mesh.vertices.len(), 8);
    }
}
