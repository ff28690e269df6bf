// src/geo/reproject.rs
// CRS reprojection between the tile grid's SRS and the display SRS (PROJ is feature-gated)

use crate::error::{VolumeError, VolumeResult};

/// Get the EPSG code from a CRS string if it's in EPSG format.
pub fn parse_epsg_code(crs: &str) -> Option<u32> {
    let crs_upper = crs.to_uppercase();
    if crs_upper.starts_with("EPSG:") {
        crs_upper[5..].parse::<u32>().ok()
    } else {
        None
    }
}

/// Check if two CRS strings refer to the same coordinate system.
pub fn crs_equal(crs1: &str, crs2: &str) -> bool {
    if crs1 == crs2 {
        return true;
    }
    if let (Some(c1), Some(c2)) = (parse_epsg_code(crs1), parse_epsg_code(crs2)) {
        return c1 == c2;
    }
    false
}

/// Horizontal reprojection from dataset coordinates to display coordinates,
/// constructed once per TileSet. An unsupported CRS pair is a construction
/// error, so the whole set fails to build rather than tiles failing silently.
///
/// Heights never pass through the transform; vertical exaggeration is a
/// geometry-build input.
#[derive(Debug)]
pub struct Reprojector {
    #[cfg(feature = "proj")]
    transform: Option<proj::Proj>,
    #[cfg(not(feature = "proj"))]
    transform: Option<()>,
}

impl Reprojector {
    #[cfg(feature = "proj")]
    pub fn new(source_srs: &str, display_srs: &str) -> VolumeResult<Self> {
        if crs_equal(source_srs, display_srs) {
            return Ok(Self { transform: None });
        }
        let transform = proj::Proj::new_known_crs(source_srs, display_srs, None).map_err(|e| {
            VolumeError::Projection(format!(
                "failed to create transform {} -> {}: {}",
                source_srs, display_srs, e
            ))
        })?;
        Ok(Self {
            transform: Some(transform),
        })
    }

    #[cfg(not(feature = "proj"))]
    pub fn new(source_srs: &str, display_srs: &str) -> VolumeResult<Self> {
        if crs_equal(source_srs, display_srs) {
            return Ok(Self { transform: None });
        }
        Err(VolumeError::Projection(format!(
            "cannot reproject {} -> {}: crate built without the 'proj' feature",
            source_srs, display_srs
        )))
    }

    pub fn identity() -> Self {
        Self { transform: None }
    }

    pub fn is_identity(&self) -> bool {
        self.transform.is_none()
    }

    /// Project a horizontal coordinate pair into the display CRS. Infallible
    /// after construction; a point the prepared transform cannot convert
    /// passes through unchanged.
    pub fn to_display(&self, x: f64, y: f64) -> (f64, f64) {
        match &self.transform {
            None => (x, y),
            #[cfg(feature = "proj")]
            Some(t) => t.convert((x, y)).unwrap_or((x, y)),
            #[cfg(not(feature = "proj"))]
            Some(()) => (x, y),
        }
    }
}
