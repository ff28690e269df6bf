//! Geographic helpers: CRS comparison and tile-local to display reprojection.

mod reproject;

pub use reproject::{crs_equal, parse_epsg_code, Reprojector};
