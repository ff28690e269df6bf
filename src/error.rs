//! Crate-wide error type for the volume rendering core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("Invalid tile grid: {0}")]
    InvalidGrid(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Slice size mismatch: got {got_w}x{got_h}, tile expects {want_w}x{want_h}")]
    SliceMismatch {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },

    #[error("Colormap error: {0}")]
    ColorMap(String),

    #[error("Unknown view mode: {0}")]
    UnknownView(String),

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for VolumeError {
    fn from(e: reqwest::Error) -> Self {
        VolumeError::Transport(e.to_string())
    }
}

pub type VolumeResult<T> = Result<T, VolumeError>;
