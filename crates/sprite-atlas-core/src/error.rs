use crate::manager::NodeHandle;
use std::fmt;
use thiserror::Error;

/// Which side of a request exceeded the configured texture size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Width,
    Height,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Width => f.write_str("width"),
            Dimension::Height => f.write_str("height"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AtlasError {
    #[error("A {dimension} of {value} is too large for these textures (limit {limit})")]
    TooLarge {
        dimension: Dimension,
        value: u32,
        limit: u32,
    },
    #[error("Can not release tree node, still has children")]
    HasChildren,
    #[error(
        "Trying to resolve a queue which hasn't been set up; call allocate_async before solve_async"
    )]
    QueueNotInitialized,
    /// A fresh atlas refused a request that already passed size validation.
    #[error("Could not allocate a node of size {width}x{height}")]
    OutOfSpace { width: u32, height: u32 },
    #[error("Unknown node handle: {0:?}")]
    UnknownNode(NodeHandle),
    #[error("Pending allocation was dropped before it was solved")]
    Canceled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl AtlasError {
    /// True for the size-validation failure of `allocate` and friends.
    pub fn is_size_error(&self) -> bool {
        matches!(self, AtlasError::TooLarge { .. })
    }
}

pub type Result<T> = std::result::Result<T, AtlasError>;
