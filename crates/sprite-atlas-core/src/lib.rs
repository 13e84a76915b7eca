//! Runtime texture atlas allocator for sprites.
//!
//! - Packing: one binary tree per fixed-size square atlas ("knapsack"); leaves are split on demand
//! - Manager: routes requests to existing atlases first and creates new ones when they are full
//! - Nodes map to normalized UV coordinates and lazily built texture views sharing the atlas texture
//! - Allocation modes: synchronous, single future, and a deferred FIFO queue solved in one call
//!
//! Quick example:
//! ```
//! use sprite_atlas_core::prelude::*;
//! # fn main() -> sprite_atlas_core::Result<()> {
//! let mut manager = TextureManager::new(256);
//! let node = manager.allocate(128, 128)?;
//! assert_eq!(manager.uv_coordinates(node)?, [0.0, 0.5, 0.5, 1.0]);
//! manager.draw(node, |canvas| {
//!     canvas.fill_rect(-8.0, -8.0, 16.0, 16.0, image::Rgba([255, 255, 255, 255]));
//! })?;
//! manager.release(Some(node))?;
//! # Ok(()) }
//! ```

pub mod canvas;
pub mod config;
pub mod error;
pub mod knapsack;
pub mod manager;
pub mod model;
pub mod texture;

pub use canvas::*;
pub use config::*;
pub use error::*;
pub use knapsack::*;
pub use manager::*;
pub use model::*;
pub use texture::*;

/// Convenience prelude for common types.
/// Importing `sprite_atlas_core::prelude::*` brings the primary APIs into scope.
pub mod prelude {
    pub use crate::canvas::Canvas;
    pub use crate::config::{ManagerConfig, ManagerConfigBuilder, TextureSize};
    pub use crate::error::{AtlasError, Dimension};
    pub use crate::knapsack::{ClipGuard, Knapsack, Node, NodeId};
    pub use crate::manager::{NodeHandle, PendingNode, TextureManager};
    pub use crate::model::{AtlasSnapshot, AtlasStats, PlacedNode, Rectangle};
    pub use crate::texture::{Texture, TextureHooks, Vec2};
}
