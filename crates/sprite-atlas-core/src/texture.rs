use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 2D vector used for texture offset and repeat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A view into an atlas texture.
///
/// The master texture of an atlas covers the whole page (offset 0, repeat 1).
/// Node textures are clones of the master with `offset`/`repeat` narrowed to
/// the node's UV rectangle. Clones keep the master's `uuid`: every view of
/// one atlas shares the same identity so renderers can cache the GPU upload
/// per atlas rather than per sprite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Texture {
    pub uuid: Uuid,
    /// Index of the atlas whose surface backs this texture.
    pub atlas: usize,
    pub offset: Vec2,
    pub repeat: Vec2,
}

impl Texture {
    pub(crate) fn master(atlas: usize) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            atlas,
            offset: Vec2::new(0.0, 0.0),
            repeat: Vec2::new(1.0, 1.0),
        }
    }

    /// Clone of `self` addressing the sub-rectangle `[left, top, right, bottom]` in UV space.
    pub(crate) fn view(&self, uv: [f64; 4]) -> Self {
        let mut view = self.clone();
        view.offset = Vec2::new(uv[0], uv[1]);
        view.repeat = Vec2::new(uv[2] - uv[0], uv[3] - uv[1]);
        view
    }
}

/// Lifecycle notifications for whoever owns the GPU side of the textures.
///
/// All methods default to no-ops.
pub trait TextureHooks {
    /// An atlas built its master texture.
    fn created(&mut self, _master: &Texture) {}
    /// A node cloned the master into its own view.
    fn cloned(&mut self, _master: &Texture, _view: &Texture) {}
    /// A node released its view.
    fn disposed(&mut self, _view: &Texture) {}
}

/// Hooks that ignore every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl TextureHooks for NoHooks {}
