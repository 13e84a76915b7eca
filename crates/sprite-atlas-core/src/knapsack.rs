//! One texture atlas ("knapsack") and the binary tree of nodes that
//! partitions it.
//!
//! The tree follows the classic lightmap packing scheme
//! (<http://www.blackpawn.com/texts/lightmaps/default.html>): every node is
//! either a leaf, which may hold one image, or a branch with exactly two
//! children that split its rectangle. Nodes live in an arena owned by the
//! knapsack and are addressed by [`NodeId`]; the root is always
//! [`NodeId::ROOT`].

use crate::canvas::{Canvas, DrawState};
use crate::error::{AtlasError, Result};
use crate::manager::NodeHandle;
use crate::model::{AtlasSnapshot, PlacedNode, Rectangle};
use crate::texture::{NoHooks, Texture, TextureHooks};
use image::Rgba;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Texture lifecycle hooks shared between a manager and its knapsacks.
pub type SharedHooks = Rc<RefCell<dyn TextureHooks>>;

const SPLIT_FIRST_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const SPLIT_SECOND_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
const CLAIM_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);

/// Index of a node inside its knapsack's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);
}

/// A rectangular region of one atlas.
#[derive(Debug, Clone)]
pub struct Node {
    rectangle: Rectangle,
    children: Option<(NodeId, NodeId)>,
    image_id: Option<Uuid>,
    texture: Option<Texture>,
}

impl Node {
    fn leaf(rectangle: Rectangle) -> Self {
        Self {
            rectangle,
            children: None,
            image_id: None,
            texture: None,
        }
    }

    pub fn rectangle(&self) -> Rectangle {
        self.rectangle
    }

    pub fn width(&self) -> i32 {
        self.rectangle.width()
    }

    pub fn height(&self) -> i32 {
        self.rectangle.height()
    }

    /// Branch nodes are split and can't hold an image themselves.
    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }

    /// `(first, second)` children of a branch.
    pub fn children(&self) -> Option<(NodeId, NodeId)> {
        self.children
    }

    pub fn is_occupied(&self) -> bool {
        self.image_id.is_some()
    }

    /// Unique id of the image currently claiming this node.
    pub fn image_id(&self) -> Option<Uuid> {
        self.image_id
    }

    /// The texture view, if one has been built since the last release.
    pub fn cached_texture(&self) -> Option<&Texture> {
        self.texture.as_ref()
    }
}

/// A single fixed-size square atlas page.
///
/// The canvas and master texture are created on first access.
pub struct Knapsack {
    index: usize,
    size: u32,
    background: Rgba<u8>,
    debug: bool,
    nodes: Vec<Node>,
    canvas: Option<Canvas>,
    root_texture: Option<Texture>,
    hooks: SharedHooks,
}

impl Knapsack {
    /// Standalone knapsack with a transparent background and no hooks.
    pub fn new(index: usize, size: u32) -> Self {
        Self::with_settings(
            index,
            size,
            Rgba([0, 0, 0, 0]),
            false,
            Rc::new(RefCell::new(NoHooks)),
        )
    }

    pub(crate) fn with_settings(
        index: usize,
        size: u32,
        background: Rgba<u8>,
        debug: bool,
        hooks: SharedHooks,
    ) -> Self {
        let side = i32::try_from(size).unwrap_or(i32::MAX);
        Self {
            index,
            size,
            background,
            debug,
            nodes: vec![Node::leaf(Rectangle::new(0, 0, side, side))],
            canvas: None,
            root_texture: None,
            hooks,
        }
    }

    /// Position of this knapsack in its manager's creation order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn root(&self) -> &Node {
        &self.nodes[NodeId::ROOT.0]
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or(AtlasError::UnknownNode(self.handle(id)))
    }

    /// Every node ever created, branches included, in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The backing surface, if it has been created yet.
    pub fn canvas(&self) -> Option<&Canvas> {
        self.canvas.as_ref()
    }

    /// The backing surface, created on first use.
    pub fn canvas_mut(&mut self) -> &mut Canvas {
        let (size, background) = (self.size, self.background);
        self.canvas
            .get_or_insert_with(|| Canvas::new(size, background))
    }

    /// Master texture wrapping the whole surface, created on first use.
    pub fn root_texture(&mut self) -> &Texture {
        let master = match self.root_texture.take() {
            Some(master) => master,
            None => {
                self.canvas_mut();
                let master = Texture::master(self.index);
                self.hooks.borrow_mut().created(&master);
                debug!(atlas = self.index, uuid = %master.uuid, "created master texture");
                master
            }
        };
        self.root_texture.insert(master)
    }

    /// Allocate a node for a `width` x `height` image; proxies to the root node.
    pub fn allocate_node(&mut self, width: u32, height: u32) -> Option<NodeId> {
        let (Ok(width), Ok(height)) = (i32::try_from(width), i32::try_from(height)) else {
            return None;
        };
        self.allocate(width, height)
    }

    /// Depth-first search for a leaf, first child before second.
    ///
    /// Trees grow one level per allocation along a strip, so the walk keeps
    /// its own stack instead of recursing. Each entry carries the number of
    /// branches above it that were entered through their first child; the
    /// found leaf is claimed once more for each of them.
    fn allocate(&mut self, width: i32, height: i32) -> Option<NodeId> {
        let mut stack = vec![(NodeId::ROOT, 0usize)];
        while let Some((id, first_levels)) = stack.pop() {
            if let Some((first, second)) = self.nodes[id.0].children {
                stack.push((second, first_levels));
                stack.push((first, first_levels + 1));
                continue;
            }

            let node = &self.nodes[id.0];
            if node.is_occupied() {
                continue;
            }
            let rect = node.rectangle;
            if width > rect.width() || height > rect.height() {
                continue;
            }

            let found = self.fit_leaf(id, width, height);
            for _ in 0..first_levels {
                self.claim(found);
            }
            return Some(found);
        }
        None
    }

    /// Split a free leaf that can hold the request until its first
    /// descendant has the exact size, then claim that descendant.
    fn fit_leaf(&mut self, mut id: NodeId, width: i32, height: i32) -> NodeId {
        loop {
            let rect = self.nodes[id.0].rectangle;
            if width == rect.width() && height == rect.height() {
                self.claim(id);
                return id;
            }
            id = self.split(id, width, height);
        }
    }

    /// Turn a leaf into a branch; returns the first child.
    fn split(&mut self, id: NodeId, width: i32, height: i32) -> NodeId {
        let rect = self.nodes[id.0].rectangle;
        // Keep the larger leftover in one piece.
        let remaining_width = rect.width() - width;
        let remaining_height = rect.height() - height;
        let (first, second) = if remaining_width > remaining_height {
            (
                Rectangle::new(rect.left, rect.top, rect.left + width, rect.bottom),
                Rectangle::new(rect.left + width, rect.top, rect.right, rect.bottom),
            )
        } else {
            (
                Rectangle::new(rect.left, rect.top, rect.right, rect.top + height),
                Rectangle::new(rect.left, rect.top + height, rect.right, rect.bottom),
            )
        };
        let first_id = self.push_leaf(first);
        let second_id = self.push_leaf(second);
        self.nodes[id.0].children = Some((first_id, second_id));
        trace!(atlas = self.index, node = id.0, ?first, ?second, "split node");

        if self.debug {
            let canvas = self.canvas_mut();
            outline(canvas, &first, SPLIT_FIRST_COLOR, 4.0);
            outline(canvas, &second, SPLIT_SECOND_COLOR, 4.0);
        }
        first_id
    }

    fn push_leaf(&mut self, rectangle: Rectangle) -> NodeId {
        self.nodes.push(Node::leaf(rectangle));
        NodeId(self.nodes.len() - 1)
    }

    /// Mark a node as in use by a fresh image id.
    fn claim(&mut self, id: NodeId) {
        let image_id = Uuid::new_v4();
        self.nodes[id.0].image_id = Some(image_id);
        trace!(atlas = self.index, node = id.0, %image_id, "claimed node");

        if self.debug {
            let r = self.nodes[id.0].rectangle;
            self.canvas_mut().stroke_rect(
                f64::from(r.left) + 0.5,
                f64::from(r.top) + 0.5,
                f64::from(r.width() - 1),
                f64::from(r.height() - 1),
                CLAIM_COLOR,
                2.0,
            );
        }
    }

    /// Return a leaf to the free state.
    ///
    /// Disposes the node's texture view, erases its pixels and drops the
    /// occupancy marker. Branches are rejected untouched. A freed leaf is not
    /// merged with its sibling.
    pub fn release(&mut self, id: NodeId) -> Result<()> {
        let handle = self.handle(id);
        let node = self
            .nodes
            .get_mut(id.0)
            .ok_or(AtlasError::UnknownNode(handle))?;
        if node.has_children() {
            return Err(AtlasError::HasChildren);
        }
        if let Some(texture) = node.texture.take() {
            self.hooks.borrow_mut().disposed(&texture);
        }
        self.clear(id)?;
        self.nodes[id.0].image_id = None;
        debug!(atlas = self.index, node = id.0, "released node");
        Ok(())
    }

    /// Erase the node's area back to the background colour.
    ///
    /// The far row and column are left alone so a neighbour sharing the
    /// edge keeps its pixels. Nodes one pixel wide or less clear nothing.
    pub fn clear(&mut self, id: NodeId) -> Result<()> {
        let r = self.node(id)?.rectangle;
        if let Some(canvas) = self.canvas.as_mut() {
            canvas.clear_rect(
                f64::from(r.left),
                f64::from(r.top),
                f64::from(inset(r.width(), 1)),
                f64::from(inset(r.height(), 1)),
            );
        }
        Ok(())
    }

    /// `[left, top, right, bottom]` of the node in UV space (origin bottom-left).
    pub fn uv_coordinates(&self, id: NodeId) -> Result<[f64; 4]> {
        Ok(self.uv_of(&self.node(id)?.rectangle))
    }

    fn uv_of(&self, r: &Rectangle) -> [f64; 4] {
        let size = f64::from(self.size);
        [
            f64::from(r.left) / size,
            1.0 - f64::from(r.bottom) / size,
            f64::from(r.right) / size,
            1.0 - f64::from(r.top) / size,
        ]
    }

    /// The node's texture view, cloned from the master texture on first access.
    ///
    /// Branches have no view of their own and yield [`AtlasError::HasChildren`].
    pub fn texture(&mut self, id: NodeId) -> Result<&Texture> {
        let uv = self.uv_coordinates(self.leaf(id)?)?;
        let view = match self.nodes[id.0].texture.take() {
            Some(view) => view,
            None => {
                let master = self.root_texture().clone();
                let view = master.view(uv);
                self.hooks.borrow_mut().cloned(&master, &view);
                view
            }
        };
        Ok(self.nodes[id.0].texture.insert(view))
    }

    /// Scope drawing to the node.
    ///
    /// Saves the canvas state, clips to the node's rectangle inset by one
    /// pixel and moves the origin to the node's centre. The state is restored
    /// when the returned guard is dropped, whichever way the caller leaves.
    /// Nodes two pixels wide or less get an empty clip. Branches yield
    /// [`AtlasError::HasChildren`].
    pub fn clip_context(&mut self, id: NodeId) -> Result<ClipGuard<'_>> {
        let r = self.node(self.leaf(id)?)?.rectangle;
        let canvas = self.canvas_mut();
        let depth = canvas.saved_depth();
        let outer = canvas.state();
        canvas.save();
        canvas.clip(
            f64::from(r.left + 1),
            f64::from(r.top + 1),
            f64::from(inset(r.width(), 2)),
            f64::from(inset(r.height(), 2)),
        );
        canvas.translate(r.center_x(), r.center_y());
        Ok(ClipGuard {
            canvas,
            depth,
            outer,
        })
    }

    /// Run `draw` inside [`Knapsack::clip_context`].
    pub fn draw<R>(&mut self, id: NodeId, draw: impl FnOnce(&mut Canvas) -> R) -> Result<R> {
        let mut guard = self.clip_context(id)?;
        Ok(draw(&mut guard))
    }

    /// Occupied leaves of this atlas.
    pub fn snapshot(&self) -> AtlasSnapshot {
        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| {
                n.image_id.map(|image_id| PlacedNode {
                    node: i,
                    image_id,
                    rectangle: n.rectangle,
                    uv: self.uv_of(&n.rectangle),
                })
            })
            .collect();
        AtlasSnapshot {
            index: self.index,
            size: self.size,
            nodes,
        }
    }

    /// Leaves that could take an image of their exact size right now.
    pub fn free_leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| !n.has_children() && !n.is_occupied())
            .count()
    }

    /// Write the backing surface as an image file (format from the extension).
    pub fn save_png(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.canvas_mut().image().save(path)?;
        Ok(())
    }

    /// `id` if it names a leaf.
    fn leaf(&self, id: NodeId) -> Result<NodeId> {
        if self.node(id)?.has_children() {
            return Err(AtlasError::HasChildren);
        }
        Ok(id)
    }

    fn handle(&self, node: NodeId) -> NodeHandle {
        NodeHandle {
            atlas: self.index,
            node,
        }
    }
}

/// Extent left after taking `by` pixels off a side, never negative.
fn inset(extent: i32, by: i32) -> i32 {
    (extent - by).max(0)
}

fn outline(canvas: &mut Canvas, r: &Rectangle, color: Rgba<u8>, line_width: f64) {
    canvas.stroke_rect(
        f64::from(r.left),
        f64::from(r.top),
        f64::from(r.width()),
        f64::from(r.height()),
        color,
        line_width,
    );
}

/// Drawing scope of one node; restores the canvas state on drop.
///
/// The guard unwinds to the save depth and state it started from, so an
/// extra `restore` through the guard can't pop a state saved by someone else.
pub struct ClipGuard<'a> {
    canvas: &'a mut Canvas,
    depth: usize,
    outer: DrawState,
}

impl Deref for ClipGuard<'_> {
    type Target = Canvas;
    fn deref(&self) -> &Canvas {
        &*self.canvas
    }
}

impl DerefMut for ClipGuard<'_> {
    fn deref_mut(&mut self) -> &mut Canvas {
        &mut *self.canvas
    }
}

impl Drop for ClipGuard<'_> {
    fn drop(&mut self) {
        self.canvas.restore_to(self.depth);
        if self.canvas.saved_depth() == self.depth {
            self.canvas.set_state(self.outer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_root_covers_the_page() {
        let k = Knapsack::new(0, 256);
        assert_eq!(k.root().rectangle(), Rectangle::new(0, 0, 256, 256));
        assert!(!k.root().has_children());
        assert!(!k.root().is_occupied());
        assert!(k.canvas().is_none());
    }

    #[test]
    fn exact_fit_claims_root_without_splitting() {
        let mut k = Knapsack::new(0, 128);
        let id = k.allocate_node(128, 128).unwrap();
        assert_eq!(id, NodeId::ROOT);
        assert_eq!(k.node_count(), 1);
        assert!(k.allocate_node(1, 1).is_none());
    }

    #[test]
    fn tie_splits_horizontally_first() {
        let mut k = Knapsack::new(0, 256);
        k.allocate_node(128, 128).unwrap();
        let (top, bottom) = k.root().children().unwrap();
        assert_eq!(k.node(top).unwrap().rectangle(), Rectangle::new(0, 0, 256, 128));
        assert_eq!(k.node(bottom).unwrap().rectangle(), Rectangle::new(0, 128, 256, 256));
    }

    #[test]
    fn wider_leftover_splits_vertically() {
        let mut k = Knapsack::new(0, 256);
        let id = k.allocate_node(10, 200).unwrap();
        let (left, right) = k.root().children().unwrap();
        assert_eq!(left, id);
        assert_eq!(k.node(left).unwrap().rectangle(), Rectangle::new(0, 0, 10, 256));
        assert_eq!(k.node(right).unwrap().rectangle(), Rectangle::new(10, 0, 256, 256));
        // The first strip is split again, horizontally, for the exact height.
        assert!(k.node(left).unwrap().has_children());
    }

    #[test]
    fn too_large_request_leaves_tree_untouched() {
        let mut k = Knapsack::new(0, 128);
        assert!(k.allocate_node(129, 1).is_none());
        assert!(k.allocate_node(u32::MAX, 1).is_none());
        assert_eq!(k.node_count(), 1);
    }

    #[test]
    fn release_of_branch_fails() {
        let mut k = Knapsack::new(0, 256);
        let id = k.allocate_node(64, 64).unwrap();
        let before = k.node(id).unwrap().image_id();
        assert!(matches!(k.release(NodeId::ROOT), Err(AtlasError::HasChildren)));
        assert_eq!(k.node(id).unwrap().image_id(), before);
    }

    #[test]
    fn unknown_node_is_reported() {
        let mut k = Knapsack::new(3, 256);
        match k.release(NodeId(42)) {
            Err(AtlasError::UnknownNode(h)) => {
                assert_eq!(h.atlas, 3);
                assert_eq!(h.node, NodeId(42));
            }
            other => panic!("expected UnknownNode, got {other:?}"),
        }
    }

    #[test]
    fn debug_mode_outlines_claims() {
        let mut k = Knapsack::new(0, 128);
        k.set_debug(true);
        let id = k.allocate_node(64, 64).unwrap();
        assert_eq!(id, NodeId(3));
        let canvas = k.canvas().unwrap();
        // Blue claim outline runs along the node's top edge.
        assert_eq!(canvas.image().get_pixel(10, 0), &CLAIM_COLOR);
    }

    #[test]
    fn guard_restores_after_panic() {
        let mut k = Knapsack::new(0, 128);
        let id = k.allocate_node(32, 32).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<()> = k.draw(id, |_canvas| panic!("drawing failed"));
        }));
        assert!(result.is_err());
        let canvas = k.canvas().unwrap();
        assert_eq!(canvas.saved_depth(), 0);
        assert_eq!(canvas.clip_region(), None);
    }
}
