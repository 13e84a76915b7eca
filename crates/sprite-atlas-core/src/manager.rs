use crate::canvas::Canvas;
use crate::config::{ManagerConfig, TextureSize};
use crate::error::{AtlasError, Dimension, Result};
use crate::knapsack::{ClipGuard, Knapsack, Node, NodeId, SharedHooks};
use crate::model::{AtlasSnapshot, AtlasStats};
use crate::texture::{NoHooks, Texture};
use futures::channel::oneshot;
use futures::future::{self, Ready};
use image::Rgba;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use tracing::{debug, info, instrument};

/// Handle to an allocated leaf: which atlas, and which node inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeHandle {
    pub atlas: usize,
    pub node: NodeId,
}

struct QueueEntry {
    width: u32,
    height: u32,
    sender: oneshot::Sender<NodeHandle>,
}

/// A queued allocation, settled by [`TextureManager::solve_async`].
///
/// Resolves to [`AtlasError::Canceled`] only if the manager is dropped with
/// the request still queued; a queue that is never solved never settles.
#[must_use = "a pending node does nothing unless polled or checked"]
pub struct PendingNode {
    receiver: oneshot::Receiver<NodeHandle>,
}

impl PendingNode {
    /// Non-blocking check: `None` while the request is still queued.
    pub fn try_resolve(&mut self) -> Option<Result<NodeHandle>> {
        match self.receiver.try_recv() {
            Ok(Some(handle)) => Some(Ok(handle)),
            Ok(None) => None,
            Err(_) => Some(Err(AtlasError::Canceled)),
        }
    }
}

impl Future for PendingNode {
    type Output = Result<NodeHandle>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|r| r.map_err(|_| AtlasError::Canceled))
    }
}

/// Hands out atlas nodes, creating atlases as needed.
///
/// Requests go to the existing atlases in creation order; a new atlas of the
/// configured size is created only when none of them has room. Atlases are
/// never removed, even when every node in them has been released.
pub struct TextureManager {
    size: TextureSize,
    background: Rgba<u8>,
    debug: bool,
    knapsacks: Vec<Knapsack>,
    queue: Option<VecDeque<QueueEntry>>,
    hooks: SharedHooks,
}

impl TextureManager {
    /// Manager for `size` x `size` atlases; invalid sizes fall back to 1024.
    pub fn new(size: u32) -> Self {
        Self::with_config(ManagerConfig::builder().texture_size(size).build())
    }

    pub fn with_config(cfg: ManagerConfig) -> Self {
        Self {
            size: cfg.texture_size,
            background: Rgba(cfg.background),
            debug: cfg.debug,
            knapsacks: Vec::new(),
            queue: None,
            hooks: Rc::new(RefCell::new(NoHooks)),
        }
    }

    /// Receive texture lifecycle notifications. Only atlases created after
    /// this call use the new hooks.
    pub fn with_hooks(mut self, hooks: SharedHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn texture_size(&self) -> u32 {
        self.size.get()
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Toggle outline drawing for every atlas, existing and future.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
        for knapsack in &mut self.knapsacks {
            knapsack.set_debug(debug);
        }
    }

    /// All atlases in creation order.
    pub fn knapsacks(&self) -> &[Knapsack] {
        &self.knapsacks
    }

    pub fn knapsack(&self, index: usize) -> Option<&Knapsack> {
        self.knapsacks.get(index)
    }

    pub fn knapsack_mut(&mut self, index: usize) -> Option<&mut Knapsack> {
        self.knapsacks.get_mut(index)
    }

    fn add_knapsack(&mut self) -> &mut Knapsack {
        let index = self.knapsacks.len();
        let size = self.size.get();
        if self.debug {
            info!(size, atlas = index + 1, "allocated texture map");
        } else {
            debug!(size, atlas = index + 1, "allocated texture map");
        }
        self.knapsacks.push(Knapsack::with_settings(
            index,
            size,
            self.background,
            self.debug,
            self.hooks.clone(),
        ));
        &mut self.knapsacks[index]
    }

    /// Reject requests that can't fit even an empty atlas.
    pub fn validate_size(&self, width: u32, height: u32) -> Result<()> {
        let limit = self.size.get();
        if width > limit {
            return Err(AtlasError::TooLarge {
                dimension: Dimension::Width,
                value: width,
                limit,
            });
        }
        if height > limit {
            return Err(AtlasError::TooLarge {
                dimension: Dimension::Height,
                value: height,
                limit,
            });
        }
        Ok(())
    }

    /// Claim a node for a `width` x `height` image, creating an atlas if needed.
    pub fn allocate(&mut self, width: u32, height: u32) -> Result<NodeHandle> {
        self.validate_size(width, height)?;
        self.place(width, height)
    }

    /// Future form of [`TextureManager::allocate`]; already settled when returned.
    pub fn allocate_node(&mut self, width: u32, height: u32) -> Ready<Result<NodeHandle>> {
        future::ready(self.allocate(width, height))
    }

    /// Queue a request for the next [`TextureManager::solve_async`].
    ///
    /// The size is validated now; placement happens when the queue is solved.
    pub fn allocate_async(&mut self, width: u32, height: u32) -> Result<PendingNode> {
        // A rejected request still sets the queue up.
        if self.queue.is_none() {
            self.queue = Some(VecDeque::new());
        }
        self.validate_size(width, height)?;
        let (sender, receiver) = oneshot::channel();
        self.queue.get_or_insert_with(VecDeque::new).push_back(QueueEntry {
            width,
            height,
            sender,
        });
        Ok(PendingNode { receiver })
    }

    /// Number of requests waiting for [`TextureManager::solve_async`].
    pub fn pending_count(&self) -> usize {
        self.queue.as_ref().map_or(0, VecDeque::len)
    }

    /// Place every queued request in FIFO order and settle its future.
    ///
    /// Returns the placed handles in queue order and leaves the queue empty.
    #[instrument(skip_all)]
    pub fn solve_async(&mut self) -> Result<Vec<NodeHandle>> {
        let entries = match self.queue.as_mut() {
            Some(queue) => std::mem::take(queue),
            None => return Err(AtlasError::QueueNotInitialized),
        };
        debug!(pending = entries.len(), "solving allocation queue");
        let mut placed = Vec::with_capacity(entries.len());
        for entry in entries {
            let handle = self.place(entry.width, entry.height)?;
            // The caller may have dropped the future; the node stays allocated.
            let _ = entry.sender.send(handle);
            placed.push(handle);
        }
        Ok(placed)
    }

    fn place(&mut self, width: u32, height: u32) -> Result<NodeHandle> {
        for knapsack in &mut self.knapsacks {
            if let Some(node) = knapsack.allocate_node(width, height) {
                return Ok(NodeHandle {
                    atlas: knapsack.index(),
                    node,
                });
            }
        }
        let knapsack = self.add_knapsack();
        let atlas = knapsack.index();
        knapsack
            .allocate_node(width, height)
            .map(|node| NodeHandle { atlas, node })
            .ok_or(AtlasError::OutOfSpace { width, height })
    }

    /// Give a node back to its atlas; `None` is a no-op.
    pub fn release(&mut self, node: Option<NodeHandle>) -> Result<()> {
        match node {
            Some(handle) => self.knapsack_for_mut(handle)?.release(handle.node),
            None => Ok(()),
        }
    }

    pub fn node(&self, handle: NodeHandle) -> Result<&Node> {
        self.knapsacks
            .get(handle.atlas)
            .ok_or(AtlasError::UnknownNode(handle))?
            .node(handle.node)
    }

    pub fn uv_coordinates(&self, handle: NodeHandle) -> Result<[f64; 4]> {
        self.knapsacks
            .get(handle.atlas)
            .ok_or(AtlasError::UnknownNode(handle))?
            .uv_coordinates(handle.node)
    }

    /// The node's texture view, built on first access and cached until release.
    pub fn texture(&mut self, handle: NodeHandle) -> Result<&Texture> {
        self.knapsack_for_mut(handle)?.texture(handle.node)
    }

    /// See [`Knapsack::clip_context`].
    pub fn clip_context(&mut self, handle: NodeHandle) -> Result<ClipGuard<'_>> {
        self.knapsack_for_mut(handle)?.clip_context(handle.node)
    }

    /// Run `draw` clipped to the node, restoring the canvas afterwards.
    pub fn draw<R>(&mut self, handle: NodeHandle, draw: impl FnOnce(&mut Canvas) -> R) -> Result<R> {
        self.knapsack_for_mut(handle)?.draw(handle.node, draw)
    }

    pub fn snapshot(&self) -> Vec<AtlasSnapshot> {
        self.knapsacks.iter().map(Knapsack::snapshot).collect()
    }

    pub fn stats(&self) -> AtlasStats {
        let free_leaves = self.knapsacks.iter().map(Knapsack::free_leaf_count).sum();
        AtlasStats::from_snapshots(&self.snapshot(), free_leaves)
    }

    fn knapsack_for_mut(&mut self, handle: NodeHandle) -> Result<&mut Knapsack> {
        self.knapsacks
            .get_mut(handle.atlas)
            .ok_or(AtlasError::UnknownNode(handle))
    }
}

impl Default for TextureManager {
    fn default() -> Self {
        Self::with_config(ManagerConfig::default())
    }
}
