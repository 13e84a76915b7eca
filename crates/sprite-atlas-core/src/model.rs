use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Axis-aligned rectangle in atlas pixels, stored as edges.
///
/// `left`/`top` are the first pixel inside the rectangle, `right`/`bottom` the
/// first pixel past it. Instances are never mutated; splitting a node creates
/// new rectangles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Rectangle {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rectangle {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Builds a rectangle from arbitrary floating point edges.
    ///
    /// Each edge is floored; NaN and infinities become 0. Never fails.
    pub fn from_f64(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self::new(sanitize(left), sanitize(top), sanitize(right), sanitize(bottom))
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Horizontal centre, biased half a pixel left so strokes land on pixel gaps.
    pub fn center_x(&self) -> f64 {
        (f64::from(self.right - self.left) / 2.0 + f64::from(self.left)).floor() - 0.5
    }

    /// Vertical centre, biased half a pixel up.
    pub fn center_y(&self) -> f64 {
        (f64::from(self.bottom - self.top) / 2.0 + f64::from(self.top)).floor() - 0.5
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width().max(0).unsigned_abs()) * u64::from(self.height().max(0).unsigned_abs())
    }

    /// True if the two rectangles share at least one pixel.
    pub fn intersects(&self, other: &Rectangle) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }
}

fn sanitize(v: f64) -> i32 {
    if v.is_finite() {
        // `as` saturates out-of-range values.
        v.floor() as i32
    } else {
        0
    }
}

/// An occupied leaf as seen from outside the tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedNode {
    pub node: usize,
    pub image_id: Uuid,
    pub rectangle: Rectangle,
    pub uv: [f64; 4],
}

/// One atlas page (logical record).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtlasSnapshot {
    pub index: usize,
    pub size: u32,
    pub nodes: Vec<PlacedNode>,
}

/// Statistics about how full the atlases are.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AtlasStats {
    /// Number of atlases created so far.
    pub num_atlases: usize,
    /// Leaves currently claimed.
    pub occupied_nodes: usize,
    /// Leaves that exist but are free (released or split remainders).
    pub free_leaves: usize,
    /// Sum of `size * size` over all atlases.
    pub total_area: u64,
    /// Sum of the claimed leaves' areas.
    pub used_area: u64,
    /// used_area / total_area (0.0 to 1.0).
    pub occupancy: f64,
}

impl AtlasStats {
    pub fn from_snapshots(snapshots: &[AtlasSnapshot], free_leaves: usize) -> Self {
        let num_atlases = snapshots.len();
        let mut occupied_nodes = 0;
        let mut total_area = 0u64;
        let mut used_area = 0u64;
        for atlas in snapshots {
            total_area += u64::from(atlas.size) * u64::from(atlas.size);
            occupied_nodes += atlas.nodes.len();
            used_area += atlas.nodes.iter().map(|n| n.rectangle.area()).sum::<u64>();
        }
        let occupancy = if total_area > 0 {
            used_area as f64 / total_area as f64
        } else {
            0.0
        };
        Self {
            num_atlases,
            occupied_nodes,
            free_leaves,
            total_area,
            used_area,
            occupancy,
        }
    }

    /// Returns a human-readable summary of the statistics.
    pub fn summary(&self) -> String {
        format!(
            "Atlases: {}, Nodes: {}, Free leaves: {}, Occupancy: {:.2}%, Total Area: {} px², Used Area: {} px²",
            self.num_atlases,
            self.occupied_nodes,
            self.free_leaves,
            self.occupancy * 100.0,
            self.total_area,
            self.used_area,
        )
    }

    /// Returns wasted space in pixels.
    pub fn wasted_area(&self) -> u64 {
        self.total_area.saturating_sub(self.used_area)
    }
}
