use crate::model::Rectangle;
use image::{Rgba, RgbaImage};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DrawState {
    clip: Option<Rectangle>,
    origin: (f64, f64),
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            clip: None,
            origin: (0.0, 0.0),
        }
    }
}

/// RGBA backing surface of one atlas.
///
/// Drawing calls take coordinates relative to the current origin (see
/// [`Canvas::translate`]) and never touch pixels outside the current clip
/// region. A pixel is covered by a shape when its centre lies inside it.
/// `save`/`restore` push and pop clip + origin, like a 2D canvas context.
pub struct Canvas {
    image: RgbaImage,
    background: Rgba<u8>,
    state: DrawState,
    stack: Vec<DrawState>,
}

impl Canvas {
    pub fn new(size: u32, background: Rgba<u8>) -> Self {
        Self {
            image: RgbaImage::from_pixel(size, size, background),
            background,
            state: DrawState::default(),
            stack: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Get a reference to the pixel data.
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Get a mutable reference to the pixel data, bypassing clip and origin.
    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn save(&mut self) {
        self.stack.push(self.state);
    }

    /// Pops the last saved state. Unbalanced calls are ignored.
    pub fn restore(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
    }

    /// Pops saved states until only `depth` remain.
    pub fn restore_to(&mut self, depth: usize) {
        while self.stack.len() > depth {
            self.restore();
        }
    }

    pub(crate) fn state(&self) -> DrawState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: DrawState) {
        self.state = state;
    }

    /// Number of `save` calls not yet matched by a `restore`.
    pub fn saved_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn translate(&mut self, dx: f64, dy: f64) {
        self.state.origin.0 += dx;
        self.state.origin.1 += dy;
    }

    pub fn origin(&self) -> (f64, f64) {
        self.state.origin
    }

    /// Narrows the clip region to the given rectangle (relative to the origin).
    pub fn clip(&mut self, x: f64, y: f64, w: f64, h: f64) {
        let region = self.device_rect(x, y, w, h);
        self.state.clip = Some(match self.state.clip {
            Some(current) => intersect(&current, &region),
            None => region,
        });
    }

    pub fn clip_region(&self) -> Option<Rectangle> {
        self.state.clip
    }

    /// Resets the covered pixels to the surface background.
    pub fn clear_rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        let color = self.background;
        self.fill_device(self.device_rect(x, y, w, h), color);
    }

    pub fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Rgba<u8>) {
        self.fill_device(self.device_rect(x, y, w, h), color);
    }

    /// Outlines a rectangle with a stroke centred on its edges.
    pub fn stroke_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Rgba<u8>, line_width: f64) {
        let half = line_width / 2.0;
        self.fill_rect(x - half, y - half, w + line_width, line_width, color);
        self.fill_rect(x - half, y + h - half, w + line_width, line_width, color);
        self.fill_rect(x - half, y - half, line_width, h + line_width, color);
        self.fill_rect(x + w - half, y - half, line_width, h + line_width, color);
    }

    /// Copies `src` with its top-left corner at (x, y).
    pub fn draw_image(&mut self, src: &RgbaImage, x: f64, y: f64) {
        let dst = self.device_rect(x, y, f64::from(src.width()), f64::from(src.height()));
        let visible = self.visible(dst);
        for py in visible.top..visible.bottom {
            for px in visible.left..visible.right {
                let sx = (px - dst.left) as u32;
                let sy = (py - dst.top) as u32;
                self.image
                    .put_pixel(px as u32, py as u32, *src.get_pixel(sx, sy));
            }
        }
    }

    /// Converts origin-relative coordinates into the pixel span they cover.
    fn device_rect(&self, x: f64, y: f64, w: f64, h: f64) -> Rectangle {
        let (ox, oy) = self.state.origin;
        let (x0, x1) = ordered(x + ox, x + ox + w);
        let (y0, y1) = ordered(y + oy, y + oy + h);
        Rectangle::from_f64(
            (x0 - 0.5).ceil(),
            (y0 - 0.5).ceil(),
            (x1 - 0.5).ceil(),
            (y1 - 0.5).ceil(),
        )
    }

    /// Restricts a device rectangle to the surface and the active clip.
    fn visible(&self, r: Rectangle) -> Rectangle {
        let bounds = Rectangle::new(0, 0, self.width() as i32, self.height() as i32);
        let r = intersect(&r, &bounds);
        match self.state.clip {
            Some(clip) => intersect(&r, &clip),
            None => r,
        }
    }

    fn fill_device(&mut self, r: Rectangle, color: Rgba<u8>) {
        let visible = self.visible(r);
        for y in visible.top..visible.bottom {
            for x in visible.left..visible.right {
                self.image.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b { (a, b) } else { (b, a) }
}

fn intersect(a: &Rectangle, b: &Rectangle) -> Rectangle {
    let left = a.left.max(b.left);
    let top = a.top.max(b.top);
    let right = a.right.min(b.right).max(left);
    let bottom = a.bottom.min(b.bottom).max(top);
    Rectangle::new(left, top, right, bottom)
}
