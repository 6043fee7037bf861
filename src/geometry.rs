//! Overlay geometry.
//!
//! Detection rectangles arrive normalized to the unit square with the origin at the
//! bottom-left corner and y increasing upward. Rendering surfaces use device pixels
//! with the origin at the top-left corner and y increasing downward.
//!
//! `project` is the only place where the two coordinate spaces meet. It is a pure
//! function of the rectangle and the viewport handed to it; callers must pass the
//! viewport as it is *now*, never one cached from an earlier frame.

use serde::{Deserialize, Serialize};

/// Bounding box as fractions of the image size. Origin bottom-left, y up.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a normalized rect from a pixel box in top-left image space.
    ///
    /// `(x1, y1)` is the top-left corner and `(x2, y2)` the bottom-right corner, both
    /// in pixels of an image `image_width` x `image_height`. This is the form most
    /// inference runtimes emit, so backends use it to enter the bottom-left space.
    pub fn from_top_left_pixels(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        image_width: u32,
        image_height: u32,
    ) -> Self {
        if image_width == 0 || image_height == 0 {
            return Self::default();
        }
        let w = image_width as f32;
        let h = image_height as f32;
        let (left, right) = (x1.min(x2), x1.max(x2));
        let (top, bottom) = (y1.min(y2), y1.max(y2));
        Self {
            x: left / w,
            y: 1.0 - bottom / h,
            width: (right - left) / w,
            height: (bottom - top) / h,
        }
        .clamped()
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    /// Clamp into the unit square.
    ///
    /// Non-finite components become 0, negative extents collapse to 0, the origin is
    /// clamped into `[0, 1]` and the extents are cut so that `x + width <= 1` and
    /// `y + height <= 1`. Upstream output is never trusted to be in range.
    pub fn clamped(&self) -> Self {
        let x = unit(self.x);
        let y = unit(self.y);
        let width = non_negative(self.width).min(1.0 - x);
        let height = non_negative(self.height).min(1.0 - y);
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Device-pixel size of the rendering surface at the moment of projection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// A point in device pixels, top-left origin.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Bounding box in device pixels. Origin top-left, y down.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProjectedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ProjectedRect {
    pub fn min_x(&self) -> f32 {
        self.x
    }

    pub fn min_y(&self) -> f32 {
        self.y
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    /// Where the label is drawn: the top-left corner of the box.
    pub fn label_anchor(&self) -> Point {
        Point {
            x: self.min_x(),
            y: self.min_y(),
        }
    }
}

/// Map a normalized, bottom-left-origin rect onto a top-left-origin viewport.
///
/// The vertical flip is taken from the rect's *top* edge in source space
/// (`1 - max_y`); flipping the bottom edge mirrors boxes around the wrong line.
pub fn project(rect: NormalizedRect, viewport: Viewport) -> ProjectedRect {
    let rect = rect.clamped();
    let flipped_y = 1.0 - rect.max_y();
    ProjectedRect {
        x: rect.x * viewport.width,
        y: flipped_y * viewport.height,
        width: rect.width * viewport.width,
        height: rect.height * viewport.height,
    }
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn unit(value: f32) -> f32 {
    finite_or_zero(value).clamp(0.0, 1.0)
}

fn non_negative(value: f32) -> f32 {
    finite_or_zero(value).max(0.0)
}
