//! Renderers.
//!
//! A renderer owns the drawing surface and reports its current size. The presenter
//! hands it the latest preview frame and the overlay projected for that size.
//!
//! - `CanvasRenderer`: software RGB canvas; the frame is scaled to fill the viewport
//!   and boxes are stroked on top with a filled label plate at each anchor.
//! - `LogRenderer`: headless; logs overlay geometry.

mod font;

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::frame::{rgb_len, Frame};
use crate::geometry::Viewport;
use crate::overlay::OverlayItem;

pub trait Renderer {
    /// Current device-pixel size of the surface.
    fn viewport(&self) -> Viewport;

    /// Draw `frame` with `overlay` on top. `overlay` was projected for `viewport()`.
    fn draw(&mut self, frame: &Frame, overlay: &[OverlayItem]) -> Result<()>;
}

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_PLATE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const STROKE_WIDTH: u32 = 2;
const LABEL_PADDING: u32 = 2;
const GLYPH_ADVANCE: u32 = font::GLYPH_COLUMNS + 1;
const LABEL_HEIGHT: u32 = font::GLYPH_ROWS + 2 * LABEL_PADDING;

/// Software renderer onto an RGB24 canvas sized to the viewport.
pub struct CanvasRenderer {
    canvas: RgbImage,
    frames_drawn: u64,
}

impl CanvasRenderer {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        rgb_len(width, height)?;
        Ok(Self {
            canvas: RgbImage::new(width, height),
            frames_drawn: 0,
        })
    }

    /// Resize the surface (window resize, rotation). The next draw uses the new size.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        rgb_len(width, height)?;
        self.canvas = RgbImage::new(width, height);
        Ok(())
    }

    pub fn canvas(&self) -> &[u8] {
        self.canvas.as_raw()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        self.canvas.get_pixel_checked(x, y).map(|p| p.0)
    }

    /// Copy of the composed canvas, or `None` before the first draw.
    pub fn composed_frame(&self) -> Result<Option<Frame>> {
        if self.frames_drawn == 0 {
            return Ok(None);
        }
        let (width, height) = self.canvas.dimensions();
        let frame = Frame::from_rgb(
            self.canvas.as_raw().clone(),
            width,
            height,
            self.frames_drawn,
        )?;
        Ok(Some(frame))
    }

    fn blit_scaled(&mut self, frame: &Frame) -> Result<()> {
        let (width, height) = self.canvas.dimensions();
        if width == 0 || height == 0 {
            return Ok(());
        }
        if frame.width == 0 || frame.height == 0 {
            self.canvas = RgbImage::new(width, height);
            return Ok(());
        }
        let source: ImageBuffer<Rgb<u8>, &[u8]> =
            ImageBuffer::from_raw(frame.width, frame.height, frame.pixels())
                .ok_or_else(|| anyhow!("frame {} has a short buffer", frame.sequence))?;
        self.canvas = imageops::resize(&source, width, height, FilterType::Nearest);
        Ok(())
    }

    fn stroke_item(&mut self, item: &OverlayItem) {
        let x0 = item.rect.min_x().round() as i32;
        let y0 = item.rect.min_y().round() as i32;
        let x1 = item.rect.max_x().round() as i32;
        let y1 = item.rect.max_y().round() as i32;

        // Nested one-pixel outlines, outermost on the box edge.
        for inset in 0..STROKE_WIDTH as i32 {
            let w = x1 - x0 - 2 * inset;
            let h = y1 - y0 - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let outline = Rect::at(x0 + inset, y0 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut self.canvas, outline, BOX_COLOR);
        }

        // Label plate at the anchor; no collision avoidance between labels.
        let ax = item.label_anchor.x.round() as i32;
        let ay = item.label_anchor.y.round() as i32;
        let glyphs = item.label.chars().count() as u32;
        let plate_width = glyphs * GLYPH_ADVANCE + 2 * LABEL_PADDING;
        let plate = Rect::at(ax, ay).of_size(plate_width, LABEL_HEIGHT);
        draw_filled_rect_mut(&mut self.canvas, plate, LABEL_PLATE_COLOR);
        self.draw_text(
            ax + LABEL_PADDING as i32,
            ay + LABEL_PADDING as i32,
            &item.label,
        );
    }

    fn draw_text(&mut self, x: i32, y: i32, text: &str) {
        let (width, height) = self.canvas.dimensions();
        let mut origin = x;
        for ch in text.chars() {
            let rows = font::glyph(ch);
            for row in 0..font::GLYPH_ROWS {
                for col in 0..font::GLYPH_COLUMNS {
                    if !font::lit(&rows, col, row) {
                        continue;
                    }
                    let px = origin + col as i32;
                    let py = y + row as i32;
                    if px >= 0 && py >= 0 && (px as u32) < width && (py as u32) < height {
                        self.canvas.put_pixel(px as u32, py as u32, LABEL_TEXT_COLOR);
                    }
                }
            }
            origin += GLYPH_ADVANCE as i32;
        }
    }
}

impl Renderer for CanvasRenderer {
    fn viewport(&self) -> Viewport {
        let (width, height) = self.canvas.dimensions();
        Viewport::new(width as f32, height as f32)
    }

    fn draw(&mut self, frame: &Frame, overlay: &[OverlayItem]) -> Result<()> {
        self.blit_scaled(frame)?;
        for item in overlay {
            self.stroke_item(item);
        }
        self.frames_drawn += 1;
        Ok(())
    }
}

/// Encode a composed frame as JPEG.
pub fn save_jpeg(frame: &Frame, path: &Path) -> Result<()> {
    let still: ImageBuffer<Rgb<u8>, &[u8]> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.pixels())
            .ok_or_else(|| anyhow!("frame {} has a short buffer", frame.sequence))?;
    still
        .save_with_format(path, ImageFormat::Jpeg)
        .map_err(|e| anyhow!("failed to write snapshot {}: {}", path.display(), e))
}

/// Headless renderer that logs what would be drawn.
pub struct LogRenderer {
    viewport: Viewport,
    frames_drawn: u64,
    last_overlay: Vec<OverlayItem>,
}

impl LogRenderer {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            frames_drawn: 0,
            last_overlay: Vec::new(),
        }
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn last_overlay(&self) -> &[OverlayItem] {
        &self.last_overlay
    }
}

impl Renderer for LogRenderer {
    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn draw(&mut self, frame: &Frame, overlay: &[OverlayItem]) -> Result<()> {
        self.frames_drawn += 1;
        for item in overlay {
            log::debug!(
                "frame {}: {} {:.2} at ({:.1}, {:.1}) {:.1}x{:.1}",
                frame.sequence,
                item.label,
                item.confidence,
                item.rect.x,
                item.rect.y,
                item.rect.width,
                item.rect.height
            );
        }
        self.last_overlay = overlay.to_vec();
        Ok(())
    }
}
