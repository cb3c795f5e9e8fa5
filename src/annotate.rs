//! Drawing primitives used by the annotator.
//!
//! Everything draws straight into the frame's BGR buffer and clips at the
//! frame edges. Text uses the 8x8 public-domain bitmap font from `font8x8`.

use font8x8::UnicodeFonts;

use crate::detect::BoundingBox;
use crate::frame::{Bgr, Frame};

/// Glyph cell size of the bitmap font, in pixels.
pub const GLYPH_SIZE: i32 = 8;

/// Label box appearance.
#[derive(Clone, Copy, Debug)]
pub struct LabelStyle {
    /// Integer glyph magnification.
    pub scale: i32,
    /// Padding between text and the filled box edge.
    pub offset: i32,
    pub text_color: Bgr,
}

impl Default for LabelStyle {
    fn default() -> Self {
        Self {
            scale: 1,
            offset: 5,
            text_color: Bgr::WHITE,
        }
    }
}

/// Hollow rectangle with the stroke centred on the box edges.
pub fn draw_rect(frame: &mut Frame, bbox: &BoundingBox, color: Bgr, thickness: u32) {
    let t = thickness.max(1) as i32;
    let outer = t / 2;
    let inner = (t - 1) / 2;
    let BoundingBox { x1, y1, x2, y2 } = *bbox;

    frame.fill_rect(x1 - outer, y1 - outer, x2 + outer, y1 + inner, color);
    frame.fill_rect(x1 - outer, y2 - inner, x2 + outer, y2 + outer, color);
    frame.fill_rect(x1 - outer, y1 - outer, x1 + inner, y2 + outer, color);
    frame.fill_rect(x2 - inner, y1 - outer, x2 + outer, y2 + outer, color);
}

/// Pixel width and height of `text` at the given style.
pub fn text_size(text: &str, style: &LabelStyle) -> (i32, i32) {
    let cell = GLYPH_SIZE * style.scale.max(1);
    (text.chars().count() as i32 * cell, cell)
}

/// Text on a filled box. `origin` is the bottom-left corner of the text,
/// the box extends `style.offset` pixels around it.
pub fn put_text_rect(
    frame: &mut Frame,
    text: &str,
    origin: (i32, i32),
    box_color: Bgr,
    style: &LabelStyle,
) {
    let (ox, oy) = origin;
    let (w, h) = text_size(text, style);
    frame.fill_rect(
        ox - style.offset,
        oy - h - style.offset,
        ox + w + style.offset,
        oy + style.offset,
        box_color,
    );
    draw_text(frame, text, (ox, oy - h), style);
}

/// Bitmap text with its top-left corner at `top_left`.
pub fn draw_text(frame: &mut Frame, text: &str, top_left: (i32, i32), style: &LabelStyle) {
    let scale = style.scale.max(1);
    let cell = GLYPH_SIZE * scale;
    for (i, ch) in text.chars().enumerate() {
        let glyph = font8x8::BASIC_FONTS
            .get(ch)
            .or_else(|| font8x8::BASIC_FONTS.get('?'))
            .unwrap_or([0u8; 8]);
        let gx = top_left.0 + i as i32 * cell;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_SIZE {
                if bits & (1 << col) == 0 {
                    continue;
                }
                let px = gx + col * scale;
                let py = top_left.1 + row as i32 * scale;
                frame.fill_rect(px, py, px + scale - 1, py + scale - 1, style.text_color);
            }
        }
    }
}
