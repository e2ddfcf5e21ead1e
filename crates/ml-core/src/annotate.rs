//! Drawing primitives that paint directly into a [`Frame`] buffer.
//!
//! Colours are given as RGB and mapped onto the frame's channel order.
//! Everything clamps to the frame bounds; nothing here can panic on
//! out-of-range coordinates.

use video_ingest::{Frame, FrameFormat};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

pub const GREEN: Color = Color::rgb(0, 255, 0);
pub const ORANGE: Color = Color::rgb(255, 165, 0);
pub const WHITE: Color = Color::rgb(255, 255, 255);
pub const BLACK: Color = Color::rgb(0, 0, 0);

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = 6;

fn put_pixel(frame: &mut Frame, x: i32, y: i32, color: Color) {
    let Some(offset) = frame.pixel_offset(x, y) else {
        return;
    };
    match frame.format {
        FrameFormat::Bgr8 => {
            frame.data[offset..offset + 3].copy_from_slice(&[color.b, color.g, color.r]);
        }
        FrameFormat::Rgb8 => {
            frame.data[offset..offset + 3].copy_from_slice(&[color.r, color.g, color.b]);
        }
        FrameFormat::Gray8 => {
            let luma = (u32::from(color.r) * 299
                + u32::from(color.g) * 587
                + u32::from(color.b) * 114)
                / 1000;
            frame.data[offset] = luma as u8;
        }
    }
}

/// Outline a rectangle `thickness` pixels wide.
pub fn draw_rectangle(
    frame: &mut Frame,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    thickness: i32,
    color: Color,
) {
    let width = frame.width as i32;
    let height = frame.height as i32;
    let thickness = thickness.clamp(1, width.max(height).max(1));
    // Edges just outside the frame stay outside; anything further is pulled in
    // so the loops are bounded by the frame size.
    let clamp_x = |v: i32| v.clamp(-thickness - 1, width + thickness);
    let clamp_y = |v: i32| v.clamp(-thickness - 1, height + thickness);
    let (left, right) = (clamp_x(left.min(right)), clamp_x(left.max(right)));
    let (top, bottom) = (clamp_y(top.min(bottom)), clamp_y(top.max(bottom)));
    for t in 0..thickness {
        for x in left..=right {
            put_pixel(frame, x, top + t, color);
            put_pixel(frame, x, bottom - t, color);
        }
        for y in top..=bottom {
            put_pixel(frame, left + t, y, color);
            put_pixel(frame, right - t, y, color);
        }
    }
}

pub fn fill_rect(frame: &mut Frame, left: i32, top: i32, right: i32, bottom: i32, color: Color) {
    let width = frame.width as i32;
    let height = frame.height as i32;
    let left = left.clamp(0, width);
    let right = right.clamp(-1, width - 1);
    let top = top.clamp(0, height);
    let bottom = bottom.clamp(-1, height - 1);
    for y in top..=bottom {
        for x in left..=right {
            put_pixel(frame, x, y, color);
        }
    }
}

/// Pixel width of `text` rendered at `scale`.
pub fn text_width(text: &str, scale: i32) -> i32 {
    text.chars().count() as i32 * GLYPH_ADVANCE * scale.max(1)
}

/// Render `text` with the built-in 5x7 font; `(x, y)` is the top-left corner.
pub fn draw_label(frame: &mut Frame, mut x: i32, y: i32, text: &str, scale: i32, color: Color) {
    let scale = scale.max(1);
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        let px = x.saturating_add(col * scale);
                        let py = y.saturating_add(row as i32 * scale);
                        let (px_end, py_end) =
                            (px.saturating_add(scale - 1), py.saturating_add(scale - 1));
                        fill_rect(frame, px, py, px_end, py_end, color);
                    }
                }
            }
        }
        x = x.saturating_add(GLYPH_ADVANCE * scale);
        if x >= frame.width as i32 {
            break;
        }
    }
}

/// Label on a solid background box with a small margin.
pub fn draw_banner(
    frame: &mut Frame,
    x: i32,
    y: i32,
    text: &str,
    scale: i32,
    foreground: Color,
    background: Color,
) {
    let scale = scale.max(1);
    let margin = 2 * scale;
    fill_rect(
        frame,
        x.saturating_sub(margin),
        y.saturating_sub(margin),
        x.saturating_add(text_width(text, scale)).saturating_add(margin),
        y.saturating_add(GLYPH_HEIGHT * scale).saturating_add(margin),
        background,
    );
    draw_label(frame, x, y, text, scale, foreground);
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '+' => [0, 0b00100, 0b00100, 0b11111, 0b00100, 0b00100, 0],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        '/' => [0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0],
        '[' => [0b01110, 0b01000, 0b01000, 0b01000, 0b01000, 0b01000, 0b01110],
        ']' => [0b01110, 0b00010, 0b00010, 0b00010, 0b00010, 0b00010, 0b01110],
        '|' => [0b00100; 7],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(bits)
}
