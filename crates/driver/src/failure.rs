//! Failure card rendering.
//!
//! Every failed attempt leaves one diagnostic image in the task folder,
//! so a subscriber paging through artifacts sees what went wrong without
//! opening logs. The card is rendered entirely from the built-in bitmap
//! face; rendering and writing problems are logged and absorbed, never
//! raised, because the card is commentary on a failure that has already
//! been decided.

use std::path::{Path, PathBuf};

use chrono::Utc;
use image::{Rgb, RgbImage};
use statrig_core::artifacts;

use crate::font;

pub const CANVAS_WIDTH: u32 = 800;
pub const CANVAS_HEIGHT: u32 = 600;

const MARGIN: u32 = 32;
const BORDER_INSET: u32 = 10;
const BORDER_THICKNESS: u32 = 3;
const TITLE_SCALE: u32 = 4;
const BODY_SCALE: u32 = 2;
const LINE_GAP: u32 = 6;

const BACKGROUND: Rgb<u8> = Rgb([24, 26, 33]);
const ACCENT: Rgb<u8> = Rgb([224, 82, 82]);
const BODY: Rgb<u8> = Rgb([222, 222, 222]);
const FOOTER: Rgb<u8> = Rgb([140, 140, 140]);

/// Render the card and write it into the task folder under the
/// conventional name. The path is returned even when the write failed,
/// so callers treat the artifact uniformly and the failure path stays
/// exception-free.
pub fn generate(folder: &Path, message: &str) -> PathBuf {
    let path = folder.join(artifacts::FAILURE_IMAGE_NAME);
    let card = render(message);
    if let Err(e) = card.save(&path) {
        tracing::error!(path = %path.display(), error = %e, "Could not write failure card");
    } else {
        tracing::debug!(path = %path.display(), "Failure card written");
    }
    path
}

/// Render the card in memory: title, word-wrapped message, timestamp
/// footer, all inside an accent border.
pub fn render(message: &str) -> RgbImage {
    let mut img = RgbImage::from_pixel(CANVAS_WIDTH, CANVAS_HEIGHT, BACKGROUND);
    draw_border(&mut img);

    let title_y = MARGIN + BORDER_INSET;
    draw_text(&mut img, MARGIN + BORDER_INSET, title_y, "RUN FAILED", TITLE_SCALE, ACCENT);

    let body_advance = (font::GLYPH_WIDTH + 1) * BODY_SCALE;
    let usable = CANVAS_WIDTH - 2 * (MARGIN + BORDER_INSET);
    let max_chars = (usable / body_advance).max(1) as usize;

    let body_top = title_y + font::GLYPH_HEIGHT * TITLE_SCALE + 24;
    let line_height = font::GLYPH_HEIGHT * BODY_SCALE + LINE_GAP;
    let footer_y = CANVAS_HEIGHT - MARGIN - font::GLYPH_HEIGHT * BODY_SCALE;
    let max_lines = ((footer_y.saturating_sub(body_top + line_height)) / line_height) as usize;

    let mut lines = wrap_message(message, max_chars);
    if lines.len() > max_lines && max_lines > 0 {
        lines.truncate(max_lines - 1);
        lines.push("...".to_string());
    }
    for (i, line) in lines.iter().enumerate() {
        let y = body_top + i as u32 * line_height;
        draw_text(&mut img, MARGIN + BORDER_INSET, y, line, BODY_SCALE, BODY);
    }

    let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    draw_text(&mut img, MARGIN + BORDER_INSET, footer_y, &stamp, BODY_SCALE, FOOTER);
    img
}

/// Greedy word wrap to at most `max_chars` columns. Words longer than a
/// line are hard-broken so nothing is ever dropped.
pub fn wrap_message(message: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in message.split_whitespace() {
        let mut word = word;
        // Hard-break oversized words first.
        while word.chars().count() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let split = word
                .char_indices()
                .nth(max_chars)
                .map(|(i, _)| i)
                .unwrap_or(word.len());
            lines.push(word[..split].to_string());
            word = &word[split..];
        }
        if word.is_empty() {
            continue;
        }
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn draw_border(img: &mut RgbImage) {
    let right = CANVAS_WIDTH - BORDER_INSET - BORDER_THICKNESS;
    let bottom = CANVAS_HEIGHT - BORDER_INSET - BORDER_THICKNESS;
    let span_w = CANVAS_WIDTH - 2 * BORDER_INSET;
    let span_h = CANVAS_HEIGHT - 2 * BORDER_INSET;
    fill_rect(img, BORDER_INSET, BORDER_INSET, span_w, BORDER_THICKNESS, ACCENT);
    fill_rect(img, BORDER_INSET, bottom, span_w, BORDER_THICKNESS, ACCENT);
    fill_rect(img, BORDER_INSET, BORDER_INSET, BORDER_THICKNESS, span_h, ACCENT);
    fill_rect(img, right, BORDER_INSET, BORDER_THICKNESS, span_h, ACCENT);
}

fn draw_text(img: &mut RgbImage, x: u32, y: u32, text: &str, scale: u32, color: Rgb<u8>) {
    let advance = (font::GLYPH_WIDTH + 1) * scale;
    let mut pen_x = x;
    for c in text.chars() {
        let rows = font::glyph(c);
        for (row_idx, row) in rows.iter().enumerate() {
            for col in 0..font::GLYPH_WIDTH {
                if row & (1 << (font::GLYPH_WIDTH - 1 - col)) != 0 {
                    fill_rect(
                        img,
                        pen_x + col * scale,
                        y + row_idx as u32 * scale,
                        scale,
                        scale,
                        color,
                    );
                }
            }
        }
        pen_x += advance;
    }
}

/// Clamped rectangle fill; out-of-canvas pixels are silently dropped.
fn fill_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = (x + w).min(CANVAS_WIDTH);
    let y_end = (y + h).min(CANVAS_HEIGHT);
    for py in y.min(CANVAS_HEIGHT)..y_end {
        for px in x.min(CANVAS_WIDTH)..x_end {
            img.put_pixel(px, py, color);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
