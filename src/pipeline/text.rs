//! Glyph quad generation for queued strings
//!
//! Glyph rasterization happens elsewhere; a [`FontAtlas`] arrives with its
//! pixels and per-glyph metrics already computed. Strings are laid out on a
//! baseline at y = 0 with y pointing up, in atlas pixels.

use crate::pipeline::sprites::Anchor;
use crate::resources::VertexAttributes;
use glam::{Quat, Vec2, Vec3, Vec4};
use std::collections::HashMap;

/// Floats per screen-space glyph vertex: position 2D, uv, color
const SS_FLOATS: usize = 8;
/// Floats per world-space glyph vertex: position, uv, color
const WS_FLOATS: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphMetrics {
    /// Top-left corner in the atlas, normalized
    pub uv_min: Vec2,
    pub uv_max: Vec2,
    /// Bitmap size in pixels
    pub size: Vec2,
    /// Offset from the pen position to the bitmap's top-left, y up
    pub bearing: Vec2,
    pub advance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FontAtlas {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// RGBA8, coverage in alpha
    pub pixels: Vec<u8>,
    /// Pixel height of one em; one em is one unit in world space
    pub em_size: f32,
    pub line_height: f32,
    pub glyphs: HashMap<char, GlyphMetrics>,
}

impl FontAtlas {
    fn glyph(&self, c: char) -> Option<&GlyphMetrics> {
        self.glyphs.get(&c).or_else(|| self.glyphs.get(&'?'))
    }
}

/// A string waiting for the next flush
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedString {
    pub text: String,
    pub color: Vec4,
    /// Normalized screen position for screen-space text, world position
    /// otherwise
    pub position: Vec3,
    /// World-space only
    pub rotation: Quat,
    /// Screen-space only
    pub anchor: Anchor,
    /// Extra pixels between glyphs
    pub spacing: f32,
}

struct GlyphQuad {
    min: Vec2,
    max: Vec2,
    uv_min: Vec2,
    uv_max: Vec2,
}

/// Lay out `text` in atlas pixels. Returns the quads and the bounds of the
/// whole string.
fn layout(font: &FontAtlas, text: &str, spacing: f32) -> (Vec<GlyphQuad>, Vec2, Vec2) {
    let mut quads = Vec::with_capacity(text.len());
    let mut pen = Vec2::ZERO;
    let mut bounds_min = Vec2::splat(f32::MAX);
    let mut bounds_max = Vec2::splat(f32::MIN);

    for c in text.chars() {
        if c == '\n' {
            pen = Vec2::new(0.0, pen.y - font.line_height);
            continue;
        }
        let Some(glyph) = font.glyph(c) else {
            pen.x += font.em_size * 0.5 + spacing;
            continue;
        };
        if glyph.size.x > 0.0 && glyph.size.y > 0.0 {
            let top_left = pen + glyph.bearing;
            let min = Vec2::new(top_left.x, top_left.y - glyph.size.y);
            let max = Vec2::new(top_left.x + glyph.size.x, top_left.y);
            bounds_min = bounds_min.min(min);
            bounds_max = bounds_max.max(max);
            quads.push(GlyphQuad {
                min,
                max,
                uv_min: glyph.uv_min,
                uv_max: glyph.uv_max,
            });
        }
        pen.x += glyph.advance + spacing;
    }

    if quads.is_empty() {
        (quads, Vec2::ZERO, Vec2::ZERO)
    } else {
        (quads, bounds_min, bounds_max)
    }
}

/// Corners of a quad as two counter-clockwise triangles: (position, uv)
fn corners(quad: &GlyphQuad) -> [(Vec2, Vec2); 6] {
    let bl = (quad.min, Vec2::new(quad.uv_min.x, quad.uv_max.y));
    let br = (Vec2::new(quad.max.x, quad.min.y), quad.uv_max);
    let tr = (quad.max, Vec2::new(quad.uv_max.x, quad.uv_min.y));
    let tl = (Vec2::new(quad.min.x, quad.max.y), quad.uv_min);
    [bl, br, tr, bl, tr, tl]
}

pub fn screen_space_attributes() -> VertexAttributes {
    VertexAttributes::POSITION_2D | VertexAttributes::UV | VertexAttributes::COLOR
}

pub fn world_space_attributes() -> VertexAttributes {
    VertexAttributes::POSITION | VertexAttributes::UV | VertexAttributes::COLOR
}

/// Glyph vertices in clip space for a `width` x `height` target
pub fn screen_space_vertices(font: &FontAtlas, strings: &[QueuedString], width: u32, height: u32) -> Vec<f32> {
    let pixel_to_ndc = Vec2::new(2.0 / width.max(1) as f32, 2.0 / height.max(1) as f32);
    let mut vertices = Vec::new();

    for string in strings {
        let (quads, min, max) = layout(font, &string.text, string.spacing);
        let anchor_px = (min + max) * 0.5 + string.anchor.point() * (max - min);
        let origin = string.position.truncate();
        for quad in &quads {
            for (position, uv) in corners(quad) {
                let ndc = origin + (position - anchor_px) * pixel_to_ndc;
                vertices.extend_from_slice(&[ndc.x, ndc.y, uv.x, uv.y]);
                vertices.extend_from_slice(&string.color.to_array());
            }
        }
    }
    debug_assert_eq!(vertices.len() % SS_FLOATS, 0);
    vertices
}

/// Glyph vertices in world space, one em per unit, starting at each string's
/// position and running along its rotated x axis
pub fn world_space_vertices(font: &FontAtlas, strings: &[QueuedString]) -> Vec<f32> {
    let scale = 1.0 / font.em_size.max(1.0);
    let mut vertices = Vec::new();

    for string in strings {
        let (quads, _, _) = layout(font, &string.text, string.spacing);
        for quad in &quads {
            for (position, uv) in corners(quad) {
                let world = string.position + string.rotation * (position * scale).extend(0.0);
                vertices.extend_from_slice(&[world.x, world.y, world.z, uv.x, uv.y]);
                vertices.extend_from_slice(&string.color.to_array());
            }
        }
    }
    debug_assert_eq!(vertices.len() % WS_FLOATS, 0);
    vertices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn font() -> FontAtlas {
        let glyph = GlyphMetrics {
            uv_min: Vec2::ZERO,
            uv_max: Vec2::splat(0.5),
            size: Vec2::new(8.0, 10.0),
            bearing: Vec2::new(0.0, 10.0),
            advance: 10.0,
        };
        FontAtlas {
            name: "test".into(),
            width: 16,
            height: 16,
            pixels: vec![255; 16 * 16 * 4],
            em_size: 10.0,
            line_height: 12.0,
            glyphs: [('a', glyph), ('?', glyph)].into_iter().collect(),
        }
    }

    fn queued(text: &str, anchor: Anchor) -> QueuedString {
        QueuedString {
            text: text.into(),
            color: Vec4::ONE,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            anchor,
            spacing: 0.0,
        }
    }

    #[test]
    fn test_six_vertices_per_visible_glyph() {
        let font = font();
        let vertices = screen_space_vertices(&font, &[queued("aa a", Anchor::Center)], 100, 100);
        // the space falls back to '?'
        assert_eq!(vertices.len(), 4 * 6 * SS_FLOATS);
        assert_eq!(screen_space_attributes().stride() as usize, SS_FLOATS * 4);
        assert_eq!(world_space_attributes().stride() as usize, WS_FLOATS * 4);
    }

    #[test]
    fn test_top_left_anchor_starts_at_position() {
        let font = font();
        let vertices = screen_space_vertices(&font, &[queued("a", Anchor::TopLeft)], 100, 100);
        let xs: Vec<f32> = vertices.chunks(SS_FLOATS).map(|v| v[0]).collect();
        let ys: Vec<f32> = vertices.chunks(SS_FLOATS).map(|v| v[1]).collect();
        let min_x = xs.iter().copied().fold(f32::MAX, f32::min);
        let max_y = ys.iter().copied().fold(f32::MIN, f32::max);
        assert!(min_x.abs() < 1e-6);
        assert!(max_y.abs() < 1e-6);
        // 8 px wide on a 100 px target
        let max_x = xs.iter().copied().fold(f32::MIN, f32::max);
        assert!((max_x - 0.16).abs() < 1e-6);
    }

    #[test]
    fn test_world_space_em_is_one_unit() {
        let font = font();
        let vertices = world_space_vertices(&font, &[queued("a", Anchor::Center)]);
        let max_y = vertices
            .chunks(WS_FLOATS)
            .map(|v| v[1])
            .fold(f32::MIN, f32::max);
        assert!((max_y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_newline_moves_down_one_line() {
        let font = font();
        let (quads, min, _) = layout(&font, "a\na", 0.0);
        assert_eq!(quads.len(), 2);
        assert_eq!(quads[1].min.x, 0.0);
        assert_eq!(min.y, -12.0);
    }
}
