// src/palette.rs

//! Color palettes for indexed pixel formats.

use crate::codec::ImageCodec;
use crate::color::Color;
use crate::error::{ImagingError, Result};
use crate::frame::FrameSource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Largest palette any supported format can address.
pub const MAX_PALETTE_COLORS: usize = 256;

/// Well-known palettes codecs can produce without inspecting pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredefinedPalette {
    BlackAndWhite,
    Gray4,
    Gray16,
    Gray256,
    /// 8 colors: every combination of full-on/full-off channels.
    Halftone8,
}

/// An immutable, shareable list of 1..=256 colors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapPalette {
    colors: Arc<[Color]>,
}

impl BitmapPalette {
    pub fn new(colors: Vec<Color>) -> Result<Self> {
        if colors.is_empty() || colors.len() > MAX_PALETTE_COLORS {
            return Err(ImagingError::invalid(format!(
                "palette must hold 1..={} colors, got {}",
                MAX_PALETTE_COLORS,
                colors.len()
            )));
        }
        Ok(Self {
            colors: colors.into(),
        })
    }

    pub fn predefined(kind: PredefinedPalette) -> Self {
        let colors: Vec<Color> = match kind {
            PredefinedPalette::BlackAndWhite => vec![Color::BLACK, Color::WHITE],
            PredefinedPalette::Gray4 => gray_ramp(4),
            PredefinedPalette::Gray16 => gray_ramp(16),
            PredefinedPalette::Gray256 => gray_ramp(256),
            PredefinedPalette::Halftone8 => (0u8..8)
                .map(|i| {
                    let on = |bit: u8| if i & bit != 0 { 255 } else { 0 };
                    Color::from_rgb(on(4), on(2), on(1))
                })
                .collect(),
        };
        Self {
            colors: colors.into(),
        }
    }

    /// Builds an optimal palette for `source` through the codec.
    pub fn from_bitmap(
        codec: &dyn ImageCodec,
        source: &FrameSource,
        max_colors: usize,
        add_transparent: bool,
    ) -> Result<Self> {
        if max_colors == 0 || max_colors > MAX_PALETTE_COLORS {
            return Err(ImagingError::invalid(format!(
                "max_colors must be 1..={}, got {}",
                MAX_PALETTE_COLORS, max_colors
            )));
        }
        codec.create_palette_from_bitmap(source, max_colors, add_transparent)
    }

    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn has_alpha(&self) -> bool {
        self.colors.iter().any(|c| !c.is_opaque())
    }

    pub fn get(&self, index: usize) -> Option<Color> {
        self.colors.get(index).copied()
    }

    /// Index of the closest color by squared RGB distance.
    pub fn nearest_index(&self, color: Color) -> usize {
        let distance = |c: &Color| {
            let dr = c.r as i32 - color.r as i32;
            let dg = c.g as i32 - color.g as i32;
            let db = c.b as i32 - color.b as i32;
            dr * dr + dg * dg + db * db
        };
        self.colors
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| distance(c))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

fn gray_ramp(steps: usize) -> Vec<Color> {
    (0..steps)
        .map(|i| Color::gray((i * 255 / (steps - 1)) as u8))
        .collect()
}
