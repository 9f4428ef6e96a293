// src/color.rs

//! Defines the `Color` value used by palettes.

use serde::{Deserialize, Serialize};

/// An sRGB color with straight (non-premultiplied) alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    pub a: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::from_rgb(0, 0, 0);
    pub const WHITE: Color = Color::from_rgb(255, 255, 255);
    pub const TRANSPARENT: Color = Color::from_argb(0, 255, 255, 255);

    pub const fn from_argb(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self { a, r, g, b }
    }

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self::from_argb(255, r, g, b)
    }

    pub const fn gray(level: u8) -> Self {
        Self::from_rgb(level, level, level)
    }

    /// Packs into the 0xAARRGGBB layout codecs exchange palettes in.
    pub fn to_argb_u32(self) -> u32 {
        u32::from_be_bytes([self.a, self.r, self.g, self.b])
    }

    pub fn from_argb_u32(value: u32) -> Self {
        let [a, r, g, b] = value.to_be_bytes();
        Self::from_argb(a, r, g, b)
    }

    /// Bytes in memory order for Bgra32.
    pub fn to_bgra(self) -> [u8; 4] {
        [self.b, self.g, self.r, self.a]
    }

    /// Rec. 601 luma, as used for gray conversions.
    pub fn luma(self) -> u8 {
        ((self.r as u32 * 299 + self.g as u32 * 587 + self.b as u32 * 114 + 500) / 1000) as u8
    }

    pub fn is_opaque(self) -> bool {
        self.a == 255
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argb_packing_round_trips() {
        let c = Color::from_argb(0x80, 0x12, 0x34, 0x56);
        assert_eq!(c.to_argb_u32(), 0x8012_3456);
        assert_eq!(Color::from_argb_u32(0x8012_3456), c);
    }

    #[test]
    fn luma_of_extremes() {
        assert_eq!(Color::BLACK.luma(), 0);
        assert_eq!(Color::WHITE.luma(), 255);
    }
}
