// src/pixel_format.rs

//! Pixel format descriptions: bit depth, channel layout and palette flag.
//!
//! Stride arithmetic lives here as well, since every copy path needs the
//! same bits-per-pixel aware rounding.

use crate::error::{ImagingError, Result};
use crate::guid::Guid;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Properties of a pixel format that callers branch on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FormatFlags: u8 {
        const PALETTIZED    = 1 << 0; // Pixel values index a palette.
        const ALPHA         = 1 << 1;
        const PREMULTIPLIED = 1 << 2;
        const GRAY          = 1 << 3;
        const FLOAT         = 1 << 4;
        const CMYK          = 1 << 5;
    }
}

/// Supported pixel formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Indexed1,
    Indexed2,
    Indexed4,
    Indexed8,
    BlackWhite,
    Gray2,
    Gray4,
    Gray8,
    Gray16,
    Gray32Float,
    Bgr555,
    Bgr565,
    Bgr24,
    Rgb24,
    Bgr32,
    Bgra32,
    Pbgra32,
    Cmyk32,
    Rgb48,
    Rgba64,
    Prgba64,
    Rgba128Float,
}

// WIC pixel format GUIDs share everything but the final byte.
const fn wic_format(last: u8) -> Guid {
    Guid::from_fields(
        0x6fddc324,
        0x4e03,
        0x4bfe,
        [0xb1, 0x85, 0x3d, 0x77, 0x76, 0x8d, 0xc9, last],
    )
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 22] = [
        PixelFormat::Indexed1,
        PixelFormat::Indexed2,
        PixelFormat::Indexed4,
        PixelFormat::Indexed8,
        PixelFormat::BlackWhite,
        PixelFormat::Gray2,
        PixelFormat::Gray4,
        PixelFormat::Gray8,
        PixelFormat::Gray16,
        PixelFormat::Gray32Float,
        PixelFormat::Bgr555,
        PixelFormat::Bgr565,
        PixelFormat::Bgr24,
        PixelFormat::Rgb24,
        PixelFormat::Bgr32,
        PixelFormat::Bgra32,
        PixelFormat::Pbgra32,
        PixelFormat::Cmyk32,
        PixelFormat::Rgb48,
        PixelFormat::Rgba64,
        PixelFormat::Prgba64,
        PixelFormat::Rgba128Float,
    ];

    pub fn bits_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Indexed1 | PixelFormat::BlackWhite => 1,
            PixelFormat::Indexed2 | PixelFormat::Gray2 => 2,
            PixelFormat::Indexed4 | PixelFormat::Gray4 => 4,
            PixelFormat::Indexed8 | PixelFormat::Gray8 => 8,
            PixelFormat::Gray16 | PixelFormat::Bgr555 | PixelFormat::Bgr565 => 16,
            PixelFormat::Bgr24 | PixelFormat::Rgb24 => 24,
            PixelFormat::Gray32Float
            | PixelFormat::Bgr32
            | PixelFormat::Bgra32
            | PixelFormat::Pbgra32
            | PixelFormat::Cmyk32 => 32,
            PixelFormat::Rgb48 => 48,
            PixelFormat::Rgba64 | PixelFormat::Prgba64 => 64,
            PixelFormat::Rgba128Float => 128,
        }
    }

    pub fn flags(self) -> FormatFlags {
        match self {
            PixelFormat::Indexed1
            | PixelFormat::Indexed2
            | PixelFormat::Indexed4
            | PixelFormat::Indexed8 => FormatFlags::PALETTIZED,
            PixelFormat::BlackWhite
            | PixelFormat::Gray2
            | PixelFormat::Gray4
            | PixelFormat::Gray8
            | PixelFormat::Gray16 => FormatFlags::GRAY,
            PixelFormat::Gray32Float => FormatFlags::GRAY | FormatFlags::FLOAT,
            PixelFormat::Bgr555
            | PixelFormat::Bgr565
            | PixelFormat::Bgr24
            | PixelFormat::Rgb24
            | PixelFormat::Bgr32
            | PixelFormat::Rgb48 => FormatFlags::empty(),
            PixelFormat::Bgra32 | PixelFormat::Rgba64 => FormatFlags::ALPHA,
            PixelFormat::Pbgra32 | PixelFormat::Prgba64 => {
                FormatFlags::ALPHA | FormatFlags::PREMULTIPLIED
            }
            PixelFormat::Cmyk32 => FormatFlags::CMYK,
            PixelFormat::Rgba128Float => FormatFlags::ALPHA | FormatFlags::FLOAT,
        }
    }

    /// Number of stored channels, counting padding channels such as Bgr32's X.
    pub fn channel_count(self) -> u32 {
        match self {
            PixelFormat::Indexed1
            | PixelFormat::Indexed2
            | PixelFormat::Indexed4
            | PixelFormat::Indexed8
            | PixelFormat::BlackWhite
            | PixelFormat::Gray2
            | PixelFormat::Gray4
            | PixelFormat::Gray8
            | PixelFormat::Gray16
            | PixelFormat::Gray32Float => 1,
            PixelFormat::Bgr555
            | PixelFormat::Bgr565
            | PixelFormat::Bgr24
            | PixelFormat::Rgb24
            | PixelFormat::Rgb48 => 3,
            _ => 4,
        }
    }

    pub fn is_palettized(self) -> bool {
        self.flags().contains(FormatFlags::PALETTIZED)
    }

    pub fn has_alpha(self) -> bool {
        self.flags().contains(FormatFlags::ALPHA)
    }

    /// Largest palette a palettized format can address.
    pub fn max_palette_entries(self) -> Option<usize> {
        self.is_palettized()
            .then(|| 1usize << self.bits_per_pixel())
    }

    /// Minimum bytes per row for `width` pixels, rounding up partial bytes.
    pub fn min_stride(self, width: u32) -> usize {
        bytes_for_bits(width as u64 * self.bits_per_pixel() as u64)
    }

    pub fn guid(self) -> Guid {
        wic_format(match self {
            PixelFormat::Indexed1 => 0x01,
            PixelFormat::Indexed2 => 0x02,
            PixelFormat::Indexed4 => 0x03,
            PixelFormat::Indexed8 => 0x04,
            PixelFormat::BlackWhite => 0x05,
            PixelFormat::Gray2 => 0x06,
            PixelFormat::Gray4 => 0x07,
            PixelFormat::Gray8 => 0x08,
            PixelFormat::Bgr555 => 0x09,
            PixelFormat::Bgr565 => 0x0a,
            PixelFormat::Gray16 => 0x0b,
            PixelFormat::Bgr24 => 0x0c,
            PixelFormat::Rgb24 => 0x0d,
            PixelFormat::Bgr32 => 0x0e,
            PixelFormat::Bgra32 => 0x0f,
            PixelFormat::Pbgra32 => 0x10,
            PixelFormat::Gray32Float => 0x11,
            PixelFormat::Rgb48 => 0x15,
            PixelFormat::Rgba64 => 0x16,
            PixelFormat::Prgba64 => 0x17,
            PixelFormat::Rgba128Float => 0x19,
            PixelFormat::Cmyk32 => 0x1c,
        })
    }

    pub fn from_guid(guid: &Guid) -> Result<Self> {
        PixelFormat::ALL
            .iter()
            .copied()
            .find(|f| f.guid() == *guid)
            .ok_or_else(|| ImagingError::invalid(format!("unknown pixel format {}", guid)))
    }
}

/// Bytes needed to hold `bits`, rounding up.
pub fn bytes_for_bits(bits: u64) -> usize {
    bits.div_ceil(8) as usize
}

/// Validates a stride against the format's minimum for `width` pixels.
pub fn validate_stride(format: PixelFormat, width: u32, stride: usize) -> Result<()> {
    let min = format.min_stride(width);
    if stride < min {
        return Err(ImagingError::invalid(format!(
            "stride {} is smaller than the minimum {} for {} pixels of {:?}",
            stride, min, width, format
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_stride_rounds_partial_bytes_up() {
        assert_eq!(PixelFormat::Indexed1.min_stride(9), 2);
        assert_eq!(PixelFormat::Gray4.min_stride(3), 2);
        assert_eq!(PixelFormat::Bgr24.min_stride(3), 9);
        assert_eq!(PixelFormat::Bgra32.min_stride(4), 16);
    }

    #[test]
    fn palette_capacity_follows_bit_depth() {
        assert_eq!(PixelFormat::Indexed2.max_palette_entries(), Some(4));
        assert_eq!(PixelFormat::Indexed8.max_palette_entries(), Some(256));
        assert_eq!(PixelFormat::Bgra32.max_palette_entries(), None);
    }

    #[test]
    fn every_format_has_a_distinct_guid() {
        for format in PixelFormat::ALL {
            assert_eq!(PixelFormat::from_guid(&format.guid()).unwrap(), format);
        }
    }

    #[test]
    fn stride_validation() {
        assert!(validate_stride(PixelFormat::Bgra32, 4, 16).is_ok());
        assert!(matches!(
            validate_stride(PixelFormat::Bgra32, 4, 15),
            Err(ImagingError::InvalidParameter(_))
        ));
    }
}
