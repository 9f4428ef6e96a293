// src/transform.rs

//! Frame transforms as one closed set of variants.
//!
//! Each variant carries only its own parameters. [`apply_transform`] checks
//! the preconditions here, then hands the work to the codec, so every codec
//! sees only valid requests.

use crate::codec::ImageCodec;
use crate::error::{ImagingError, Result};
use crate::frame::{validate_palette, FrameSource};
use crate::geometry::PixelRect;
use crate::palette::{BitmapPalette, MAX_PALETTE_COLORS};
use crate::pixel_format::PixelFormat;
use log::debug;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    Rotate0,
    /// Clockwise.
    Rotate90,
    Rotate180,
    Rotate270,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Flip {
    #[default]
    None,
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScaleMode {
    #[default]
    NearestNeighbor,
    Linear,
    Cubic,
    Fant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DitherType {
    #[default]
    None,
    Ordered4x4,
    Ordered8x8,
    ErrorDiffusion,
}

/// Color space description for color conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorContext {
    Srgb,
    ScRgb,
    /// Embedded ICC profile bytes.
    Icc(Arc<[u8]>),
    /// EXIF color space tag value (1 = sRGB, 2 = Adobe RGB).
    ExifColorSpace(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Crop(PixelRect),
    Scale {
        width: u32,
        height: u32,
        mode: ScaleMode,
    },
    Rotate {
        rotation: Rotation,
        flip: Flip,
    },
    FormatConvert {
        format: PixelFormat,
        palette: Option<BitmapPalette>,
        dither: DitherType,
        /// Alpha percentage (0..=100) below which a pixel maps to a
        /// transparent palette entry.
        alpha_threshold: f64,
    },
    ColorConvert {
        source: ColorContext,
        destination: ColorContext,
        format: PixelFormat,
    },
    /// Quantizes to a palette computed from the source itself.
    Palette {
        format: PixelFormat,
        max_colors: usize,
        add_transparent: bool,
    },
}

impl Transform {
    pub fn name(&self) -> &'static str {
        match self {
            Transform::Crop(_) => "crop",
            Transform::Scale { .. } => "scale",
            Transform::Rotate { .. } => "rotate",
            Transform::FormatConvert { .. } => "format-convert",
            Transform::ColorConvert { .. } => "color-convert",
            Transform::Palette { .. } => "palette",
        }
    }

    /// Dimensions of the frame this transform produces from `source`.
    pub fn output_size(&self, source: &FrameSource) -> (u32, u32) {
        match self {
            Transform::Crop(rect) => (rect.width as u32, rect.height as u32),
            Transform::Scale { width, height, .. } => (*width, *height),
            Transform::Rotate {
                rotation: Rotation::Rotate90 | Rotation::Rotate270,
                ..
            } => (source.height(), source.width()),
            _ => (source.width(), source.height()),
        }
    }

    /// Checks this transform's preconditions against `source`.
    pub fn validate(&self, source: &FrameSource) -> Result<()> {
        match self {
            Transform::Crop(rect) => {
                rect.validate_within(source.width(), source.height(), "crop rect")?;
                if rect.is_empty() {
                    return Err(ImagingError::invalid("crop rect has zero area"));
                }
            }
            Transform::Scale { width, height, .. } => {
                if *width == 0 || *height == 0 {
                    return Err(ImagingError::invalid(format!(
                        "scale target must be positive, got {}x{}",
                        width, height
                    )));
                }
            }
            Transform::Rotate { .. } => {}
            Transform::FormatConvert {
                format,
                palette,
                alpha_threshold,
                ..
            } => {
                validate_palette(*format, palette.as_ref())?;
                if !(0.0..=100.0).contains(alpha_threshold) {
                    return Err(ImagingError::invalid(format!(
                        "alpha threshold must be 0..=100, got {}",
                        alpha_threshold
                    )));
                }
            }
            Transform::ColorConvert { format, .. } => {
                if format.is_palettized() {
                    return Err(ImagingError::invalid(format!(
                        "color conversion cannot target palettized {:?}",
                        format
                    )));
                }
            }
            Transform::Palette {
                format,
                max_colors,
                ..
            } => {
                let Some(capacity) = format.max_palette_entries() else {
                    return Err(ImagingError::invalid(format!(
                        "palette transform needs a palettized target, got {:?}",
                        format
                    )));
                };
                if *max_colors == 0 || *max_colors > capacity.min(MAX_PALETTE_COLORS) {
                    return Err(ImagingError::invalid(format!(
                        "{:?} holds 1..={} colors, asked for {}",
                        format, capacity, max_colors
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Validates `transform` against `source` and produces the new frame.
pub fn apply_transform(
    codec: &dyn ImageCodec,
    source: &FrameSource,
    transform: &Transform,
) -> Result<FrameSource> {
    transform.validate(source)?;
    debug!(
        "apply_transform: {} on {}x{} {:?}",
        transform.name(),
        source.width(),
        source.height(),
        source.format()
    );
    codec.create_transform(source, transform)
}

/// Applies transforms left to right.
pub fn apply_chain(
    codec: &dyn ImageCodec,
    source: &FrameSource,
    transforms: &[Transform],
) -> Result<FrameSource> {
    transforms
        .iter()
        .try_fold(source.clone(), |frame, t| apply_transform(codec, &frame, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::PredefinedPalette;

    fn frame() -> FrameSource {
        FrameSource::blank(4, 2, 96.0, 96.0, PixelFormat::Bgra32, None).unwrap()
    }

    #[test]
    fn crop_must_lie_within_source() {
        assert!(Transform::Crop(PixelRect::new(0, 0, 4, 2)).validate(&frame()).is_ok());
        assert!(Transform::Crop(PixelRect::new(1, 0, 4, 2)).validate(&frame()).is_err());
        assert!(Transform::Crop(PixelRect::new(0, 0, 0, 2)).validate(&frame()).is_err());
    }

    #[test]
    fn palettized_target_needs_fitting_palette() {
        let convert = |format, palette| Transform::FormatConvert {
            format,
            palette,
            dither: DitherType::None,
            alpha_threshold: 0.0,
        };
        assert!(convert(PixelFormat::Indexed8, None).validate(&frame()).is_err());
        let gray16 = BitmapPalette::predefined(PredefinedPalette::Gray16);
        assert!(convert(PixelFormat::Indexed2, Some(gray16.clone()))
            .validate(&frame())
            .is_err());
        assert!(convert(PixelFormat::Indexed4, Some(gray16)).validate(&frame()).is_ok());
        assert!(convert(PixelFormat::Gray8, None).validate(&frame()).is_ok());
    }

    #[test]
    fn output_size_swaps_for_quarter_turns() {
        let t = Transform::Rotate {
            rotation: Rotation::Rotate90,
            flip: Flip::None,
        };
        assert_eq!(t.output_size(&frame()), (2, 4));
    }

    #[test]
    fn palette_transform_limits() {
        let t = |format, max_colors| Transform::Palette {
            format,
            max_colors,
            add_transparent: false,
        };
        assert!(t(PixelFormat::Bgra32, 4).validate(&frame()).is_err());
        assert!(t(PixelFormat::Indexed2, 5).validate(&frame()).is_err());
        assert!(t(PixelFormat::Indexed2, 4).validate(&frame()).is_ok());
    }
}
