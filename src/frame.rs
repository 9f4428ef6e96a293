// src/frame.rs

//! `FrameSource`: an immutable rectangle of pixels.
//!
//! A frame is built in one validated step and never changes afterwards.
//! Transforms produce new frames (see [`crate::transform`]). Pixel storage
//! is reference counted, so cloning a frame is cheap and clones share bytes.

use crate::double_buffer::copy::{check_buffer, copy_rect, Placement};
use crate::error::{ImagingError, Result};
use crate::geometry::PixelRect;
use crate::metadata::BitmapMetadata;
use crate::palette::BitmapPalette;
use crate::pixel_format::{validate_stride, PixelFormat};
use std::sync::Arc;

/// Device-independent resolution assumed when none is recorded.
pub const DEFAULT_DPI: f64 = 96.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FrameSource {
    width: u32,
    height: u32,
    dpi_x: f64,
    dpi_y: f64,
    format: PixelFormat,
    palette: Option<BitmapPalette>,
    stride: usize,
    pixels: Arc<[u8]>,
    metadata: Option<BitmapMetadata>,
}

/// Validates the size, resolution and palette parameters every frame shares.
pub(crate) fn validate_layout(
    width: u32,
    height: u32,
    dpi_x: f64,
    dpi_y: f64,
    format: PixelFormat,
    palette: Option<&BitmapPalette>,
) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(ImagingError::invalid(format!(
            "dimensions must be positive, got {}x{}",
            width, height
        )));
    }
    if width > i32::MAX as u32 || height > i32::MAX as u32 {
        return Err(ImagingError::invalid("dimensions exceed i32::MAX"));
    }
    if !(dpi_x.is_finite() && dpi_x > 0.0 && dpi_y.is_finite() && dpi_y > 0.0) {
        return Err(ImagingError::invalid(format!(
            "dpi must be positive and finite, got {}x{}",
            dpi_x, dpi_y
        )));
    }
    validate_palette(format, palette)
}

/// Bytes needed for `height` rows at `stride`, rejecting sizes that overflow.
pub(crate) fn checked_buffer_len(stride: usize, height: u32) -> Result<usize> {
    stride.checked_mul(height as usize).ok_or_else(|| {
        ImagingError::invalid(format!("stride {} * height {} overflows", stride, height))
    })
}

/// A palettized format needs a palette that its bit depth can address.
pub(crate) fn validate_palette(format: PixelFormat, palette: Option<&BitmapPalette>) -> Result<()> {
    let Some(max) = format.max_palette_entries() else {
        return Ok(());
    };
    match palette {
        None => Err(ImagingError::invalid(format!(
            "{:?} requires a palette",
            format
        ))),
        Some(p) if p.len() > max => Err(ImagingError::invalid(format!(
            "{:?} addresses at most {} colors, palette has {}",
            format,
            max,
            p.len()
        ))),
        Some(_) => Ok(()),
    }
}

impl FrameSource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        width: u32,
        height: u32,
        dpi_x: f64,
        dpi_y: f64,
        format: PixelFormat,
        palette: Option<BitmapPalette>,
        pixels: impl Into<Arc<[u8]>>,
        stride: usize,
    ) -> Result<Self> {
        validate_layout(width, height, dpi_x, dpi_y, format, palette.as_ref())?;
        validate_stride(format, width, stride)?;
        let pixels = pixels.into();
        let required = checked_buffer_len(stride, height)?;
        if pixels.len() < required {
            return Err(ImagingError::BufferTooSmall {
                required,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            dpi_x,
            dpi_y,
            format,
            palette,
            stride,
            pixels,
            metadata: None,
        })
    }

    /// A zero-filled frame at the format's minimum stride.
    pub fn blank(
        width: u32,
        height: u32,
        dpi_x: f64,
        dpi_y: f64,
        format: PixelFormat,
        palette: Option<BitmapPalette>,
    ) -> Result<Self> {
        validate_layout(width, height, dpi_x, dpi_y, format, palette.as_ref())?;
        let stride = format.min_stride(width);
        let pixels = vec![0u8; checked_buffer_len(stride, height)?];
        Self::new(width, height, dpi_x, dpi_y, format, palette, pixels, stride)
    }

    /// Attaches metadata, freezing it so the frame stays immutable.
    pub fn with_metadata(mut self, metadata: BitmapMetadata) -> Self {
        metadata.freeze();
        self.metadata = Some(metadata);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dpi(&self) -> (f64, f64) {
        (self.dpi_x, self.dpi_y)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn palette(&self) -> Option<&BitmapPalette> {
        self.palette.as_ref()
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn metadata(&self) -> Option<&BitmapMetadata> {
        self.metadata.as_ref()
    }

    pub fn bounds(&self) -> PixelRect {
        PixelRect::full(self.width, self.height)
    }

    /// Size in 1/96 inch units.
    pub fn size_in_dips(&self) -> (f64, f64) {
        (
            self.width as f64 * DEFAULT_DPI / self.dpi_x,
            self.height as f64 * DEFAULT_DPI / self.dpi_y,
        )
    }

    /// Copies `rect` (the whole frame when `None`) into `buffer` at `stride`.
    pub fn copy_pixels(&self, rect: Option<PixelRect>, stride: usize, buffer: &mut [u8]) -> Result<()> {
        let rect = rect.unwrap_or_else(|| self.bounds());
        rect.validate_within(self.width, self.height, "source rect")?;
        if rect.is_empty() {
            return Ok(());
        }
        let bpp = self.format.bits_per_pixel();
        let dest = PixelRect::new(0, 0, rect.width, rect.height);
        check_buffer(&dest, stride, buffer.len(), bpp)?;
        copy_rect(
            &self.pixels,
            Placement {
                x: rect.x as u32,
                y: rect.y as u32,
                stride: self.stride,
            },
            buffer,
            Placement {
                x: 0,
                y: 0,
                stride,
            },
            rect.width as u32,
            rect.height as u32,
            bpp,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::PredefinedPalette;

    fn ramp(width: u32, height: u32) -> FrameSource {
        let stride = width as usize;
        let pixels: Vec<u8> = (0..(stride * height as usize) as u32).map(|v| v as u8).collect();
        FrameSource::new(width, height, 96.0, 96.0, PixelFormat::Gray8, None, pixels, stride).unwrap()
    }

    #[test]
    fn rejects_bad_dimensions_and_dpi() {
        assert!(FrameSource::blank(0, 1, 96.0, 96.0, PixelFormat::Gray8, None).is_err());
        assert!(FrameSource::blank(1, 1, 0.0, 96.0, PixelFormat::Gray8, None).is_err());
        assert!(FrameSource::blank(1, 1, 96.0, f64::NAN, PixelFormat::Gray8, None).is_err());
    }

    #[test]
    fn overflowing_buffer_size_is_invalid() {
        let max = i32::MAX as u32;
        assert!(matches!(
            FrameSource::blank(max, max, 96.0, 96.0, PixelFormat::Rgba128Float, None),
            Err(ImagingError::InvalidParameter(_))
        ));
        assert!(matches!(
            checked_buffer_len(usize::MAX, 2),
            Err(ImagingError::InvalidParameter(_))
        ));
        assert_eq!(checked_buffer_len(16, 4), Ok(64));
    }

    #[test]
    fn palettized_format_requires_fitting_palette() {
        assert!(FrameSource::blank(2, 2, 96.0, 96.0, PixelFormat::Indexed2, None).is_err());
        let gray16 = BitmapPalette::predefined(PredefinedPalette::Gray16);
        assert!(
            FrameSource::blank(2, 2, 96.0, 96.0, PixelFormat::Indexed2, Some(gray16.clone())).is_err()
        );
        assert!(FrameSource::blank(2, 2, 96.0, 96.0, PixelFormat::Indexed4, Some(gray16)).is_ok());
    }

    #[test]
    fn rejects_short_pixel_buffers() {
        let err = FrameSource::new(2, 2, 96.0, 96.0, PixelFormat::Bgra32, None, vec![0u8; 15], 8)
            .unwrap_err();
        assert_eq!(
            err,
            ImagingError::BufferTooSmall {
                required: 16,
                actual: 15
            }
        );
        assert!(
            FrameSource::new(2, 2, 96.0, 96.0, PixelFormat::Bgra32, None, vec![0u8; 16], 7).is_err()
        );
    }

    #[test]
    fn copy_pixels_extracts_sub_rect() {
        let frame = ramp(4, 3);
        let mut out = [0u8; 4];
        frame.copy_pixels(Some(PixelRect::new(1, 1, 2, 2)), 2, &mut out).unwrap();
        assert_eq!(out, [5, 6, 9, 10]);
    }

    #[test]
    fn copy_pixels_validates_rect_and_buffer() {
        let frame = ramp(4, 3);
        let mut out = [0u8; 3];
        assert!(matches!(
            frame.copy_pixels(Some(PixelRect::new(3, 0, 2, 1)), 2, &mut out),
            Err(ImagingError::InvalidParameter(_))
        ));
        assert!(matches!(
            frame.copy_pixels(Some(PixelRect::new(0, 0, 2, 2)), 2, &mut out),
            Err(ImagingError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn metadata_is_frozen_on_attach() {
        let meta = BitmapMetadata::new(crate::container::ContainerFormat::Png);
        let frame = ramp(1, 1).with_metadata(meta.clone());
        assert!(meta.is_frozen());
        assert_eq!(frame.metadata(), Some(&meta));
    }

    #[test]
    fn size_in_dips_scales_by_dpi() {
        let frame = FrameSource::blank(192, 96, 192.0, 96.0, PixelFormat::Gray8, None).unwrap();
        assert_eq!(frame.size_in_dips(), (96.0, 96.0));
    }
}
