// src/codec/headless.rs

//! In-memory codec implementation.
//!
//! Images are registered under a URI, or decoded from streams this codec
//! committed itself. The stream framing is private to this codec: a magic,
//! the container GUID, then each frame's geometry, palette and raw rows, all
//! little-endian. Transforms are simple reference versions: crop, nearest
//! scale, quarter-turn rotation and flips work on any format; color and
//! format conversion cover the 8-bit-per-channel and up-to-8-bit
//! gray/indexed formats. Anything else fails with `CodecFailure`.

use super::{
    DecodeOptions, DecodeSource, DecoderId, DecoderInfo, EncoderId, ImageCodec, PropertyBag,
};
use crate::color::Color;
use crate::container::ContainerFormat;
use crate::double_buffer::copy::{copy_rect, Placement};
use crate::error::{ImagingError, Result};
use crate::frame::{checked_buffer_len, FrameSource};
use crate::guid::Guid;
use crate::metadata::BitmapMetadata;
use crate::palette::BitmapPalette;
use crate::pixel_format::PixelFormat;
use crate::transform::{Flip, Rotation, Transform};
use log::{debug, info, trace};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const STREAM_MAGIC: &[u8; 4] = b"HDLS";

/// An image as the codec stores it.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub container: ContainerFormat,
    pub frames: Vec<FrameSource>,
    pub metadata: Option<BitmapMetadata>,
    pub palette: Option<BitmapPalette>,
}

impl StoredImage {
    pub fn new(container: ContainerFormat, frames: Vec<FrameSource>) -> Self {
        Self {
            container,
            frames,
            metadata: None,
            palette: None,
        }
    }
}

#[derive(Debug)]
struct PendingEncoder {
    container: ContainerFormat,
    frames: Vec<FrameSource>,
    metadata: Option<BitmapMetadata>,
    palette: Option<BitmapPalette>,
    committed: bool,
}

#[derive(Debug, Default)]
struct HeadlessState {
    images: HashMap<String, StoredImage>,
    decoders: HashMap<DecoderId, StoredImage>,
    encoders: HashMap<EncoderId, PendingEncoder>,
    options_log: Vec<PropertyBag>,
    next_id: u64,
    injected_failure: Option<String>,
}

impl HeadlessState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_failure(&mut self) -> Result<()> {
        match self.injected_failure.take() {
            Some(msg) => Err(ImagingError::CodecFailure(msg)),
            None => Ok(()),
        }
    }

    fn decoder(&self, id: DecoderId) -> Result<&StoredImage> {
        self.decoders
            .get(&id)
            .ok_or_else(|| ImagingError::CodecFailure(format!("unknown decoder {}", id)))
    }

    fn encoder(&mut self, id: EncoderId) -> Result<&mut PendingEncoder> {
        let encoder = self
            .encoders
            .get_mut(&id)
            .ok_or_else(|| ImagingError::CodecFailure(format!("unknown encoder {}", id)))?;
        if encoder.committed {
            return Err(ImagingError::CodecFailure(format!(
                "encoder {} already committed",
                id
            )));
        }
        Ok(encoder)
    }
}

/// In-memory [`ImageCodec`].
#[derive(Debug, Default)]
pub struct HeadlessCodec {
    state: Mutex<HeadlessState>,
}

impl HeadlessCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers an image that decoders can open by `uri`.
    pub fn insert_image(&self, uri: &str, image: StoredImage) {
        info!(
            "HeadlessCodec: registered '{}' ({} frames, {:?})",
            uri,
            image.frames.len(),
            image.container
        );
        self.state().images.insert(uri.to_string(), image);
    }

    /// Makes the next fallible call fail with `CodecFailure(msg)`.
    pub fn inject_failure(&self, msg: &str) {
        self.state().injected_failure = Some(msg.to_string());
    }

    /// Number of decoders and encoders not yet released.
    pub fn open_handles(&self) -> (usize, usize) {
        let state = self.state();
        (state.decoders.len(), state.encoders.len())
    }

    /// Every per-frame option bag passed to `add_frame`, oldest first.
    pub fn options_log(&self) -> Vec<PropertyBag> {
        self.state().options_log.clone()
    }
}

impl ImageCodec for HeadlessCodec {
    fn create_decoder(&self, source: &DecodeSource, options: DecodeOptions) -> Result<DecoderInfo> {
        let mut state = self.state();
        state.check_failure()?;
        let image = match source {
            DecodeSource::Uri(uri) => state
                .images
                .get(uri)
                .cloned()
                .ok_or_else(|| ImagingError::CodecFailure(format!("no image at '{}'", uri)))?,
            DecodeSource::Stream(bytes) => read_stream(bytes)?,
        };
        if image.frames.is_empty() {
            return Err(ImagingError::CodecFailure("image has no frames".into()));
        }
        let id = state.next_id();
        let container = image.container;
        debug!(
            "HeadlessCodec: decoder {} opened ({:?}, {:?})",
            id, container, options
        );
        state.decoders.insert(id, image);
        Ok(DecoderInfo { id, container })
    }

    fn release_decoder(&self, id: DecoderId) {
        self.state().decoders.remove(&id);
    }

    fn frame_count(&self, id: DecoderId) -> Result<u32> {
        let state = self.state();
        Ok(state.decoder(id)?.frames.len() as u32)
    }

    fn get_frame(&self, id: DecoderId, index: u32) -> Result<FrameSource> {
        let mut state = self.state();
        state.check_failure()?;
        state
            .decoder(id)?
            .frames
            .get(index as usize)
            .cloned()
            .ok_or_else(|| ImagingError::CodecFailure(format!("no frame {}", index)))
    }

    fn decoder_metadata(&self, id: DecoderId) -> Result<Option<BitmapMetadata>> {
        Ok(self.state().decoder(id)?.metadata.clone())
    }

    fn decoder_palette(&self, id: DecoderId) -> Result<Option<BitmapPalette>> {
        Ok(self.state().decoder(id)?.palette.clone())
    }

    fn create_encoder(&self, container: ContainerFormat) -> Result<EncoderId> {
        let mut state = self.state();
        state.check_failure()?;
        let id = state.next_id();
        state.encoders.insert(
            id,
            PendingEncoder {
                container,
                frames: Vec::new(),
                metadata: None,
                palette: None,
                committed: false,
            },
        );
        Ok(id)
    }

    fn release_encoder(&self, id: EncoderId) {
        self.state().encoders.remove(&id);
    }

    fn set_encoder_metadata(&self, id: EncoderId, metadata: &BitmapMetadata) -> Result<()> {
        self.state().encoder(id)?.metadata = Some(metadata.clone());
        Ok(())
    }

    fn set_encoder_palette(&self, id: EncoderId, palette: &BitmapPalette) -> Result<()> {
        self.state().encoder(id)?.palette = Some(palette.clone());
        Ok(())
    }

    fn set_thumbnail(&self, id: EncoderId, thumbnail: &FrameSource) -> Result<()> {
        // Thumbnails and previews are accepted but not part of the stream.
        self.state().encoder(id)?;
        trace!("HeadlessCodec: thumbnail {}x{}", thumbnail.width(), thumbnail.height());
        Ok(())
    }

    fn set_preview(&self, id: EncoderId, preview: &FrameSource) -> Result<()> {
        self.state().encoder(id)?;
        trace!("HeadlessCodec: preview {}x{}", preview.width(), preview.height());
        Ok(())
    }

    fn add_frame(&self, id: EncoderId, frame: &FrameSource, options: &PropertyBag) -> Result<()> {
        let mut state = self.state();
        state.check_failure()?;
        state.encoder(id)?.frames.push(frame.clone());
        state.options_log.push(options.clone());
        Ok(())
    }

    fn commit(&self, id: EncoderId) -> Result<Vec<u8>> {
        let mut state = self.state();
        state.check_failure()?;
        let encoder = state.encoder(id)?;
        if encoder.frames.is_empty() {
            return Err(ImagingError::CodecFailure("no frames to commit".into()));
        }
        encoder.committed = true;
        let bytes = write_stream(encoder.container, encoder.palette.as_ref(), &encoder.frames);
        debug!(
            "HeadlessCodec: encoder {} committed {} frames, {} bytes",
            id,
            encoder.frames.len(),
            bytes.len()
        );
        Ok(bytes)
    }

    fn create_transform(&self, source: &FrameSource, transform: &Transform) -> Result<FrameSource> {
        self.state().check_failure()?;
        let result = match transform {
            Transform::Crop(rect) => remap(source, rect.width as u32, rect.height as u32, |x, y| {
                (x + rect.x as u32, y + rect.y as u32)
            }),
            Transform::Scale { width, height, mode } => {
                trace!("HeadlessCodec: {:?} scaling done as nearest neighbour", mode);
                let (sw, sh) = (source.width() as u64, source.height() as u64);
                let (dw, dh) = (*width as u64, *height as u64);
                remap(source, *width, *height, |x, y| {
                    ((x as u64 * sw / dw) as u32, (y as u64 * sh / dh) as u32)
                })
            }
            Transform::Rotate { rotation, flip } => rotate(source, *rotation, *flip),
            Transform::FormatConvert {
                format,
                palette,
                alpha_threshold,
                ..
            } => convert(source, *format, palette.clone(), *alpha_threshold),
            Transform::ColorConvert { format, .. } => {
                // No color management here: profiles are accepted and ignored.
                convert(source, *format, None, 0.0)
            }
            Transform::Palette {
                format,
                max_colors,
                add_transparent,
            } => {
                let palette = self.create_palette_from_bitmap(source, *max_colors, *add_transparent)?;
                convert(source, *format, Some(palette), 0.0)
            }
        }?;
        Ok(match source.metadata() {
            Some(meta) => result.with_metadata(meta.clone()),
            None => result,
        })
    }

    fn create_palette_from_bitmap(
        &self,
        source: &FrameSource,
        max_colors: usize,
        add_transparent: bool,
    ) -> Result<BitmapPalette> {
        self.state().check_failure()?;
        // Popularity quantizer: the most frequent colors win, ties broken by value.
        let mut counts: HashMap<Color, usize> = HashMap::new();
        for y in 0..source.height() {
            for x in 0..source.width() {
                *counts.entry(read_color(source, x, y)?).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(Color, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.to_argb_u32().cmp(&b.0.to_argb_u32())));
        let budget = if add_transparent {
            max_colors.saturating_sub(1).max(1)
        } else {
            max_colors
        };
        let mut colors: Vec<Color> = ranked.into_iter().take(budget).map(|(c, _)| c).collect();
        if add_transparent && colors.len() < max_colors {
            colors.push(Color::TRANSPARENT);
        }
        BitmapPalette::new(colors)
    }
}

// --- Pixel access ---

fn unsupported(format: PixelFormat) -> ImagingError {
    ImagingError::CodecFailure(format!("headless codec cannot convert {:?}", format))
}

fn read_bits(bytes: &[u8], bit: usize, count: u32) -> u32 {
    let byte = bytes[bit / 8];
    let shift = 8 - (bit % 8) as u32 - count;
    ((byte >> shift) as u32) & ((1 << count) - 1)
}

fn write_bits(bytes: &mut [u8], bit: usize, count: u32, value: u32) {
    let shift = 8 - (bit % 8) as u32 - count;
    let mask = (((1u32 << count) - 1) << shift) as u8;
    let idx = bit / 8;
    bytes[idx] = (bytes[idx] & !mask) | (((value << shift) as u8) & mask);
}

fn read_color(frame: &FrameSource, x: u32, y: u32) -> Result<Color> {
    let format = frame.format();
    let bpp = format.bits_per_pixel();
    let bit = y as usize * frame.stride() * 8 + x as usize * bpp as usize;
    let bytes = frame.pixels();
    let at = bit / 8;
    Ok(match format {
        PixelFormat::Indexed1 | PixelFormat::Indexed2 | PixelFormat::Indexed4 | PixelFormat::Indexed8 => {
            let index = read_bits(bytes, bit, bpp) as usize;
            frame
                .palette()
                .and_then(|p| p.get(index))
                .unwrap_or(Color::BLACK)
        }
        PixelFormat::BlackWhite | PixelFormat::Gray2 | PixelFormat::Gray4 | PixelFormat::Gray8 => {
            let max = (1u32 << bpp) - 1;
            Color::gray((read_bits(bytes, bit, bpp) * 255 / max) as u8)
        }
        PixelFormat::Bgr24 => Color::from_rgb(bytes[at + 2], bytes[at + 1], bytes[at]),
        PixelFormat::Rgb24 => Color::from_rgb(bytes[at], bytes[at + 1], bytes[at + 2]),
        PixelFormat::Bgr32 => Color::from_rgb(bytes[at + 2], bytes[at + 1], bytes[at]),
        PixelFormat::Bgra32 => Color::from_argb(bytes[at + 3], bytes[at + 2], bytes[at + 1], bytes[at]),
        PixelFormat::Pbgra32 => {
            let a = bytes[at + 3];
            let un = |c: u8| if a == 0 { 0 } else { ((c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8 };
            Color::from_argb(a, un(bytes[at + 2]), un(bytes[at + 1]), un(bytes[at]))
        }
        other => return Err(unsupported(other)),
    })
}

fn write_color(
    format: PixelFormat,
    palette: Option<&BitmapPalette>,
    transparent_below: Option<(usize, f64)>,
    bytes: &mut [u8],
    bit: usize,
    color: Color,
) -> Result<()> {
    let bpp = format.bits_per_pixel();
    let at = bit / 8;
    match format {
        PixelFormat::Indexed1 | PixelFormat::Indexed2 | PixelFormat::Indexed4 | PixelFormat::Indexed8 => {
            let palette = palette.ok_or_else(|| unsupported(format))?;
            let index = match transparent_below {
                Some((index, threshold)) if (color.a as f64) * 100.0 / 255.0 < threshold => index,
                _ => palette.nearest_index(color),
            };
            write_bits(bytes, bit, bpp, index as u32);
        }
        PixelFormat::BlackWhite | PixelFormat::Gray2 | PixelFormat::Gray4 | PixelFormat::Gray8 => {
            let max = (1u32 << bpp) - 1;
            let level = (color.luma() as u32 * max + 127) / 255;
            write_bits(bytes, bit, bpp, level);
        }
        PixelFormat::Bgr24 => bytes[at..at + 3].copy_from_slice(&[color.b, color.g, color.r]),
        PixelFormat::Rgb24 => bytes[at..at + 3].copy_from_slice(&[color.r, color.g, color.b]),
        PixelFormat::Bgr32 => bytes[at..at + 4].copy_from_slice(&[color.b, color.g, color.r, 255]),
        PixelFormat::Bgra32 => bytes[at..at + 4].copy_from_slice(&color.to_bgra()),
        PixelFormat::Pbgra32 => {
            let pm = |c: u8| ((c as u32 * color.a as u32 + 127) / 255) as u8;
            bytes[at..at + 4].copy_from_slice(&[pm(color.b), pm(color.g), pm(color.r), color.a]);
        }
        other => return Err(unsupported(other)),
    }
    Ok(())
}

/// Builds a frame of `width` × `height` whose pixel (x, y) is copied from `map(x, y)`.
fn remap(
    source: &FrameSource,
    width: u32,
    height: u32,
    map: impl Fn(u32, u32) -> (u32, u32),
) -> Result<FrameSource> {
    let format = source.format();
    let stride = format.min_stride(width);
    let mut pixels = vec![0u8; checked_buffer_len(stride, height)?];
    let bpp = format.bits_per_pixel();
    for y in 0..height {
        for x in 0..width {
            let (sx, sy) = map(x, y);
            copy_rect(
                source.pixels(),
                Placement {
                    x: sx,
                    y: sy,
                    stride: source.stride(),
                },
                &mut pixels,
                Placement { x, y, stride },
                1,
                1,
                bpp,
            );
        }
    }
    let (dpi_x, dpi_y) = source.dpi();
    FrameSource::new(
        width,
        height,
        dpi_x,
        dpi_y,
        format,
        source.palette().cloned(),
        pixels,
        stride,
    )
}

fn rotate(source: &FrameSource, rotation: Rotation, flip: Flip) -> Result<FrameSource> {
    let (sw, sh) = (source.width(), source.height());
    let (ow, oh) = match rotation {
        Rotation::Rotate90 | Rotation::Rotate270 => (sh, sw),
        _ => (sw, sh),
    };
    remap(source, ow, oh, |x, y| {
        // Undo the flip, then the clockwise rotation.
        let (u, v) = match flip {
            Flip::None => (x, y),
            Flip::Horizontal => (ow - 1 - x, y),
            Flip::Vertical => (x, oh - 1 - y),
        };
        match rotation {
            Rotation::Rotate0 => (u, v),
            Rotation::Rotate90 => (v, sh - 1 - u),
            Rotation::Rotate180 => (sw - 1 - u, sh - 1 - v),
            Rotation::Rotate270 => (sw - 1 - v, u),
        }
    })
}

fn convert(
    source: &FrameSource,
    format: PixelFormat,
    palette: Option<BitmapPalette>,
    alpha_threshold: f64,
) -> Result<FrameSource> {
    let (width, height) = (source.width(), source.height());
    let stride = format.min_stride(width);
    let mut pixels = vec![0u8; checked_buffer_len(stride, height)?];
    let bpp = format.bits_per_pixel() as usize;
    let transparent_below = palette.as_ref().and_then(|p| {
        p.colors()
            .iter()
            .position(|c| c.a == 0)
            .map(|index| (index, alpha_threshold))
    });
    for y in 0..height {
        for x in 0..width {
            let color = read_color(source, x, y)?;
            let bit = y as usize * stride * 8 + x as usize * bpp;
            write_color(format, palette.as_ref(), transparent_below, &mut pixels, bit, color)?;
        }
    }
    let (dpi_x, dpi_y) = source.dpi();
    let palette = if format.is_palettized() { palette } else { None };
    FrameSource::new(width, height, dpi_x, dpi_y, format, palette, pixels, stride)
}

// --- Stream framing ---

fn put_guid(out: &mut Vec<u8>, guid: &Guid) {
    out.extend_from_slice(&guid.data1.to_le_bytes());
    out.extend_from_slice(&guid.data2.to_le_bytes());
    out.extend_from_slice(&guid.data3.to_le_bytes());
    out.extend_from_slice(&guid.data4);
}

fn put_palette(out: &mut Vec<u8>, palette: Option<&BitmapPalette>) {
    let colors = palette.map(|p| p.colors()).unwrap_or(&[]);
    out.extend_from_slice(&(colors.len() as u16).to_le_bytes());
    for color in colors {
        out.extend_from_slice(&color.to_argb_u32().to_le_bytes());
    }
}

fn write_stream(
    container: ContainerFormat,
    palette: Option<&BitmapPalette>,
    frames: &[FrameSource],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(STREAM_MAGIC);
    put_guid(&mut out, &container.guid());
    put_palette(&mut out, palette);
    out.extend_from_slice(&(frames.len() as u32).to_le_bytes());
    for frame in frames {
        let (dpi_x, dpi_y) = frame.dpi();
        out.extend_from_slice(&frame.width().to_le_bytes());
        out.extend_from_slice(&frame.height().to_le_bytes());
        out.extend_from_slice(&dpi_x.to_le_bytes());
        out.extend_from_slice(&dpi_y.to_le_bytes());
        put_guid(&mut out, &frame.format().guid());
        put_palette(&mut out, frame.palette());
        out.extend_from_slice(&(frame.stride() as u32).to_le_bytes());
        let len = frame.stride() * frame.height() as usize;
        out.extend_from_slice(&frame.pixels()[..len]);
    }
    out
}

struct StreamReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> StreamReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| ImagingError::CodecFailure("truncated stream".into()))?;
        let bytes: &'a [u8] = self.bytes;
        let slice = &bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    fn guid(&mut self) -> Result<Guid> {
        Ok(Guid::from_fields(self.u32()?, self.u16()?, self.u16()?, self.array()?))
    }

    fn palette(&mut self) -> Result<Option<BitmapPalette>> {
        let count = self.u16()? as usize;
        if count == 0 {
            return Ok(None);
        }
        let colors = (0..count)
            .map(|_| self.u32().map(Color::from_argb_u32))
            .collect::<Result<Vec<_>>>()?;
        BitmapPalette::new(colors).map(Some)
    }
}

fn read_stream(bytes: &[u8]) -> Result<StoredImage> {
    let mut reader = StreamReader { bytes, pos: 0 };
    if reader.take(4)? != STREAM_MAGIC {
        return Err(ImagingError::CodecFailure("unrecognized stream".into()));
    }
    let container = ContainerFormat::from_guid(&reader.guid()?)
        .map_err(|e| ImagingError::CodecFailure(e.to_string()))?;
    let palette = reader.palette()?;
    let count = reader.u32()?;
    let mut frames = Vec::new();
    for _ in 0..count {
        let width = reader.u32()?;
        let height = reader.u32()?;
        let dpi_x = reader.f64()?;
        let dpi_y = reader.f64()?;
        let format = PixelFormat::from_guid(&reader.guid()?)
            .map_err(|e| ImagingError::CodecFailure(e.to_string()))?;
        let frame_palette = reader.palette()?;
        let stride = reader.u32()? as usize;
        let len = stride
            .checked_mul(height as usize)
            .ok_or_else(|| ImagingError::CodecFailure("frame size overflows".into()))?;
        let pixels: Arc<[u8]> = reader.take(len)?.into();
        let frame = FrameSource::new(width, height, dpi_x, dpi_y, format, frame_palette, pixels, stride)
            .map_err(|e| ImagingError::CodecFailure(e.to_string()))?;
        frames.push(frame);
    }
    Ok(StoredImage {
        container,
        frames,
        metadata: None,
        palette,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PixelRect;
    use crate::palette::PredefinedPalette;
    use crate::transform::{apply_transform, DitherType};

    fn gray(width: u32, height: u32, values: &[u8]) -> FrameSource {
        FrameSource::new(width, height, 96.0, 96.0, PixelFormat::Gray8, None, values.to_vec(), width as usize)
            .unwrap()
    }

    #[test]
    fn crop_copies_the_selected_block() {
        let codec = HeadlessCodec::new();
        let src = gray(3, 2, &[1, 2, 3, 4, 5, 6]);
        let out = apply_transform(&codec, &src, &Transform::Crop(PixelRect::new(1, 0, 2, 2))).unwrap();
        assert_eq!(out.pixels(), &[2, 3, 5, 6]);
    }

    #[test]
    fn rotate_quarter_turn_clockwise() {
        let codec = HeadlessCodec::new();
        let src = gray(2, 1, &[10, 20]);
        let t = Transform::Rotate {
            rotation: Rotation::Rotate90,
            flip: Flip::None,
        };
        let out = apply_transform(&codec, &src, &t).unwrap();
        assert_eq!((out.width(), out.height()), (1, 2));
        assert_eq!(out.pixels(), &[10, 20]);

        let flipped = Transform::Rotate {
            rotation: Rotation::Rotate0,
            flip: Flip::Horizontal,
        };
        assert_eq!(apply_transform(&codec, &src, &flipped).unwrap().pixels(), &[20, 10]);
    }

    #[test]
    fn scale_nearest_duplicates_pixels() {
        let codec = HeadlessCodec::new();
        let src = gray(2, 1, &[7, 9]);
        let t = Transform::Scale {
            width: 4,
            height: 1,
            mode: Default::default(),
        };
        assert_eq!(apply_transform(&codec, &src, &t).unwrap().pixels(), &[7, 7, 9, 9]);
    }

    #[test]
    fn format_convert_to_indexed_uses_palette() {
        let codec = HeadlessCodec::new();
        let src = gray(4, 1, &[0, 60, 200, 255]);
        let t = Transform::FormatConvert {
            format: PixelFormat::Indexed1,
            palette: Some(BitmapPalette::predefined(PredefinedPalette::BlackAndWhite)),
            dither: DitherType::None,
            alpha_threshold: 0.0,
        };
        let out = apply_transform(&codec, &src, &t).unwrap();
        assert_eq!(out.stride(), 1);
        assert_eq!(out.pixels(), &[0b0011_0000]);
        assert_eq!(out.palette().map(|p| p.len()), Some(2));
    }

    #[test]
    fn unsupported_conversion_is_a_codec_failure() {
        let codec = HeadlessCodec::new();
        let src = FrameSource::blank(1, 1, 96.0, 96.0, PixelFormat::Rgba128Float, None).unwrap();
        let t = Transform::ColorConvert {
            source: crate::transform::ColorContext::Srgb,
            destination: crate::transform::ColorContext::Srgb,
            format: PixelFormat::Bgra32,
        };
        assert!(matches!(
            apply_transform(&codec, &src, &t),
            Err(ImagingError::CodecFailure(_))
        ));
    }

    #[test]
    fn palette_from_bitmap_ranks_by_frequency() {
        let codec = HeadlessCodec::new();
        let src = gray(4, 1, &[9, 9, 9, 3]);
        let palette = codec.create_palette_from_bitmap(&src, 2, true).unwrap();
        assert_eq!(palette.colors(), &[Color::gray(9), Color::TRANSPARENT]);
    }

    #[test]
    fn committed_stream_decodes_again() {
        let codec = HeadlessCodec::new();
        let encoder = codec.create_encoder(ContainerFormat::Tiff).unwrap();
        let frame = gray(2, 2, &[1, 2, 3, 4]);
        codec.add_frame(encoder, &frame, &PropertyBag::new()).unwrap();
        let bytes = codec.commit(encoder).unwrap();
        assert!(codec.commit(encoder).is_err());
        codec.release_encoder(encoder);

        let info = codec
            .create_decoder(&DecodeSource::Stream(bytes.into()), DecodeOptions::default())
            .unwrap();
        assert_eq!(info.container, ContainerFormat::Tiff);
        assert_eq!(codec.get_frame(info.id, 0).unwrap().pixels(), frame.pixels());
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let codec = HeadlessCodec::new();
        let stream: Arc<[u8]> = Arc::from(&b"HDLS\x01"[..]);
        assert!(matches!(
            codec.create_decoder(&DecodeSource::Stream(stream), DecodeOptions::default()),
            Err(ImagingError::CodecFailure(_))
        ));
    }

    #[test]
    fn injected_failure_fires_once() {
        let codec = HeadlessCodec::new();
        codec.inject_failure("disk on fire");
        assert_eq!(
            codec.create_encoder(ContainerFormat::Png),
            Err(ImagingError::CodecFailure("disk on fire".into()))
        );
        assert!(codec.create_encoder(ContainerFormat::Png).is_ok());
    }
}
