// src/codec/mod.rs

//! The codec boundary.
//!
//! `ImageCodec` is the service that actually decodes, encodes and transforms
//! pixels. This crate only talks to it through the trait. Codec objects are
//! addressed by ids, and every id is owned by exactly one RAII handle
//! ([`DecoderHandle`], [`EncoderHandle`]) whose `Drop` releases it, so
//! cleanup happens on every exit path without finalizers.
//!
//! - `headless`: in-memory codec used by tests and the demo binary.

pub mod headless;

pub use headless::HeadlessCodec;

use crate::container::ContainerFormat;
use crate::error::Result;
use crate::frame::FrameSource;
use crate::metadata::BitmapMetadata;
use crate::palette::{BitmapPalette, PredefinedPalette};
use crate::tagged_value::TaggedValue;
use crate::transform::Transform;
use log::trace;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Named encoder options, e.g. `"ImageQuality" → F32(0.9)`.
pub type PropertyBag = BTreeMap<String, TaggedValue>;

pub type DecoderId = u64;
pub type EncoderId = u64;

/// Where encoded bytes come from.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeSource {
    Uri(String),
    Stream(Arc<[u8]>),
}

impl DecodeSource {
    pub fn uri(&self) -> Option<&str> {
        match self {
            DecodeSource::Uri(uri) => Some(uri),
            DecodeSource::Stream(_) => None,
        }
    }
}

/// Options passed through to the codec when opening a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeOptions {
    /// Keep the stored pixel format instead of converting to a display format.
    pub preserve_pixel_format: bool,
    pub ignore_color_profile: bool,
}

/// Facts about a decoder that are fixed once it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderInfo {
    pub id: DecoderId,
    pub container: ContainerFormat,
}

/// The external codec service.
pub trait ImageCodec: Send + Sync {
    fn create_decoder(&self, source: &DecodeSource, options: DecodeOptions) -> Result<DecoderInfo>;

    fn release_decoder(&self, id: DecoderId);

    fn frame_count(&self, id: DecoderId) -> Result<u32>;

    fn get_frame(&self, id: DecoderId, index: u32) -> Result<FrameSource>;

    /// Container-level metadata, if the stream has any.
    fn decoder_metadata(&self, id: DecoderId) -> Result<Option<BitmapMetadata>>;

    /// Container-level palette, if the stream has one.
    fn decoder_palette(&self, id: DecoderId) -> Result<Option<BitmapPalette>>;

    fn create_encoder(&self, container: ContainerFormat) -> Result<EncoderId>;

    fn release_encoder(&self, id: EncoderId);

    fn set_encoder_metadata(&self, id: EncoderId, metadata: &BitmapMetadata) -> Result<()>;

    fn set_encoder_palette(&self, id: EncoderId, palette: &BitmapPalette) -> Result<()>;

    fn set_thumbnail(&self, id: EncoderId, thumbnail: &FrameSource) -> Result<()>;

    fn set_preview(&self, id: EncoderId, preview: &FrameSource) -> Result<()>;

    /// Appends a frame, with its per-frame options.
    fn add_frame(&self, id: EncoderId, frame: &FrameSource, options: &PropertyBag) -> Result<()>;

    /// Finishes the stream and returns the encoded bytes.
    fn commit(&self, id: EncoderId) -> Result<Vec<u8>>;

    fn create_transform(&self, source: &FrameSource, transform: &Transform) -> Result<FrameSource>;

    fn create_palette_from_bitmap(
        &self,
        source: &FrameSource,
        max_colors: usize,
        add_transparent: bool,
    ) -> Result<BitmapPalette>;

    fn predefined_palette(&self, kind: PredefinedPalette) -> BitmapPalette {
        BitmapPalette::predefined(kind)
    }
}

/// Sole owner of an open decoder.
pub struct DecoderHandle {
    codec: Arc<dyn ImageCodec>,
    info: DecoderInfo,
}

impl DecoderHandle {
    pub fn open(
        codec: Arc<dyn ImageCodec>,
        source: &DecodeSource,
        options: DecodeOptions,
    ) -> Result<Self> {
        let info = codec.create_decoder(source, options)?;
        trace!("DecoderHandle: opened decoder {}", info.id);
        Ok(Self { codec, info })
    }

    pub fn container(&self) -> ContainerFormat {
        self.info.container
    }

    pub fn frame_count(&self) -> Result<u32> {
        self.codec.frame_count(self.info.id)
    }

    pub fn get_frame(&self, index: u32) -> Result<FrameSource> {
        self.codec.get_frame(self.info.id, index)
    }

    pub fn metadata(&self) -> Result<Option<BitmapMetadata>> {
        self.codec.decoder_metadata(self.info.id)
    }

    pub fn palette(&self) -> Result<Option<BitmapPalette>> {
        self.codec.decoder_palette(self.info.id)
    }
}

impl Drop for DecoderHandle {
    fn drop(&mut self) {
        trace!("DecoderHandle: releasing decoder {}", self.info.id);
        self.codec.release_decoder(self.info.id);
    }
}

/// Sole owner of an open encoder. `commit` consumes the handle.
pub struct EncoderHandle {
    codec: Arc<dyn ImageCodec>,
    id: EncoderId,
}

impl EncoderHandle {
    pub fn create(codec: Arc<dyn ImageCodec>, container: ContainerFormat) -> Result<Self> {
        let id = codec.create_encoder(container)?;
        trace!("EncoderHandle: created encoder {} for {:?}", id, container);
        Ok(Self { codec, id })
    }

    pub fn set_metadata(&self, metadata: &BitmapMetadata) -> Result<()> {
        self.codec.set_encoder_metadata(self.id, metadata)
    }

    pub fn set_palette(&self, palette: &BitmapPalette) -> Result<()> {
        self.codec.set_encoder_palette(self.id, palette)
    }

    pub fn set_thumbnail(&self, thumbnail: &FrameSource) -> Result<()> {
        self.codec.set_thumbnail(self.id, thumbnail)
    }

    pub fn set_preview(&self, preview: &FrameSource) -> Result<()> {
        self.codec.set_preview(self.id, preview)
    }

    pub fn add_frame(&self, frame: &FrameSource, options: &PropertyBag) -> Result<()> {
        self.codec.add_frame(self.id, frame, options)
    }

    pub fn commit(self) -> Result<Vec<u8>> {
        // Drop still runs afterwards and releases the id.
        self.codec.commit(self.id)
    }
}

impl Drop for EncoderHandle {
    fn drop(&mut self) {
        trace!("EncoderHandle: releasing encoder {}", self.id);
        self.codec.release_encoder(self.id);
    }
}
