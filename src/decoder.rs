// src/decoder.rs

//! Decoding: `BitmapDecoder` and background decode events.
//!
//! A decoder opens a codec decoder for a URI or an in-memory stream and
//! hands out its frames. Frames are fetched on first use and kept. With
//! [`CacheOption::OnLoad`] every frame is fetched up front and the codec
//! decoder is released immediately.

use crate::cache::BitmapCache;
use crate::codec::{DecodeOptions, DecodeSource, DecoderHandle, ImageCodec};
use crate::container::ContainerFormat;
use crate::error::{ImagingError, Result};
use crate::frame::FrameSource;
use crate::metadata::BitmapMetadata;
use crate::palette::BitmapPalette;
use anyhow::Context;
use bitflags::bitflags;
use log::*;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

bitflags! {
    /// Options fixed when a decoder is created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CreateOptions: u8 {
        const PRESERVE_PIXEL_FORMAT = 1 << 0;
        const IGNORE_COLOR_PROFILE  = 1 << 1;
        const DELAY_CREATION        = 1 << 2; // Open the codec decoder on first use.
        const IGNORE_IMAGE_CACHE    = 1 << 3;
    }
}

impl CreateOptions {
    fn decode_options(self) -> DecodeOptions {
        DecodeOptions {
            preserve_pixel_format: self.contains(CreateOptions::PRESERVE_PIXEL_FORMAT),
            ignore_color_profile: self.contains(CreateOptions::IGNORE_COLOR_PROFILE),
        }
    }
}

/// When frames are read out of the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CacheOption {
    /// Same as `OnDemand`.
    #[default]
    Default,
    OnDemand,
    /// Read every frame during `create` and release the codec decoder.
    OnLoad,
    /// Never keep frames; every access asks the codec again.
    None,
}

pub struct BitmapDecoder {
    codec: Arc<dyn ImageCodec>,
    source: DecodeSource,
    options: CreateOptions,
    cache_option: CacheOption,
    cache: Option<Arc<BitmapCache>>,
    handle: Option<DecoderHandle>,
    container: Option<ContainerFormat>,
    frame_count: Option<u32>,
    loaded: Vec<Option<FrameSource>>,
    all_frames: Option<Arc<Vec<FrameSource>>>,
}

impl std::fmt::Debug for BitmapDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitmapDecoder")
            .field("source", &self.source.uri())
            .field("options", &self.options)
            .field("cache_option", &self.cache_option)
            .field("open", &self.handle.is_some())
            .field("frame_count", &self.frame_count)
            .finish()
    }
}

impl BitmapDecoder {
    pub fn create(
        codec: Arc<dyn ImageCodec>,
        source: DecodeSource,
        options: CreateOptions,
        cache_option: CacheOption,
    ) -> Result<Self> {
        Self::create_with_cache(codec, source, options, cache_option, None)
    }

    /// Like [`create`](Self::create), sharing decoded frames through `cache`.
    pub fn create_with_cache(
        codec: Arc<dyn ImageCodec>,
        source: DecodeSource,
        options: CreateOptions,
        cache_option: CacheOption,
        cache: Option<Arc<BitmapCache>>,
    ) -> Result<Self> {
        let mut decoder = Self {
            codec,
            source,
            options,
            cache_option,
            cache,
            handle: None,
            container: None,
            frame_count: None,
            loaded: Vec::new(),
            all_frames: None,
        };

        if let Some(frames) = decoder.cached_frames() {
            debug!(
                "BitmapDecoder: '{}' served from cache",
                decoder.source.uri().unwrap_or_default()
            );
            decoder.frame_count = Some(frames.len() as u32);
            decoder.all_frames = Some(frames);
            return Ok(decoder);
        }

        if cache_option == CacheOption::OnLoad {
            decoder.frames()?;
            decoder.handle = None;
        } else if !options.contains(CreateOptions::DELAY_CREATION) {
            decoder.open()?;
        }
        Ok(decoder)
    }

    fn cached_frames(&self) -> Option<Arc<Vec<FrameSource>>> {
        if self.options.contains(CreateOptions::IGNORE_IMAGE_CACHE) {
            return None;
        }
        self.cache.as_ref()?.get(self.source.uri()?)
    }

    fn open(&mut self) -> Result<&DecoderHandle> {
        if self.handle.is_none() {
            let handle = DecoderHandle::open(
                self.codec.clone(),
                &self.source,
                self.options.decode_options(),
            )?;
            self.container = Some(handle.container());
            if self.frame_count.is_none() {
                self.frame_count = Some(handle.frame_count()?);
            }
            self.handle = Some(handle);
        }
        self.handle
            .as_ref()
            .ok_or_else(|| ImagingError::CodecFailure("decoder not open".into()))
    }

    pub fn source(&self) -> &DecodeSource {
        &self.source
    }

    pub fn container_format(&mut self) -> Result<ContainerFormat> {
        if let Some(container) = self.container {
            return Ok(container);
        }
        Ok(self.open()?.container())
    }

    pub fn frame_count(&mut self) -> Result<u32> {
        if let Some(count) = self.frame_count {
            return Ok(count);
        }
        self.open()?;
        self.frame_count
            .ok_or_else(|| ImagingError::CodecFailure("frame count unknown".into()))
    }

    /// Frame `index`, fetched from the codec on first use.
    pub fn frame(&mut self, index: u32) -> Result<FrameSource> {
        if let Some(frames) = &self.all_frames {
            return frames
                .get(index as usize)
                .cloned()
                .ok_or_else(|| out_of_range(index, frames.len()));
        }
        let count = self.frame_count()?;
        if index >= count {
            return Err(out_of_range(index, count as usize));
        }
        if let Some(Some(frame)) = self.loaded.get(index as usize) {
            return Ok(frame.clone());
        }
        let frame = self.open()?.get_frame(index)?;
        if self.cache_option != CacheOption::None {
            if self.loaded.len() < count as usize {
                self.loaded.resize(count as usize, None);
            }
            self.loaded[index as usize] = Some(frame.clone());
        }
        Ok(frame)
    }

    /// All frames, in order.
    pub fn frames(&mut self) -> Result<Arc<Vec<FrameSource>>> {
        if let Some(frames) = &self.all_frames {
            return Ok(frames.clone());
        }
        let count = self.frame_count()?;
        let frames = (0..count)
            .map(|i| self.frame(i))
            .collect::<Result<Vec<_>>>()?;
        let frames = Arc::new(frames);
        if self.cache_option != CacheOption::None {
            self.all_frames = Some(frames.clone());
            self.loaded.clear();
        }
        if let (Some(cache), Some(uri)) = (&self.cache, self.source.uri()) {
            if !self.options.contains(CreateOptions::IGNORE_IMAGE_CACHE) {
                cache.insert(uri, &frames);
            }
        }
        trace!("BitmapDecoder: {} frames loaded", count);
        Ok(frames)
    }

    /// Container-level metadata, frozen.
    pub fn metadata(&mut self) -> Result<Option<BitmapMetadata>> {
        let metadata = self.open()?.metadata()?;
        if let Some(meta) = &metadata {
            meta.freeze();
        }
        Ok(metadata)
    }

    pub fn palette(&mut self) -> Result<Option<BitmapPalette>> {
        self.open()?.palette()
    }

    /// True while a codec decoder is held.
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }
}

fn out_of_range(index: u32, count: usize) -> ImagingError {
    ImagingError::invalid(format!("frame {} out of range, decoder has {}", index, count))
}

/// Progress of a background decode, delivered to the owner's event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeEvent {
    /// Percent of frames decoded, 0..=100.
    Progress(u8),
    Completed(Arc<Vec<FrameSource>>),
    Failed(ImagingError),
}

/// Decodes every frame of `source` on a worker thread.
///
/// Events arrive on `events` in order: zero or more `Progress`, then exactly
/// one `Completed` or `Failed`. The worker stops early if the receiver goes
/// away.
pub fn decode_in_background(
    codec: Arc<dyn ImageCodec>,
    source: DecodeSource,
    options: CreateOptions,
    events: Sender<DecodeEvent>,
) -> anyhow::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("decoder".to_string())
        .spawn(move || {
            info!("DecodeWorker: Thread started");
            let event = match decode_all(&codec, &source, options, &events) {
                Ok(Some(frames)) => DecodeEvent::Completed(frames),
                Ok(None) => {
                    info!("DecodeWorker: Receiver gone, abandoning decode");
                    return;
                }
                Err(e) => {
                    warn!("DecodeWorker: decode failed: {}", e);
                    DecodeEvent::Failed(e)
                }
            };
            if events.send(event).is_err() {
                info!("DecodeWorker: Receiver gone before completion");
            }
            info!("DecodeWorker: Thread stopped");
        })
        .context("Failed to spawn decoder thread")
}

fn decode_all(
    codec: &Arc<dyn ImageCodec>,
    source: &DecodeSource,
    options: CreateOptions,
    events: &Sender<DecodeEvent>,
) -> Result<Option<Arc<Vec<FrameSource>>>> {
    let handle = DecoderHandle::open(codec.clone(), source, options.decode_options())?;
    let count = handle.frame_count()?;
    let mut frames = Vec::with_capacity(count as usize);
    for index in 0..count {
        frames.push(handle.get_frame(index)?);
        let percent = ((index as u64 + 1) * 100 / count as u64) as u8;
        if events.send(DecodeEvent::Progress(percent)).is_err() {
            return Ok(None);
        }
    }
    Ok(Some(Arc::new(frames)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::headless::StoredImage;
    use crate::codec::HeadlessCodec;
    use crate::pixel_format::PixelFormat;
    use std::sync::mpsc::channel;
    use test_log::test;

    fn codec_with_image(frames: usize) -> Arc<HeadlessCodec> {
        let codec = Arc::new(HeadlessCodec::new());
        let frames = (0..frames)
            .map(|i| {
                FrameSource::new(1, 1, 96.0, 96.0, PixelFormat::Gray8, None, vec![i as u8], 1).unwrap()
            })
            .collect();
        let mut image = StoredImage::new(ContainerFormat::Tiff, frames);
        image.metadata = Some(BitmapMetadata::new(ContainerFormat::Tiff));
        codec.insert_image("mem://pages.tif", image);
        codec
    }

    fn uri() -> DecodeSource {
        DecodeSource::Uri("mem://pages.tif".to_string())
    }

    #[test]
    fn frames_load_lazily_and_stay_cached() {
        let codec = codec_with_image(3);
        let mut decoder =
            BitmapDecoder::create(codec.clone(), uri(), CreateOptions::empty(), CacheOption::Default)
                .unwrap();
        assert!(decoder.is_open());
        assert_eq!(decoder.frame_count().unwrap(), 3);
        assert_eq!(decoder.frame(2).unwrap().pixels(), &[2]);
        assert!(matches!(decoder.frame(3), Err(ImagingError::InvalidParameter(_))));

        // Cached frames survive a codec failure.
        codec.inject_failure("gone");
        assert_eq!(decoder.frame(2).unwrap().pixels(), &[2]);
    }

    #[test]
    fn delay_creation_opens_on_first_use() {
        let codec = codec_with_image(1);
        let mut decoder = BitmapDecoder::create(
            codec.clone(),
            uri(),
            CreateOptions::DELAY_CREATION,
            CacheOption::OnDemand,
        )
        .unwrap();
        assert!(!decoder.is_open());
        assert_eq!(codec.open_handles().0, 0);
        assert_eq!(decoder.container_format().unwrap(), ContainerFormat::Tiff);
        assert!(decoder.is_open());
    }

    #[test]
    fn on_load_releases_codec_decoder() {
        let codec = codec_with_image(2);
        let mut decoder =
            BitmapDecoder::create(codec.clone(), uri(), CreateOptions::empty(), CacheOption::OnLoad).unwrap();
        assert!(!decoder.is_open());
        assert_eq!(codec.open_handles().0, 0);
        assert_eq!(decoder.frames().unwrap().len(), 2);
    }

    #[test]
    fn dropping_decoder_releases_handle() {
        let codec = codec_with_image(1);
        let decoder =
            BitmapDecoder::create(codec.clone(), uri(), CreateOptions::empty(), CacheOption::Default).unwrap();
        assert_eq!(codec.open_handles().0, 1);
        drop(decoder);
        assert_eq!(codec.open_handles().0, 0);
    }

    #[test]
    fn shared_cache_skips_the_codec() {
        let codec = codec_with_image(2);
        let cache = Arc::new(BitmapCache::new(4));
        let mut first = BitmapDecoder::create_with_cache(
            codec.clone(),
            uri(),
            CreateOptions::empty(),
            CacheOption::Default,
            Some(cache.clone()),
        )
        .unwrap();
        let frames = first.frames().unwrap();

        codec.inject_failure("codec should not be called");
        let mut second = BitmapDecoder::create_with_cache(
            codec.clone(),
            uri(),
            CreateOptions::empty(),
            CacheOption::Default,
            Some(cache.clone()),
        )
        .unwrap();
        assert!(Arc::ptr_eq(&second.frames().unwrap(), &frames));

        // Bypassing the cache reaches the codec, which fails once.
        assert!(BitmapDecoder::create_with_cache(
            codec,
            uri(),
            CreateOptions::IGNORE_IMAGE_CACHE,
            CacheOption::Default,
            Some(cache),
        )
        .is_err());
    }

    #[test]
    fn metadata_is_frozen() {
        let codec = codec_with_image(1);
        let mut decoder =
            BitmapDecoder::create(codec, uri(), CreateOptions::empty(), CacheOption::Default).unwrap();
        let meta = decoder.metadata().unwrap().unwrap();
        assert!(meta.is_frozen());
    }

    #[test]
    fn codec_failure_propagates_unchanged() {
        let codec = codec_with_image(1);
        codec.inject_failure("corrupt header");
        assert_eq!(
            BitmapDecoder::create(codec, uri(), CreateOptions::empty(), CacheOption::Default).unwrap_err(),
            ImagingError::CodecFailure("corrupt header".into())
        );
    }

    #[test]
    fn background_decode_reports_progress_then_completion() {
        let codec = codec_with_image(4);
        let (tx, rx) = channel();
        let worker = decode_in_background(codec, uri(), CreateOptions::empty(), tx).unwrap();
        let events: Vec<DecodeEvent> = rx.iter().collect();
        worker.join().unwrap();
        let progress: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                DecodeEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![25, 50, 75, 100]);
        assert!(matches!(events.last(), Some(DecodeEvent::Completed(frames)) if frames.len() == 4));
    }

    #[test]
    fn background_decode_reports_failure() {
        let codec = Arc::new(HeadlessCodec::new());
        let (tx, rx) = channel();
        decode_in_background(codec, uri(), CreateOptions::empty(), tx)
            .unwrap()
            .join()
            .unwrap();
        assert!(matches!(rx.recv().unwrap(), DecodeEvent::Failed(ImagingError::CodecFailure(_))));
    }
}
