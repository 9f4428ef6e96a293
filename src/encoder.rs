// src/encoder.rs

//! Encoding: `BitmapEncoder` and per-format options.
//!
//! The encoder collects frames and container-level data, then `save` opens
//! a codec encoder, pushes everything through it and commits. The codec
//! encoder only exists for the duration of `save`.

use crate::codec::{EncoderHandle, ImageCodec, PropertyBag};
use crate::config::{EncoderConfig, CONFIG};
use crate::container::ContainerFormat;
use crate::error::{ImagingError, Result};
use crate::frame::FrameSource;
use crate::metadata::BitmapMetadata;
use crate::palette::BitmapPalette;
use crate::tagged_value::TaggedValue;
use crate::transform::{Flip, Rotation};
use log::{debug, info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TiffCompression {
    /// Let the codec choose.
    #[default]
    Default,
    None,
    Ccitt3,
    Ccitt4,
    Lzw,
    Rle,
    Zip,
}

impl TiffCompression {
    /// Parses the names used in configuration files.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "default" => TiffCompression::Default,
            "none" => TiffCompression::None,
            "ccitt3" => TiffCompression::Ccitt3,
            "ccitt4" => TiffCompression::Ccitt4,
            "lzw" => TiffCompression::Lzw,
            "rle" => TiffCompression::Rle,
            "zip" => TiffCompression::Zip,
            _ => return None,
        })
    }

    fn code(self) -> u8 {
        self as u8
    }
}

/// Options for one container format.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderOptions {
    /// BMP, GIF and ICO take no options.
    None,
    Jpeg {
        /// 1..=100.
        quality: u8,
        rotation: Rotation,
        flip: Flip,
    },
    Png {
        interlace: bool,
    },
    Tiff {
        compression: TiffCompression,
    },
    Wmp {
        /// 0.0..=1.0.
        image_quality: f32,
        lossless: bool,
    },
}

impl EncoderOptions {
    /// Defaults for `container`, taken from `config`.
    pub fn defaults_for(container: ContainerFormat, config: &EncoderConfig) -> Self {
        match container {
            ContainerFormat::Jpeg => EncoderOptions::Jpeg {
                quality: config.jpeg_quality.clamp(1, 100),
                rotation: Rotation::Rotate0,
                flip: Flip::None,
            },
            ContainerFormat::Png => EncoderOptions::Png {
                interlace: config.png_interlace,
            },
            ContainerFormat::Tiff => EncoderOptions::Tiff {
                compression: TiffCompression::from_name(&config.tiff_compression).unwrap_or_else(
                    || {
                        warn!(
                            "EncoderOptions: unknown tiff compression '{}', using codec default",
                            config.tiff_compression
                        );
                        TiffCompression::Default
                    },
                ),
            },
            ContainerFormat::Wmp => EncoderOptions::Wmp {
                image_quality: 0.9,
                lossless: false,
            },
            ContainerFormat::Bmp | ContainerFormat::Gif | ContainerFormat::Ico => {
                EncoderOptions::None
            }
        }
    }

    /// True when these options belong to `container`.
    pub fn applies_to(&self, container: ContainerFormat) -> bool {
        matches!(
            (self, container),
            (EncoderOptions::None, ContainerFormat::Bmp | ContainerFormat::Gif | ContainerFormat::Ico)
                | (EncoderOptions::Jpeg { .. }, ContainerFormat::Jpeg)
                | (EncoderOptions::Png { .. }, ContainerFormat::Png)
                | (EncoderOptions::Tiff { .. }, ContainerFormat::Tiff)
                | (EncoderOptions::Wmp { .. }, ContainerFormat::Wmp)
        )
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            EncoderOptions::Jpeg { quality, .. } if !(1..=100).contains(quality) => Err(
                ImagingError::invalid(format!("jpeg quality must be 1..=100, got {}", quality)),
            ),
            EncoderOptions::Wmp { image_quality, .. } if !(0.0..=1.0).contains(image_quality) => {
                Err(ImagingError::invalid(format!(
                    "wmp image quality must be 0.0..=1.0, got {}",
                    image_quality
                )))
            }
            _ => Ok(()),
        }
    }

    /// The named option bag handed to the codec with every frame.
    pub fn to_property_bag(&self) -> PropertyBag {
        let mut bag = PropertyBag::new();
        match *self {
            EncoderOptions::None => {}
            EncoderOptions::Jpeg {
                quality,
                rotation,
                flip,
            } => {
                bag.insert("ImageQuality".into(), TaggedValue::F32(quality as f32 / 100.0));
                bag.insert(
                    "BitmapTransform".into(),
                    TaggedValue::U8(bitmap_transform_code(rotation, flip)),
                );
            }
            EncoderOptions::Png { interlace } => {
                bag.insert("InterlaceOption".into(), TaggedValue::Bool(interlace));
            }
            EncoderOptions::Tiff { compression } => {
                bag.insert(
                    "TiffCompressionMethod".into(),
                    TaggedValue::U8(compression.code()),
                );
            }
            EncoderOptions::Wmp {
                image_quality,
                lossless,
            } => {
                bag.insert("ImageQuality".into(), TaggedValue::F32(image_quality));
                bag.insert("Lossless".into(), TaggedValue::Bool(lossless));
            }
        }
        bag
    }
}

/// Rotation in the low bits, flips as 8 and 16.
fn bitmap_transform_code(rotation: Rotation, flip: Flip) -> u8 {
    let rotate = match rotation {
        Rotation::Rotate0 => 0,
        Rotation::Rotate90 => 1,
        Rotation::Rotate180 => 2,
        Rotation::Rotate270 => 3,
    };
    let flip = match flip {
        Flip::None => 0,
        Flip::Horizontal => 8,
        Flip::Vertical => 16,
    };
    rotate | flip
}

pub struct BitmapEncoder {
    codec: Arc<dyn ImageCodec>,
    container: ContainerFormat,
    frames: Vec<FrameSource>,
    metadata: Option<BitmapMetadata>,
    palette: Option<BitmapPalette>,
    thumbnail: Option<FrameSource>,
    preview: Option<FrameSource>,
    options: EncoderOptions,
    saved: bool,
}

impl BitmapEncoder {
    /// An empty encoder with options from the global configuration.
    pub fn new(codec: Arc<dyn ImageCodec>, container: ContainerFormat) -> Self {
        let options = EncoderOptions::defaults_for(container, &CONFIG.encoder);
        Self {
            codec,
            container,
            frames: Vec::new(),
            metadata: None,
            palette: None,
            thumbnail: None,
            preview: None,
            options,
            saved: false,
        }
    }

    pub fn container_format(&self) -> ContainerFormat {
        self.container
    }

    pub fn frames(&self) -> &[FrameSource] {
        &self.frames
    }

    fn ensure_unsaved(&self) -> Result<()> {
        if self.saved {
            return Err(ImagingError::invalid("encoder has already been saved"));
        }
        Ok(())
    }

    pub fn add_frame(&mut self, frame: FrameSource) -> Result<()> {
        self.ensure_unsaved()?;
        if !self.frames.is_empty() && !self.container.supports_multiple_frames() {
            return Err(ImagingError::invalid(format!(
                "{:?} holds a single frame",
                self.container
            )));
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Container-level metadata. Only GIF and TIFF carry it.
    pub fn set_metadata(&mut self, metadata: BitmapMetadata) -> Result<()> {
        self.ensure_unsaved()?;
        if !self.container.supports_global_metadata() {
            return Err(ImagingError::invalid(format!(
                "{:?} has no container-level metadata",
                self.container
            )));
        }
        self.metadata = Some(metadata);
        Ok(())
    }

    pub fn set_palette(&mut self, palette: BitmapPalette) -> Result<()> {
        self.ensure_unsaved()?;
        if !self.container.supports_global_palette() {
            return Err(ImagingError::invalid(format!(
                "{:?} has no global palette",
                self.container
            )));
        }
        self.palette = Some(palette);
        Ok(())
    }

    pub fn set_thumbnail(&mut self, thumbnail: FrameSource) -> Result<()> {
        self.ensure_unsaved()?;
        if !self.container.supports_thumbnail() {
            return Err(ImagingError::invalid(format!(
                "{:?} has no thumbnail",
                self.container
            )));
        }
        self.thumbnail = Some(thumbnail);
        Ok(())
    }

    pub fn set_preview(&mut self, preview: FrameSource) -> Result<()> {
        self.ensure_unsaved()?;
        self.preview = Some(preview);
        Ok(())
    }

    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }

    /// Options are checked against the container when saving.
    pub fn options_mut(&mut self) -> &mut EncoderOptions {
        &mut self.options
    }

    /// Encodes everything and returns the bytes. Only once per encoder.
    pub fn save(&mut self) -> Result<Vec<u8>> {
        self.ensure_unsaved()?;
        if self.frames.is_empty() {
            return Err(ImagingError::invalid("cannot save an encoder without frames"));
        }
        if !self.options.applies_to(self.container) {
            return Err(ImagingError::invalid(format!(
                "{:?} options do not apply to {:?}",
                self.options, self.container
            )));
        }
        self.options.validate()?;
        self.saved = true;

        let bag = self.options.to_property_bag();
        let handle = EncoderHandle::create(self.codec.clone(), self.container)?;
        if let Some(palette) = &self.palette {
            handle.set_palette(palette)?;
        }
        if let Some(metadata) = &self.metadata {
            handle.set_metadata(metadata)?;
        }
        if let Some(thumbnail) = &self.thumbnail {
            handle.set_thumbnail(thumbnail)?;
        }
        if let Some(preview) = &self.preview {
            handle.set_preview(preview)?;
        }
        for frame in &self.frames {
            handle.add_frame(frame, &bag)?;
        }
        debug!(
            "BitmapEncoder: committing {} frames as {:?}",
            self.frames.len(),
            self.container
        );
        let bytes = handle.commit()?;
        info!(
            "BitmapEncoder: saved {:?}, {} bytes",
            self.container,
            bytes.len()
        );
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DecodeSource, HeadlessCodec};
    use crate::decoder::{BitmapDecoder, CacheOption, CreateOptions};
    use crate::palette::PredefinedPalette;
    use crate::pixel_format::PixelFormat;
    use test_log::test;

    fn frame(value: u8) -> FrameSource {
        FrameSource::new(2, 1, 96.0, 96.0, PixelFormat::Gray8, None, vec![value; 2], 2).unwrap()
    }

    #[test]
    fn save_round_trips_through_codec() {
        let codec = Arc::new(HeadlessCodec::new());
        let mut encoder = BitmapEncoder::new(codec.clone(), ContainerFormat::Tiff);
        encoder.add_frame(frame(1)).unwrap();
        encoder.add_frame(frame(2)).unwrap();
        let bytes = encoder.save().unwrap();
        assert_eq!(codec.open_handles(), (0, 0));

        let mut decoder = BitmapDecoder::create(
            codec,
            DecodeSource::Stream(bytes.into()),
            CreateOptions::empty(),
            CacheOption::OnLoad,
        )
        .unwrap();
        let frames = decoder.frames().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].pixels(), &[2, 2]);
    }

    #[test]
    fn save_is_once_and_needs_frames() {
        let codec = Arc::new(HeadlessCodec::new());
        let mut encoder = BitmapEncoder::new(codec, ContainerFormat::Png);
        assert!(matches!(encoder.save(), Err(ImagingError::InvalidParameter(_))));
        encoder.add_frame(frame(0)).unwrap();
        assert!(encoder.save().is_ok());
        assert!(matches!(encoder.save(), Err(ImagingError::InvalidParameter(_))));
        assert!(encoder.add_frame(frame(0)).is_err());
    }

    #[test]
    fn container_capabilities_are_enforced() {
        let codec = Arc::new(HeadlessCodec::new());
        let mut png = BitmapEncoder::new(codec.clone(), ContainerFormat::Png);
        png.add_frame(frame(0)).unwrap();
        assert!(png.add_frame(frame(1)).is_err());
        assert!(png
            .set_metadata(BitmapMetadata::new(ContainerFormat::Png))
            .is_err());
        assert!(png
            .set_palette(BitmapPalette::predefined(PredefinedPalette::Gray4))
            .is_err());
        assert!(png.set_thumbnail(frame(0)).is_err());

        let mut gif = BitmapEncoder::new(codec.clone(), ContainerFormat::Gif);
        assert!(gif
            .set_metadata(BitmapMetadata::new(ContainerFormat::Gif))
            .is_ok());
        assert!(gif
            .set_palette(BitmapPalette::predefined(PredefinedPalette::Gray4))
            .is_ok());

        let mut jpeg = BitmapEncoder::new(codec, ContainerFormat::Jpeg);
        assert!(jpeg.set_thumbnail(frame(0)).is_ok());
    }

    #[test]
    fn jpeg_options_become_named_values() {
        let codec = Arc::new(HeadlessCodec::new());
        let mut encoder = BitmapEncoder::new(codec.clone(), ContainerFormat::Jpeg);
        *encoder.options_mut() = EncoderOptions::Jpeg {
            quality: 90,
            rotation: Rotation::Rotate90,
            flip: Flip::Vertical,
        };
        encoder.add_frame(frame(0)).unwrap();
        encoder.save().unwrap();

        let bag = codec.options_log().pop().unwrap();
        assert_eq!(bag["ImageQuality"], TaggedValue::F32(0.9));
        assert_eq!(bag["BitmapTransform"], TaggedValue::U8(17));
    }

    #[test]
    fn mismatched_or_invalid_options_fail_save() {
        let codec = Arc::new(HeadlessCodec::new());
        let mut encoder = BitmapEncoder::new(codec.clone(), ContainerFormat::Png);
        encoder.add_frame(frame(0)).unwrap();
        *encoder.options_mut() = EncoderOptions::Tiff {
            compression: TiffCompression::Lzw,
        };
        assert!(encoder.save().is_err());

        let mut jpeg = BitmapEncoder::new(codec, ContainerFormat::Jpeg);
        jpeg.add_frame(frame(0)).unwrap();
        *jpeg.options_mut() = EncoderOptions::Jpeg {
            quality: 0,
            rotation: Rotation::Rotate0,
            flip: Flip::None,
        };
        assert!(jpeg.save().is_err());
    }

    #[test]
    fn wmp_and_tiff_bags() {
        let wmp = EncoderOptions::Wmp {
            image_quality: 1.0,
            lossless: true,
        };
        let bag = wmp.to_property_bag();
        assert_eq!(bag["Lossless"], TaggedValue::Bool(true));
        assert_eq!(bag["ImageQuality"], TaggedValue::F32(1.0));

        let tiff = EncoderOptions::defaults_for(ContainerFormat::Tiff, &EncoderConfig::default());
        assert_eq!(
            tiff.to_property_bag()["TiffCompressionMethod"],
            TaggedValue::U8(TiffCompression::None as u8)
        );
        assert!(EncoderOptions::None.to_property_bag().is_empty());
    }

    #[test]
    fn codec_failure_during_save_propagates() {
        let codec = Arc::new(HeadlessCodec::new());
        let mut encoder = BitmapEncoder::new(codec.clone(), ContainerFormat::Bmp);
        encoder.add_frame(frame(0)).unwrap();
        codec.inject_failure("out of disk");
        assert_eq!(
            encoder.save(),
            Err(ImagingError::CodecFailure("out of disk".into()))
        );
        assert_eq!(codec.open_handles(), (0, 0));
    }
}
