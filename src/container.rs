// src/container.rs

//! Maps container formats to their codec GUIDs and capabilities.

use crate::error::{ImagingError, Result};
use crate::guid::Guid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerFormat {
    Bmp,
    Png,
    Ico,
    Jpeg,
    Tiff,
    Gif,
    Wmp,
}

impl ContainerFormat {
    pub const ALL: [ContainerFormat; 7] = [
        ContainerFormat::Bmp,
        ContainerFormat::Png,
        ContainerFormat::Ico,
        ContainerFormat::Jpeg,
        ContainerFormat::Tiff,
        ContainerFormat::Gif,
        ContainerFormat::Wmp,
    ];

    pub fn guid(self) -> Guid {
        match self {
            ContainerFormat::Bmp => Guid::from_fields(
                0x0af1d87e,
                0xfcfe,
                0x4188,
                [0xbd, 0xeb, 0xa7, 0x90, 0x64, 0x71, 0xcb, 0xe3],
            ),
            ContainerFormat::Png => Guid::from_fields(
                0x1b7cfaf4,
                0x713f,
                0x473c,
                [0xbb, 0xcd, 0x61, 0x37, 0x42, 0x5f, 0xae, 0xaf],
            ),
            ContainerFormat::Ico => Guid::from_fields(
                0xa3a860c4,
                0x338f,
                0x4c17,
                [0x91, 0x9a, 0xfb, 0xa4, 0xb5, 0x62, 0x8f, 0x21],
            ),
            ContainerFormat::Jpeg => Guid::from_fields(
                0x19e4a5aa,
                0x5662,
                0x4fc5,
                [0xa0, 0xc0, 0x17, 0x58, 0x02, 0x8e, 0x10, 0x57],
            ),
            ContainerFormat::Tiff => Guid::from_fields(
                0x163bcc30,
                0xe2e9,
                0x4f0b,
                [0x96, 0x1d, 0xa3, 0xe9, 0xfd, 0xb7, 0x88, 0xa3],
            ),
            ContainerFormat::Gif => Guid::from_fields(
                0x1f8a5601,
                0x7d4d,
                0x4cbd,
                [0x9c, 0x82, 0x1b, 0xc8, 0xd4, 0xee, 0xb9, 0xa5],
            ),
            ContainerFormat::Wmp => Guid::from_fields(
                0x57a37caa,
                0x367a,
                0x4540,
                [0x91, 0x6b, 0xf1, 0x83, 0xc5, 0x09, 0x3a, 0x4b],
            ),
        }
    }

    pub fn from_guid(guid: &Guid) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.guid() == *guid)
            .ok_or_else(|| ImagingError::invalid(format!("unknown container format {}", guid)))
    }

    /// Guesses the container from a file extension, case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "bmp" | "dib" => Some(ContainerFormat::Bmp),
            "png" => Some(ContainerFormat::Png),
            "ico" => Some(ContainerFormat::Ico),
            "jpg" | "jpeg" | "jpe" | "jfif" => Some(ContainerFormat::Jpeg),
            "tif" | "tiff" => Some(ContainerFormat::Tiff),
            "gif" => Some(ContainerFormat::Gif),
            "wdp" | "jxr" | "hdp" => Some(ContainerFormat::Wmp),
            _ => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ContainerFormat::Bmp => "image/bmp",
            ContainerFormat::Png => "image/png",
            ContainerFormat::Ico => "image/x-icon",
            ContainerFormat::Jpeg => "image/jpeg",
            ContainerFormat::Tiff => "image/tiff",
            ContainerFormat::Gif => "image/gif",
            ContainerFormat::Wmp => "image/vnd.ms-photo",
        }
    }

    pub fn supports_multiple_frames(self) -> bool {
        matches!(
            self,
            ContainerFormat::Tiff | ContainerFormat::Gif | ContainerFormat::Ico
        )
    }

    pub fn supports_global_metadata(self) -> bool {
        matches!(self, ContainerFormat::Tiff | ContainerFormat::Gif)
    }

    pub fn supports_global_palette(self) -> bool {
        self == ContainerFormat::Gif
    }

    pub fn supports_thumbnail(self) -> bool {
        matches!(self, ContainerFormat::Jpeg | ContainerFormat::Wmp)
    }

    /// Root of the IFD block holding photo properties, if the container has one.
    pub fn ifd_root(self) -> Option<&'static str> {
        match self {
            ContainerFormat::Jpeg => Some("/app1/ifd"),
            ContainerFormat::Tiff | ContainerFormat::Wmp => Some("/ifd"),
            _ => None,
        }
    }
}
