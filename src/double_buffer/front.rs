// src/double_buffer/front.rs

//! Consumer-side copy of the bitmap.

use super::copy::{copy_rect, Placement};
use super::signal::PublishedFrame;
use super::BitmapDesc;
use crate::error::{ImagingError, Result};
use crate::frame::FrameSource;
use log::trace;

/// The front buffer: what the consumer last copied forward.
#[derive(Debug, Clone)]
pub struct FrontBuffer {
    desc: BitmapDesc,
    pixels: Vec<u8>,
    applied: u64,
}

impl FrontBuffer {
    pub fn new(desc: BitmapDesc) -> Result<Self> {
        let pixels = vec![0u8; desc.buffer_len()?];
        Ok(Self {
            desc,
            pixels,
            applied: 0,
        })
    }

    pub fn desc(&self) -> &BitmapDesc {
        &self.desc
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Sequence number of the last frame applied, 0 before the first.
    pub fn applied_sequence(&self) -> u64 {
        self.applied
    }

    /// Copies the dirty rects of `frame` into this buffer.
    pub fn apply(&mut self, frame: &PublishedFrame) -> Result<()> {
        let desc = &self.desc;
        if frame.width() != desc.width
            || frame.height() != desc.height
            || frame.format() != desc.format
            || frame.stride() != desc.stride()
        {
            return Err(ImagingError::invalid(format!(
                "published {}x{} {:?} does not match front buffer {}x{} {:?}",
                frame.width(),
                frame.height(),
                frame.format(),
                desc.width,
                desc.height,
                desc.format
            )));
        }
        if frame.pixels().len() < self.pixels.len() {
            return Err(ImagingError::BufferTooSmall {
                required: self.pixels.len(),
                actual: frame.pixels().len(),
            });
        }
        let stride = desc.stride();
        let bpp = desc.format.bits_per_pixel();
        for rect in frame.dirty_rects() {
            let at = Placement {
                x: rect.x as u32,
                y: rect.y as u32,
                stride,
            };
            copy_rect(
                frame.pixels(),
                at,
                &mut self.pixels,
                at,
                rect.width as u32,
                rect.height as u32,
                bpp,
            );
        }
        self.applied = frame.sequence();
        trace!(
            "FrontBuffer: applied publish {} ({} rects)",
            frame.sequence(),
            frame.dirty_rects().len()
        );
        Ok(())
    }

    /// An immutable frame of the current contents.
    pub fn snapshot(&self) -> Result<FrameSource> {
        let desc = &self.desc;
        FrameSource::new(
            desc.width,
            desc.height,
            desc.dpi_x,
            desc.dpi_y,
            desc.format,
            desc.palette.clone(),
            self.pixels.clone(),
            desc.stride(),
        )
    }
}
