// src/interop.rs

//! Bitmap over memory the caller owns and writes directly.
//!
//! There is no back buffer and no copy protocol. The caller changes the
//! shared memory however it likes and then calls [`InteropBitmap::invalidate`]
//! so the scene re-reads the affected region.

use crate::error::{ImagingError, Result};
use crate::frame::{checked_buffer_len, validate_layout, FrameSource, DEFAULT_DPI};
use crate::geometry::PixelRect;
use crate::pixel_format::{validate_stride, PixelFormat};
use crate::scene::SceneBinding;
use log::{debug, warn};
use std::sync::{Arc, Mutex};

/// Memory shared between the caller and the bitmap.
pub type SharedMemory = Arc<Mutex<Vec<u8>>>;

pub struct InteropBitmap {
    memory: SharedMemory,
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    binding: Box<dyn SceneBinding>,
}

impl InteropBitmap {
    pub fn new(
        memory: SharedMemory,
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
        binding: Box<dyn SceneBinding>,
    ) -> Result<Self> {
        if format.is_palettized() {
            return Err(ImagingError::invalid(format!(
                "interop bitmaps cannot use palettized {:?}",
                format
            )));
        }
        validate_layout(width, height, DEFAULT_DPI, DEFAULT_DPI, format, None)?;
        validate_stride(format, width, stride)?;
        let required = checked_buffer_len(stride, height)?;
        let actual = memory.lock().unwrap_or_else(|e| e.into_inner()).len();
        if actual < required {
            return Err(ImagingError::BufferTooSmall { required, actual });
        }
        Ok(Self {
            memory,
            width,
            height,
            stride,
            format,
            binding,
        })
    }

    /// Tells the scene that `region` changed. `None` means the whole bitmap.
    pub fn invalidate(&mut self, region: Option<PixelRect>) -> Result<()> {
        if let Some(rect) = region {
            if let Err(e) = rect.validate_within(self.width, self.height, "invalidate rect") {
                warn!("InteropBitmap: {}", e);
                return Err(e);
            }
            if rect.is_empty() {
                return Ok(());
            }
        }
        debug!("InteropBitmap: invalidate {:?}", region);
        self.binding.invalidate(region)
    }

    /// Copies the current memory into an immutable frame.
    pub fn snapshot(&self) -> Result<FrameSource> {
        let pixels = self
            .memory
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        FrameSource::new(
            self.width,
            self.height,
            DEFAULT_DPI,
            DEFAULT_DPI,
            self.format,
            None,
            pixels,
            self.stride,
        )
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::double_buffer::PublishedFrame;

    #[derive(Default)]
    struct Invalidations(Arc<Mutex<Vec<Option<PixelRect>>>>);

    impl SceneBinding for Invalidations {
        fn changed(&mut self) -> Result<()> {
            Ok(())
        }
        fn subscribe_before_commit(&mut self) -> Result<()> {
            Ok(())
        }
        fn unsubscribe_before_commit(&mut self) -> Result<()> {
            Ok(())
        }
        fn invalidate(&mut self, region: Option<PixelRect>) -> Result<()> {
            self.0.lock().unwrap().push(region);
            Ok(())
        }
        fn copy_forward(&mut self, frame: PublishedFrame) -> Result<()> {
            frame.complete();
            Ok(())
        }
    }

    #[test]
    fn invalidate_forwards_valid_regions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let memory: SharedMemory = Arc::new(Mutex::new(vec![0u8; 32]));
        let mut bitmap = InteropBitmap::new(
            memory.clone(),
            4,
            2,
            16,
            PixelFormat::Bgra32,
            Box::new(Invalidations(seen.clone())),
        )
        .unwrap();

        memory.lock().unwrap()[0] = 42;
        bitmap.invalidate(Some(PixelRect::new(0, 0, 1, 1))).unwrap();
        bitmap.invalidate(None).unwrap();
        bitmap.invalidate(Some(PixelRect::new(0, 0, 0, 0))).unwrap();
        assert!(bitmap.invalidate(Some(PixelRect::new(3, 0, 2, 1))).is_err());

        assert_eq!(*seen.lock().unwrap(), vec![Some(PixelRect::new(0, 0, 1, 1)), None]);
        assert_eq!(bitmap.snapshot().unwrap().pixels()[0], 42);
    }

    #[test]
    fn rejects_short_memory_and_palettized_formats() {
        let memory: SharedMemory = Arc::new(Mutex::new(vec![0u8; 31]));
        assert!(matches!(
            InteropBitmap::new(memory, 4, 2, 16, PixelFormat::Bgra32, Box::new(Invalidations::default())),
            Err(ImagingError::BufferTooSmall { required: 32, actual: 31 })
        ));
        let memory: SharedMemory = Arc::new(Mutex::new(vec![0u8; 8]));
        assert!(InteropBitmap::new(memory, 8, 8, 1, PixelFormat::Indexed1, Box::new(Invalidations::default())).is_err());
    }

    #[test]
    fn overflowing_stride_is_invalid() {
        let memory: SharedMemory = Arc::new(Mutex::new(vec![0u8; 32]));
        assert!(matches!(
            InteropBitmap::new(memory, 4, 2, usize::MAX, PixelFormat::Bgra32, Box::new(Invalidations::default())),
            Err(ImagingError::InvalidParameter(_))
        ));
    }
}
