// src/double_buffer/mod.rs

//! Double-buffered bitmap shared between an owner thread and a consumer.
//!
//! The owner locks the bitmap, writes into the back buffer, marks what it
//! touched dirty and unlocks. When the scene binding is ready to commit a
//! batch it calls [`DoubleBufferedBitmap::request_publish`], which moves the
//! back buffer to the consumer along with the dirty rects and a duplicate of
//! the completion signal. The consumer copies the rects into its
//! [`FrontBuffer`] and completes the frame, which hands the back buffer back.
//!
//! Ownership of the back buffer is the synchronization: while a copy is
//! pending the bitmap simply does not hold the buffer, so there is nothing
//! for the owner to overwrite. `lock` waits for it to come back.
//!
//! - `copy`: strided, bit-aware rect copies
//! - `dirty`: dirty rect accumulation
//! - `signal`: completion signal and `PublishedFrame`
//! - `front`: the consumer's copy

pub mod copy;
pub mod dirty;
pub mod front;
pub mod signal;


pub use dirty::DirtyRegion;
pub use front::FrontBuffer;
pub use signal::{CompletionSignal, PublishedFrame};

use crate::config::{BitmapConfig, CONFIG};
use crate::error::{ImagingError, Result};
use crate::frame::{checked_buffer_len, validate_layout, FrameSource};
use crate::geometry::PixelRect;
use crate::palette::BitmapPalette;
use crate::pixel_format::PixelFormat;
use crate::scene::SceneBinding;
use copy::{check_buffer, copy_rect, Placement};
use log::{debug, info, trace, warn};
use std::time::Duration;

/// Fixed geometry of a double-buffered bitmap. Both buffers share it.
#[derive(Debug, Clone, PartialEq)]
pub struct BitmapDesc {
    pub width: u32,
    pub height: u32,
    pub dpi_x: f64,
    pub dpi_y: f64,
    pub format: PixelFormat,
    pub palette: Option<BitmapPalette>,
}

impl BitmapDesc {
    /// A description at the configured default DPI, without a palette.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let dpi = CONFIG.bitmap.default_dpi;
        Self {
            width,
            height,
            dpi_x: dpi,
            dpi_y: dpi,
            format,
            palette: None,
        }
    }

    pub fn with_dpi(mut self, dpi_x: f64, dpi_y: f64) -> Self {
        self.dpi_x = dpi_x;
        self.dpi_y = dpi_y;
        self
    }

    pub fn with_palette(mut self, palette: BitmapPalette) -> Self {
        self.palette = Some(palette);
        self
    }

    pub fn of_frame(source: &FrameSource) -> Self {
        let (dpi_x, dpi_y) = source.dpi();
        Self {
            width: source.width(),
            height: source.height(),
            dpi_x,
            dpi_y,
            format: source.format(),
            palette: source.palette().cloned(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_layout(
            self.width,
            self.height,
            self.dpi_x,
            self.dpi_y,
            self.format,
            self.palette.as_ref(),
        )?;
        self.buffer_len().map(|_| ())
    }

    /// Row pitch of both buffers: the format's minimum stride.
    pub fn stride(&self) -> usize {
        self.format.min_stride(self.width)
    }

    /// Size of one buffer; fails when the geometry cannot be addressed.
    pub fn buffer_len(&self) -> Result<usize> {
        checked_buffer_len(self.stride(), self.height)
    }

    pub fn bounds(&self) -> PixelRect {
        PixelRect::full(self.width, self.height)
    }
}

#[derive(Debug)]
enum CopyState {
    Idle,
    /// The back buffer is with the consumer until this signal fires.
    Pending(CompletionSignal),
}

pub struct DoubleBufferedBitmap {
    desc: BitmapDesc,
    back_buffer: Option<Box<[u8]>>,
    dirty: DirtyRegion,
    lock_count: u32,
    copy: CopyState,
    subscribed: bool,
    publish_count: u64,
    frozen: Option<FrameSource>,
    write_timeout: Duration,
    binding: Box<dyn SceneBinding>,
}

impl std::fmt::Debug for DoubleBufferedBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoubleBufferedBitmap")
            .field("desc", &self.desc)
            .field("lock_count", &self.lock_count)
            .field("dirty", &self.dirty.rects())
            .field("copy", &self.copy)
            .field("frozen", &self.frozen.is_some())
            .finish()
    }
}

impl DoubleBufferedBitmap {
    /// Creates a zero-filled bitmap using the global bitmap configuration.
    pub fn new(desc: BitmapDesc, binding: Box<dyn SceneBinding>) -> Result<Self> {
        Self::with_config(desc, &CONFIG.bitmap, binding)
    }

    pub fn with_config(
        desc: BitmapDesc,
        config: &BitmapConfig,
        binding: Box<dyn SceneBinding>,
    ) -> Result<Self> {
        desc.validate()?;
        let back_buffer = vec![0u8; desc.buffer_len()?].into_boxed_slice();
        info!(
            "DoubleBufferedBitmap: created {}x{} {:?}",
            desc.width, desc.height, desc.format
        );
        Ok(Self {
            desc,
            back_buffer: Some(back_buffer),
            dirty: DirtyRegion::new(config.max_dirty_rects),
            lock_count: 0,
            copy: CopyState::Idle,
            subscribed: false,
            publish_count: 0,
            frozen: None,
            write_timeout: config.default_lock_timeout(),
            binding,
        })
    }

    /// Creates a bitmap holding a copy of `source`.
    ///
    /// The whole surface starts dirty so the first publish carries it.
    pub fn from_source(source: &FrameSource, binding: Box<dyn SceneBinding>) -> Result<Self> {
        let mut bitmap = Self::new(BitmapDesc::of_frame(source), binding)?;
        let stride = bitmap.desc.stride();
        bitmap.lock()?;
        let copied = match bitmap.back_buffer.as_deref_mut() {
            Some(back) => source.copy_pixels(None, stride, back),
            None => Err(ImagingError::AlreadyPublishing),
        };
        if copied.is_ok() {
            bitmap.dirty.add(bitmap.desc.bounds());
        }
        bitmap.unlock()?;
        copied.map(|_| bitmap)
    }

    // --- Lock discipline ---

    /// Acquires the lock, waiting up to `timeout` for a pending copy.
    ///
    /// Returns `Ok(false)` on timeout, leaving the bitmap unchanged. Nested
    /// calls only bump the count.
    pub fn try_lock(&mut self, timeout: Duration) -> Result<bool> {
        self.ensure_not_frozen("lock")?;
        if self.lock_count == 0 && !self.reclaim(Some(timeout)) {
            trace!(
                "DoubleBufferedBitmap: lock timed out after {:?}, copy still pending",
                timeout
            );
            return Ok(false);
        }
        self.lock_count += 1;
        trace!("DoubleBufferedBitmap: locked (depth {})", self.lock_count);
        Ok(true)
    }

    /// Like [`try_lock`](Self::try_lock), but a timeout is an error.
    pub fn lock_timeout(&mut self, timeout: Duration) -> Result<()> {
        if self.try_lock(timeout)? {
            Ok(())
        } else {
            Err(ImagingError::Timeout(timeout))
        }
    }

    /// Acquires the lock, waiting as long as the copy takes.
    pub fn lock(&mut self) -> Result<()> {
        self.ensure_not_frozen("lock")?;
        if self.lock_count == 0 {
            self.reclaim(None);
        }
        self.lock_count += 1;
        trace!("DoubleBufferedBitmap: locked (depth {})", self.lock_count);
        Ok(())
    }

    /// Releases one level of lock.
    ///
    /// The outermost unlock of a dirty bitmap subscribes to the binding's
    /// before-commit notification and reports the change. Publishing waits
    /// for the binding to call `request_publish`.
    pub fn unlock(&mut self) -> Result<()> {
        self.ensure_not_frozen("unlock")?;
        if self.lock_count == 0 {
            warn!("DoubleBufferedBitmap: unlock without a matching lock");
            return Err(ImagingError::NotLocked);
        }
        self.lock_count -= 1;
        trace!("DoubleBufferedBitmap: unlocked (depth {})", self.lock_count);
        if self.lock_count == 0 && !self.dirty.is_empty() {
            if !self.subscribed {
                self.binding.subscribe_before_commit()?;
                self.subscribed = true;
            }
            self.binding.changed()?;
        }
        Ok(())
    }

    // --- Writes ---

    /// Marks `rect` as changed. Requires the lock.
    pub fn add_dirty_rect(&mut self, rect: PixelRect) -> Result<()> {
        self.ensure_writable("add_dirty_rect")?;
        if rect.has_negative_component() {
            return Err(ImagingError::invalid(format!(
                "dirty rect {:?} has a negative component",
                rect
            )));
        }
        if rect.is_empty() {
            return Ok(());
        }
        rect.validate_within(self.desc.width, self.desc.height, "dirty rect")?;
        self.dirty.add(rect);
        Ok(())
    }

    /// Copies `source_rect` of `buffer` to (`dest_x`, `dest_y`) and marks it
    /// dirty. Requires the lock.
    ///
    /// Everything is validated before the first byte moves.
    pub fn write_pixels(
        &mut self,
        source_rect: PixelRect,
        buffer: &[u8],
        stride: usize,
        dest_x: i32,
        dest_y: i32,
    ) -> Result<()> {
        self.ensure_writable("write_pixels")?;
        let dest = PixelRect::new(dest_x, dest_y, source_rect.width, source_rect.height);
        if source_rect.has_negative_component() || dest.has_negative_component() {
            return Err(ImagingError::invalid(format!(
                "write of {:?} to ({}, {}) has a negative component",
                source_rect, dest_x, dest_y
            )));
        }
        dest.validate_within(self.desc.width, self.desc.height, "destination rect")?;
        if source_rect.is_empty() {
            return Ok(());
        }
        let bpp = self.desc.format.bits_per_pixel();
        check_buffer(&source_rect, stride, buffer.len(), bpp)?;

        let back_stride = self.desc.stride();
        let back = self
            .back_buffer
            .as_deref_mut()
            .ok_or(ImagingError::AlreadyPublishing)?;
        copy_rect(
            buffer,
            Placement {
                x: source_rect.x as u32,
                y: source_rect.y as u32,
                stride,
            },
            back,
            Placement {
                x: dest_x as u32,
                y: dest_y as u32,
                stride: back_stride,
            },
            source_rect.width as u32,
            source_rect.height as u32,
            bpp,
        );
        self.dirty.add(dest);
        trace!("DoubleBufferedBitmap: wrote {:?}", dest);
        Ok(())
    }

    /// Locks, writes and unlocks in one call, restoring the prior lock depth.
    ///
    /// Waits up to the configured default lock timeout for a pending copy.
    pub fn update_pixels(
        &mut self,
        source_rect: PixelRect,
        buffer: &[u8],
        stride: usize,
        dest_x: i32,
        dest_y: i32,
    ) -> Result<()> {
        self.lock_timeout(self.write_timeout)?;
        let written = self.write_pixels(source_rect, buffer, stride, dest_x, dest_y);
        let unlocked = self.unlock();
        written.and(unlocked)
    }

    /// Direct access to the back buffer. Requires the lock.
    ///
    /// Writes made here must be reported with [`add_dirty_rect`](Self::add_dirty_rect).
    pub fn back_buffer_mut(&mut self) -> Result<&mut [u8]> {
        self.ensure_writable("back_buffer_mut")?;
        self.back_buffer
            .as_deref_mut()
            .ok_or(ImagingError::AlreadyPublishing)
    }

    pub fn back_buffer_stride(&self) -> usize {
        self.desc.stride()
    }

    // --- Publishing ---

    /// Hands the dirty rects and the back buffer to the binding.
    ///
    /// Returns `Ok(false)` without doing anything when the bitmap is locked,
    /// clean, or a previous copy is still pending.
    pub fn request_publish(&mut self) -> Result<bool> {
        self.ensure_not_frozen("request_publish")?;
        if self.lock_count > 0 {
            trace!("DoubleBufferedBitmap: publish skipped, bitmap locked");
            return Ok(false);
        }
        if matches!(self.copy, CopyState::Pending(_)) {
            debug!("DoubleBufferedBitmap: publish skipped, previous copy still pending");
            return Ok(false);
        }
        if self.dirty.is_empty() {
            return Ok(false);
        }
        let Some(buffer) = self.back_buffer.take() else {
            return Err(ImagingError::AlreadyPublishing);
        };

        let rects = self.dirty.rects().to_vec();
        let signal = CompletionSignal::new();
        self.publish_count += 1;
        debug!(
            "DoubleBufferedBitmap: publish {} of {} rects",
            self.publish_count,
            rects.len()
        );
        let frame = PublishedFrame::new(
            buffer,
            self.desc.width,
            self.desc.height,
            self.desc.stride(),
            self.desc.format,
            rects,
            signal.clone(),
            self.publish_count,
        );
        self.copy = CopyState::Pending(signal);
        if let Err(e) = self.binding.copy_forward(frame) {
            // Not accepted: the dirt stays for the next publish and a
            // dropped frame has already handed the buffer back.
            warn!(
                "DoubleBufferedBitmap: copy forward of publish {} failed: {}",
                self.publish_count, e
            );
            self.reclaim(Some(Duration::ZERO));
            return Err(e);
        }
        self.dirty.take();
        if self.subscribed {
            match self.binding.unsubscribe_before_commit() {
                Ok(()) => self.subscribed = false,
                Err(e) => warn!("DoubleBufferedBitmap: unsubscribe after publish failed: {}", e),
            }
        }
        Ok(true)
    }

    /// Reclaims the back buffer if the consumer has finished with it.
    ///
    /// Never blocks. Returns true when the back buffer is available.
    pub fn on_copy_completed(&mut self) -> bool {
        if self.frozen.is_some() {
            return false;
        }
        self.reclaim(Some(Duration::ZERO))
    }

    fn reclaim(&mut self, timeout: Option<Duration>) -> bool {
        let CopyState::Pending(signal) = &self.copy else {
            return true;
        };
        match signal.wait(timeout) {
            Some(buffer) => {
                self.back_buffer = Some(buffer);
                self.copy = CopyState::Idle;
                debug!(
                    "DoubleBufferedBitmap: copy {} completed, back buffer reclaimed",
                    self.publish_count
                );
                true
            }
            None => false,
        }
    }

    // --- Freeze ---

    /// Turns the bitmap into an immutable frame. One way.
    ///
    /// Fails with `LockHeld` while locked and with `AlreadyPublishing` while
    /// the consumer still has the back buffer. Freezing again returns the
    /// same frame.
    pub fn freeze(&mut self) -> Result<FrameSource> {
        if let Some(frame) = &self.frozen {
            return Ok(frame.clone());
        }
        if self.lock_count > 0 {
            warn!("DoubleBufferedBitmap: freeze while locked");
            return Err(ImagingError::LockHeld);
        }
        if !self.reclaim(Some(Duration::ZERO)) {
            return Err(ImagingError::AlreadyPublishing);
        }
        let buffer = self
            .back_buffer
            .take()
            .ok_or(ImagingError::AlreadyPublishing)?;
        let desc = &self.desc;
        let frame = FrameSource::new(
            desc.width,
            desc.height,
            desc.dpi_x,
            desc.dpi_y,
            desc.format,
            desc.palette.clone(),
            buffer,
            desc.stride(),
        )?;
        self.dirty.take();
        self.frozen = Some(frame.clone());
        if self.subscribed {
            match self.binding.unsubscribe_before_commit() {
                Ok(()) => self.subscribed = false,
                Err(e) => warn!("DoubleBufferedBitmap: unsubscribe on freeze failed: {}", e),
            }
        }
        info!(
            "DoubleBufferedBitmap: frozen after {} publishes",
            self.publish_count
        );
        Ok(frame)
    }

    // --- Accessors ---

    pub fn desc(&self) -> &BitmapDesc {
        &self.desc
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn format(&self) -> PixelFormat {
        self.desc.format
    }

    pub fn dpi(&self) -> (f64, f64) {
        (self.desc.dpi_x, self.desc.dpi_y)
    }

    pub fn lock_count(&self) -> u32 {
        self.lock_count
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_rects(&self) -> &[PixelRect] {
        self.dirty.rects()
    }

    pub fn is_copy_pending(&self) -> bool {
        matches!(self.copy, CopyState::Pending(_))
    }

    /// True while the binding's before-commit notification is wanted.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn publish_count(&self) -> u64 {
        self.publish_count
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    fn ensure_not_frozen(&self, op: &str) -> Result<()> {
        if self.frozen.is_some() {
            warn!("DoubleBufferedBitmap: {} on frozen bitmap", op);
            return Err(ImagingError::FrozenBitmap);
        }
        Ok(())
    }

    fn ensure_writable(&self, op: &str) -> Result<()> {
        self.ensure_not_frozen(op)?;
        if self.lock_count == 0 {
            warn!("DoubleBufferedBitmap: {} without lock", op);
            return Err(ImagingError::NotLocked);
        }
        Ok(())
    }
}

impl Drop for DoubleBufferedBitmap {
    fn drop(&mut self) {
        if self.subscribed {
            let _ = self.binding.unsubscribe_before_commit();
        }
    }
}
