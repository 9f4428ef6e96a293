// src/double_buffer/signal.rs

//! Copy-completion signal and the frame handed to the consumer.
//!
//! Publishing moves the back buffer out of the bitmap into a
//! [`PublishedFrame`]. The consumer copies what it needs and hands the
//! buffer back through the frame's [`CompletionSignal`], which wakes any
//! owner blocked in `lock`. The buffer travels with the signal, so it is
//! only ever reachable from one side at a time.

use crate::geometry::PixelRect;
use crate::pixel_format::PixelFormat;
use log::{debug, trace};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Manual-reset event carrying the returned back buffer.
///
/// Cloning duplicates the handle. Every clone refers to the same event and
/// keeps it alive on its own, so either side may outlive the other.
#[derive(Debug, Clone, Default)]
pub struct CompletionSignal {
    inner: Arc<(Mutex<Option<Box<[u8]>>>, Condvar)>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Box<[u8]>>> {
        self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns `buffer` to the owner and wakes it.
    pub fn signal_with(&self, buffer: Box<[u8]>) {
        *self.slot() = Some(buffer);
        self.inner.1.notify_all();
    }

    pub fn is_signaled(&self) -> bool {
        self.slot().is_some()
    }

    /// Takes the returned buffer without blocking.
    pub fn take(&self) -> Option<Box<[u8]>> {
        self.slot().take()
    }

    /// Blocks until the buffer comes back, or `timeout` elapses.
    ///
    /// `None` waits without limit.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<Box<[u8]>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.slot();
        loop {
            if let Some(buffer) = slot.take() {
                return Some(buffer);
            }
            slot = match deadline {
                None => self.inner.1.wait(slot).unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.inner
                        .1
                        .wait_timeout(slot, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }
    }

    /// Number of live handles to this event.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

/// A published back buffer, owned by the consumer until completed.
///
/// Dropping a frame without calling [`complete`](Self::complete) still
/// returns the buffer, so the owner cannot be left waiting forever.
#[derive(Debug)]
pub struct PublishedFrame {
    buffer: Option<Box<[u8]>>,
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    dirty: Vec<PixelRect>,
    signal: CompletionSignal,
    sequence: u64,
}

impl PublishedFrame {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        buffer: Box<[u8]>,
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
        dirty: Vec<PixelRect>,
        signal: CompletionSignal,
        sequence: u64,
    ) -> Self {
        Self {
            buffer: Some(buffer),
            width,
            height,
            stride,
            format,
            dirty,
            signal,
            sequence,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
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

    /// Rects written since the previous publish.
    pub fn dirty_rects(&self) -> &[PixelRect] {
        &self.dirty
    }

    /// Publish counter of the owning bitmap, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// A duplicate of the completion handle.
    pub fn signal(&self) -> CompletionSignal {
        self.signal.clone()
    }

    /// Hands the buffer back to the owner.
    pub fn complete(mut self) {
        if let Some(buffer) = self.buffer.take() {
            trace!("PublishedFrame: completing publish {}", self.sequence);
            self.signal.signal_with(buffer);
        }
    }
}

impl Drop for PublishedFrame {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            debug!(
                "PublishedFrame: publish {} dropped without completion, returning buffer",
                self.sequence
            );
            self.signal.signal_with(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(signal: &CompletionSignal) -> PublishedFrame {
        PublishedFrame::new(
            vec![7u8; 4].into_boxed_slice(),
            1,
            1,
            4,
            PixelFormat::Bgra32,
            vec![PixelRect::new(0, 0, 1, 1)],
            signal.clone(),
            1,
        )
    }

    #[test]
    fn complete_returns_buffer() {
        let signal = CompletionSignal::new();
        let published = frame(&signal);
        assert!(!signal.is_signaled());
        published.complete();
        assert_eq!(signal.take().as_deref(), Some(&[7u8; 4][..]));
        assert!(signal.take().is_none());
    }

    #[test]
    fn drop_returns_buffer() {
        let signal = CompletionSignal::new();
        drop(frame(&signal));
        assert!(signal.is_signaled());
    }

    #[test]
    fn wait_times_out_without_signal() {
        let signal = CompletionSignal::new();
        assert!(signal.wait(Some(Duration::ZERO)).is_none());
        assert!(signal.wait(Some(Duration::from_millis(5))).is_none());
    }

    #[test]
    fn wait_wakes_on_other_thread() {
        let signal = CompletionSignal::new();
        let published = frame(&signal);
        let worker = thread::spawn(move || published.complete());
        assert!(signal.wait(None).is_some());
        worker.join().unwrap();
    }

    #[test]
    fn duplicate_handle_outlives_original() {
        let signal = CompletionSignal::new();
        let published = frame(&signal);
        assert_eq!(signal.handle_count(), 2);
        let duplicate = published.signal();
        drop(signal);
        published.complete();
        assert!(duplicate.take().is_some());
    }
}
