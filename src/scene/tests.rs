// src/scene/tests.rs

use super::*;
use crate::config::BitmapConfig;
use crate::double_buffer::DoubleBufferedBitmap;
use crate::pixel_format::PixelFormat;
use std::time::Duration;
use test_log::test;

const WAIT: Duration = Duration::from_secs(5);

fn desc() -> BitmapDesc {
    BitmapDesc::new(4, 2, PixelFormat::Gray8)
}

fn compositor_config() -> CompositorConfig {
    CompositorConfig {
        channel_capacity: 4,
        thread_name: "compositor-test".to_string(),
    }
}

#[test]
fn compositor_applies_and_completes_copies() {
    let channels = spawn_compositor_thread(desc(), &compositor_config()).unwrap();
    let mut bitmap =
        DoubleBufferedBitmap::with_config(desc(), &BitmapConfig::default(), Box::new(channels.binding()))
            .unwrap();

    bitmap
        .update_pixels(PixelRect::new(0, 0, 2, 1), &[10, 20], 2, 1, 1)
        .unwrap();
    assert!(bitmap.request_publish().unwrap());

    match channels.event_rx.recv_timeout(WAIT).unwrap() {
        CompositorEvent::FrameApplied { sequence, rects } => {
            assert_eq!(sequence, 1);
            assert_eq!(rects, vec![PixelRect::new(1, 1, 2, 1)]);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(bitmap.try_lock(WAIT).unwrap());
    bitmap.unlock().unwrap();

    drop(bitmap);
    let front = channels.shutdown().unwrap();
    assert_eq!(front.pixels(), &[0, 0, 0, 0, 0, 10, 20, 0]);
    assert_eq!(front.applied_sequence(), 1);
}

#[test]
fn invalidate_is_reported_back() {
    let channels = spawn_compositor_thread(desc(), &compositor_config()).unwrap();
    let mut binding = channels.binding();
    binding.invalidate(Some(PixelRect::new(0, 0, 1, 1))).unwrap();
    binding.invalidate(None).unwrap();
    assert_eq!(
        channels.event_rx.recv_timeout(WAIT).unwrap(),
        CompositorEvent::Invalidated(Some(PixelRect::new(0, 0, 1, 1)))
    );
    assert_eq!(
        channels.event_rx.recv_timeout(WAIT).unwrap(),
        CompositorEvent::Invalidated(None)
    );
    drop(binding);
    channels.shutdown().unwrap();
}

#[test]
fn mismatched_frame_reports_apply_failure() {
    let channels = spawn_compositor_thread(desc(), &compositor_config()).unwrap();
    let other = BitmapDesc::new(2, 2, PixelFormat::Gray8);
    let mut bitmap =
        DoubleBufferedBitmap::with_config(other, &BitmapConfig::default(), Box::new(channels.binding()))
            .unwrap();
    bitmap
        .update_pixels(PixelRect::new(0, 0, 1, 1), &[1], 1, 0, 0)
        .unwrap();
    bitmap.request_publish().unwrap();
    assert!(matches!(
        channels.event_rx.recv_timeout(WAIT).unwrap(),
        CompositorEvent::ApplyFailed { sequence: 1, error: ImagingError::InvalidParameter(_) }
    ));
    // The copy still completes, so the owner is not stuck.
    assert!(bitmap.try_lock(WAIT).unwrap());
    bitmap.unlock().unwrap();
    drop(bitmap);
    channels.shutdown().unwrap();
}

#[test]
fn closed_compositor_surfaces_channel_closed_and_returns_buffer() {
    let channels = spawn_compositor_thread(desc(), &compositor_config()).unwrap();
    let binding = channels.binding();
    channels.shutdown().unwrap();

    let mut bitmap =
        DoubleBufferedBitmap::with_config(desc(), &BitmapConfig::default(), Box::new(binding)).unwrap();
    assert_eq!(
        bitmap.update_pixels(PixelRect::new(0, 0, 1, 1), &[1], 1, 0, 0),
        Err(ImagingError::ChannelClosed)
    );
    assert_eq!(bitmap.lock_count(), 0);
    assert_eq!(bitmap.request_publish(), Err(ImagingError::ChannelClosed));
    // The undelivered frame was dropped, which handed the buffer back.
    assert!(bitmap.on_copy_completed());
    assert!(!bitmap.is_copy_pending());
    assert!(bitmap.is_dirty());
}

#[test]
fn null_binding_accepts_everything() {
    let mut binding = NullBinding;
    assert!(binding.changed().is_ok());
    assert!(binding.subscribe_before_commit().is_ok());
    assert!(binding.unsubscribe_before_commit().is_ok());
    assert!(binding.invalidate(None).is_ok());
}
