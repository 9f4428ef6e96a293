use imaging_bridge::config::{BitmapConfig, CompositorConfig};
use imaging_bridge::scene::{spawn_compositor_thread, CompositorEvent};
use imaging_bridge::{BitmapDesc, DoubleBufferedBitmap, ImagingError, PixelFormat, PixelRect};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn compositor_config() -> CompositorConfig {
    CompositorConfig {
        channel_capacity: 1,
        thread_name: "compositor-it".to_string(),
    }
}

/// Owner thread writes a diagonal of pixels, publishing after each, while
/// the compositor copies forward. The front buffer must end up equal to
/// the frozen back buffer.
#[test_log::test]
fn owner_and_compositor_agree_after_many_publishes() {
    let desc = BitmapDesc::new(16, 16, PixelFormat::Bgra32);
    let channels = spawn_compositor_thread(desc.clone(), &compositor_config()).unwrap();
    let binding = channels.binding();

    let owner = thread::Builder::new()
        .name("owner".to_string())
        .spawn(move || {
            let mut bitmap =
                DoubleBufferedBitmap::with_config(desc, &BitmapConfig::default(), Box::new(binding))
                    .unwrap();
            for i in 0..16 {
                bitmap.lock_timeout(WAIT).unwrap();
                let px = [i as u8, 0x80, 0xFF - i as u8, 0xFF];
                bitmap
                    .write_pixels(PixelRect::new(0, 0, 1, 1), &px, 4, i, i)
                    .unwrap();
                bitmap.unlock().unwrap();
                assert!(bitmap.request_publish().unwrap());
            }
            bitmap.lock_timeout(WAIT).unwrap();
            bitmap.unlock().unwrap();
            bitmap.freeze().unwrap()
        })
        .unwrap();

    let frozen = owner.join().unwrap();

    let mut applied = Vec::new();
    while let Ok(event) = channels.event_rx.recv_timeout(Duration::from_millis(200)) {
        match event {
            CompositorEvent::FrameApplied { sequence, .. } => applied.push(sequence),
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(applied, (1..=16).collect::<Vec<u64>>());

    let front = channels.shutdown().unwrap();
    assert_eq!(front.snapshot().unwrap().pixels(), frozen.pixels());
}

/// Publish, fail to relock immediately, then relock once the compositor
/// has finished with the buffer.
#[test_log::test]
fn relock_waits_for_compositor() {
    let desc = BitmapDesc::new(4, 4, PixelFormat::Bgra32);
    let channels = spawn_compositor_thread(desc.clone(), &compositor_config()).unwrap();
    let mut bitmap =
        DoubleBufferedBitmap::with_config(desc, &BitmapConfig::default(), Box::new(channels.binding()))
            .unwrap();

    assert!(bitmap.try_lock(Duration::ZERO).unwrap());
    bitmap
        .write_pixels(PixelRect::new(0, 0, 2, 2), &[0xFF; 16], 8, 0, 0)
        .unwrap();
    bitmap.unlock().unwrap();
    assert!(bitmap.request_publish().unwrap());
    assert!(!bitmap.is_dirty());
    assert!(bitmap.is_copy_pending());

    assert!(matches!(
        channels.event_rx.recv_timeout(WAIT).unwrap(),
        CompositorEvent::FrameApplied { sequence: 1, .. }
    ));
    assert!(bitmap.on_copy_completed());
    assert!(bitmap.try_lock(Duration::ZERO).unwrap());
    bitmap.unlock().unwrap();

    let frozen = bitmap.freeze().unwrap();
    assert_eq!(
        bitmap.write_pixels(PixelRect::new(0, 0, 1, 1), &[0; 4], 4, 0, 0),
        Err(ImagingError::FrozenBitmap)
    );
    drop(bitmap);
    let front = channels.shutdown().unwrap();
    assert_eq!(front.pixels(), frozen.pixels());
}
