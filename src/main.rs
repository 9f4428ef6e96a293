// src/main.rs

//! Headless demo: an owner thread animating a double-buffered bitmap while
//! a compositor thread copies each published frame forward.

use imaging_bridge::cache::BitmapCache;
use imaging_bridge::codec::headless::StoredImage;
use imaging_bridge::codec::{DecodeSource, HeadlessCodec};
use imaging_bridge::config::CONFIG;
use imaging_bridge::container::ContainerFormat;
use imaging_bridge::decoder::{decode_in_background, BitmapDecoder, CacheOption, CreateOptions, DecodeEvent};
use imaging_bridge::encoder::BitmapEncoder;
use imaging_bridge::scene::{spawn_compositor_thread, CompositorEvent};
use imaging_bridge::{BitmapDesc, DoubleBufferedBitmap, FrameSource, PixelFormat, PixelRect};

use anyhow::{bail, Context};
use log::{info, warn};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

const DEMO_URI: &str = "mem://gradient.png";
const DEMO_WIDTH: u32 = 64;
const DEMO_HEIGHT: u32 = 32;
const DEMO_FRAMES: u32 = 8;
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A horizontal gray ramp in Bgra32.
fn gradient() -> anyhow::Result<FrameSource> {
    let stride = PixelFormat::Bgra32.min_stride(DEMO_WIDTH);
    let mut pixels = vec![0u8; stride * DEMO_HEIGHT as usize];
    for row in pixels.chunks_mut(stride) {
        for (x, px) in row.chunks_mut(4).enumerate() {
            let level = (x * 255 / (DEMO_WIDTH as usize - 1)) as u8;
            px.copy_from_slice(&[level, level, level, 0xFF]);
        }
    }
    FrameSource::new(
        DEMO_WIDTH,
        DEMO_HEIGHT,
        CONFIG.bitmap.default_dpi,
        CONFIG.bitmap.default_dpi,
        PixelFormat::Bgra32,
        None,
        pixels,
        stride,
    )
    .context("Failed to build gradient frame")
}

fn main() -> anyhow::Result<()> {
    // Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting imaging-bridge demo...");

    let codec = Arc::new(HeadlessCodec::new());
    codec.insert_image(DEMO_URI, StoredImage::new(ContainerFormat::Png, vec![gradient()?]));

    let cache = CONFIG
        .cache
        .enabled
        .then(|| Arc::new(BitmapCache::new(CONFIG.cache.capacity)));
    let mut decoder = BitmapDecoder::create_with_cache(
        codec.clone(),
        DecodeSource::Uri(DEMO_URI.to_string()),
        CreateOptions::empty(),
        CacheOption::OnLoad,
        cache,
    )
    .context("Failed to decode demo image")?;
    let source = decoder.frame(0).context("Demo image has no frames")?;

    // --- Compositor and bitmap ---
    let channels = spawn_compositor_thread(BitmapDesc::of_frame(&source), &CONFIG.compositor)?;
    let mut bitmap = DoubleBufferedBitmap::from_source(&source, Box::new(channels.binding()))
        .context("Failed to create double-buffered bitmap")?;

    // --- Owner loop: commit, wait for the copy, draw the next frame ---
    let bar_width = (DEMO_WIDTH / DEMO_FRAMES) as i32;
    let bar = vec![0xFFu8; bar_width as usize * 4 * DEMO_HEIGHT as usize];
    for frame in 0..DEMO_FRAMES {
        if bitmap.is_subscribed() && !bitmap.request_publish()? {
            warn!("Demo: nothing published for frame {}", frame);
        }
        match channels.event_rx.recv_timeout(EVENT_TIMEOUT) {
            Ok(CompositorEvent::FrameApplied { sequence, rects }) => {
                info!("Demo: compositor applied publish {} ({} rects)", sequence, rects.len());
            }
            Ok(other) => bail!("Unexpected compositor event: {:?}", other),
            Err(e) => bail!("Compositor did not answer: {}", e),
        }

        bitmap
            .lock_timeout(CONFIG.bitmap.default_lock_timeout())
            .context("Back buffer never came back")?;
        bitmap.write_pixels(
            PixelRect::new(0, 0, bar_width, DEMO_HEIGHT as i32),
            &bar,
            bar_width as usize * 4,
            frame as i32 * bar_width,
            0,
        )?;
        bitmap.unlock()?;
    }

    // Last frame, then stop double buffering.
    bitmap.request_publish()?;
    if let Ok(event) = channels.event_rx.recv_timeout(EVENT_TIMEOUT) {
        info!("Demo: final event {:?}", event);
    }
    let frozen = bitmap.freeze().context("Failed to freeze bitmap")?;
    drop(bitmap);
    let front = channels.shutdown()?;
    if front.pixels() != frozen.pixels() {
        bail!("Front buffer diverged from the frozen bitmap");
    }
    info!("Demo: front buffer matches after {} frames", DEMO_FRAMES);

    // --- Encode the result and decode it back in the background ---
    let mut encoder = BitmapEncoder::new(codec.clone(), ContainerFormat::Png);
    encoder.add_frame(frozen)?;
    let bytes = encoder.save().context("Failed to encode result")?;
    info!("Demo: encoded {} bytes", bytes.len());

    let (tx, rx) = channel();
    let worker = decode_in_background(
        codec,
        DecodeSource::Stream(bytes.into()),
        CreateOptions::empty(),
        tx,
    )?;
    for event in rx {
        match event {
            DecodeEvent::Progress(percent) => info!("Demo: decode {}%", percent),
            DecodeEvent::Completed(frames) => info!("Demo: decoded {} frames", frames.len()),
            DecodeEvent::Failed(e) => bail!("Background decode failed: {}", e),
        }
    }
    if worker.join().is_err() {
        bail!("Decoder thread panicked");
    }

    info!("imaging-bridge demo finished.");
    Ok(())
}
