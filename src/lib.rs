// src/lib.rs

//! Imaging object layer: frames, codecs, metadata and a double-buffered
//! bitmap shared between an owner thread and a compositor.

/// Decoded frame cache, owned by the application.
pub mod cache;
/// Codec boundary and the in-memory codec.
pub mod codec;
pub mod color;
/// Configuration management.
pub mod config;
pub mod container;
pub mod decoder;
/// Back buffer / front buffer publishing protocol.
pub mod double_buffer;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod guid;
pub mod interop;
/// Query-path metadata store.
pub mod metadata;
pub mod palette;
pub mod pixel_format;
/// Scene graph binding and the compositor thread.
pub mod scene;
pub mod tagged_value;
pub mod transform;

pub use double_buffer::{BitmapDesc, DoubleBufferedBitmap};
pub use error::{ImagingError, Result};
pub use frame::FrameSource;
pub use geometry::PixelRect;
pub use pixel_format::PixelFormat;
