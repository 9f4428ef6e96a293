// src/double_buffer/copy.rs

//! Row copies between strided pixel buffers.
//!
//! Formats narrower than a byte pack several pixels per byte, most
//! significant bit first, so a rect may start mid-byte on either side. The
//! copy works in bit offsets and falls back to a per-bit loop only when an
//! edge is not byte aligned.

use crate::error::{ImagingError, Result};
use crate::geometry::PixelRect;
use crate::pixel_format::bytes_for_bits;

/// Where a rect sits inside one strided buffer.
#[derive(Debug, Clone, Copy)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub stride: usize,
}

/// Bytes a buffer must hold for `rect` to be addressable at `stride`.
///
/// The last row only needs the bytes up to the rect's right edge. `None`
/// when the size does not fit in `usize`.
pub fn required_len(rect: &PixelRect, stride: usize, bits_per_pixel: u32) -> Option<usize> {
    if rect.is_empty() {
        return Some(0);
    }
    let last_row = (rect.y as usize).checked_add(rect.height as usize - 1)?;
    let row_bytes = bytes_for_bits((rect.x as u64 + rect.width as u64) * bits_per_pixel as u64);
    last_row.checked_mul(stride)?.checked_add(row_bytes)
}

/// Checks that `len` bytes at `stride` can hold `rect`.
///
/// Copies address the buffer in bits, so the required size must also be
/// expressible as a bit offset.
pub fn check_buffer(rect: &PixelRect, stride: usize, len: usize, bits_per_pixel: u32) -> Result<()> {
    if rect.is_empty() {
        return Ok(());
    }
    let row_bytes = bytes_for_bits((rect.x as u64 + rect.width as u64) * bits_per_pixel as u64);
    if rect.height > 1 && stride < row_bytes {
        return Err(ImagingError::invalid(format!(
            "stride {} cannot hold {} bytes per row",
            stride, row_bytes
        )));
    }
    let required = required_len(rect, stride, bits_per_pixel)
        .filter(|bytes| bytes.checked_mul(8).is_some())
        .ok_or_else(|| {
            ImagingError::invalid(format!("{:?} at stride {} overflows the address space", rect, stride))
        })?;
    if len < required {
        return Err(ImagingError::BufferTooSmall {
            required,
            actual: len,
        });
    }
    Ok(())
}

/// Copies a `width` × `height` block from `src` to `dst`.
///
/// Callers validate both buffers first; this only indexes.
pub fn copy_rect(
    src: &[u8],
    from: Placement,
    dst: &mut [u8],
    to: Placement,
    width: u32,
    height: u32,
    bits_per_pixel: u32,
) {
    let bpp = bits_per_pixel as usize;
    let row_bits = width as usize * bpp;
    for row in 0..height as usize {
        let src_bit = (from.y as usize + row) * from.stride * 8 + from.x as usize * bpp;
        let dst_bit = (to.y as usize + row) * to.stride * 8 + to.x as usize * bpp;
        copy_bits(src, src_bit, dst, dst_bit, row_bits);
    }
}

fn copy_bits(src: &[u8], src_bit: usize, dst: &mut [u8], dst_bit: usize, bits: usize) {
    if src_bit % 8 == 0 && dst_bit % 8 == 0 {
        let (s, d) = (src_bit / 8, dst_bit / 8);
        let full = bits / 8;
        dst[d..d + full].copy_from_slice(&src[s..s + full]);
        let rem = bits % 8;
        if rem > 0 {
            let mask = 0xFFu8 << (8 - rem);
            dst[d + full] = (dst[d + full] & !mask) | (src[s + full] & mask);
        }
        return;
    }
    for i in 0..bits {
        let (si, di) = (src_bit + i, dst_bit + i);
        let bit = (src[si / 8] >> (7 - si % 8)) & 1;
        let shift = 7 - di % 8;
        dst[di / 8] = (dst[di / 8] & !(1 << shift)) | (bit << shift);
    }
}
