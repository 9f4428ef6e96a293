// src/geometry.rs

//! Integer pixel geometry used by the copy and dirty-tracking code.

use crate::error::{ImagingError, Result};
use serde::{Deserialize, Serialize};

/// A rectangle in pixel coordinates.
///
/// Signed components so that malformed caller input (negative origin or
/// size) can be represented and rejected rather than wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The rect covering a whole `width` × `height` surface.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    /// True when the rect covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn has_negative_component(&self) -> bool {
        self.x < 0 || self.y < 0 || self.width < 0 || self.height < 0
    }

    /// Exclusive right edge, widened to avoid overflow on hostile input.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn area(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.width as u64 * self.height as u64
        }
    }

    /// True when the rect lies inside `[0,width) × [0,height)`.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        !self.has_negative_component()
            && self.right() <= width as i64
            && self.bottom() <= height as i64
    }

    /// Smallest rect containing both. Empty rects are ignored.
    pub fn union(&self, other: &PixelRect) -> PixelRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        PixelRect::new(x, y, (right - x as i64) as i32, (bottom - y as i64) as i32)
    }

    pub fn intersects(&self, other: &PixelRect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && (self.x as i64) < other.right()
            && (other.x as i64) < self.right()
            && (self.y as i64) < other.bottom()
            && (other.y as i64) < self.bottom()
    }

    /// True when every pixel of `other` is inside `self`.
    pub fn contains(&self, other: &PixelRect) -> bool {
        other.is_empty()
            || (self.x <= other.x
                && self.y <= other.y
                && other.right() <= self.right()
                && other.bottom() <= self.bottom())
    }

    /// Rejects negative components and rects extending past the bounds.
    pub fn validate_within(&self, width: u32, height: u32, what: &str) -> Result<()> {
        if self.has_negative_component() {
            return Err(ImagingError::invalid(format!(
                "{} {:?} has a negative component",
                what, self
            )));
        }
        if !self.fits_within(width, height) {
            return Err(ImagingError::invalid(format!(
                "{} {:?} exceeds bounds {}x{}",
                what, self, width, height
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_ignores_empty_rects() {
        let a = PixelRect::new(1, 1, 2, 2);
        assert_eq!(a.union(&PixelRect::default()), a);
        assert_eq!(PixelRect::new(5, 5, 0, 3).union(&a), a);
    }

    #[test]
    fn union_spans_both() {
        let a = PixelRect::new(0, 0, 2, 2);
        let b = PixelRect::new(3, 1, 1, 3);
        assert_eq!(a.union(&b), PixelRect::new(0, 0, 4, 4));
    }

    #[test]
    fn fits_within_checks_far_edges() {
        assert!(PixelRect::new(2, 0, 2, 4).fits_within(4, 4));
        assert!(!PixelRect::new(2, 0, 3, 1).fits_within(4, 4));
        assert!(!PixelRect::new(-1, 0, 1, 1).fits_within(4, 4));
    }

    #[test]
    fn extreme_values_do_not_overflow() {
        let r = PixelRect::new(i32::MAX, 0, i32::MAX, 1);
        assert!(!r.fits_within(u32::MAX, 1));
    }

    #[test]
    fn intersects_and_contains() {
        let a = PixelRect::new(0, 0, 4, 4);
        assert!(a.intersects(&PixelRect::new(3, 3, 2, 2)));
        assert!(!a.intersects(&PixelRect::new(4, 0, 1, 1)));
        assert!(a.contains(&PixelRect::new(1, 1, 3, 3)));
        assert!(!a.contains(&PixelRect::new(1, 1, 4, 3)));
    }
}
