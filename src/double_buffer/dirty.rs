// src/double_buffer/dirty.rs

//! Accumulated dirty rectangles.
//!
//! Rects are kept as a list until the list would grow past its limit, at
//! which point everything collapses into one bounding box. Either form
//! covers every rect that was added.

use crate::geometry::PixelRect;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyRegion {
    rects: Vec<PixelRect>,
    max_rects: usize,
}

impl DirtyRegion {
    pub fn new(max_rects: usize) -> Self {
        Self {
            rects: Vec::new(),
            max_rects: max_rects.max(1),
        }
    }

    /// Adds `rect`. Empty rects are ignored.
    pub fn add(&mut self, rect: PixelRect) {
        if rect.is_empty() {
            return;
        }
        if self.rects.iter().any(|r| r.contains(&rect)) {
            return;
        }
        self.rects.retain(|r| !rect.contains(r));
        self.rects.push(rect);
        if self.rects.len() > self.max_rects {
            let bounds = self.bounds();
            self.rects.clear();
            self.rects.push(bounds);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[PixelRect] {
        &self.rects
    }

    /// Smallest rect covering the whole region; empty when clean.
    pub fn bounds(&self) -> PixelRect {
        self.rects
            .iter()
            .fold(PixelRect::default(), |acc, r| acc.union(r))
    }

    /// Empties the region, returning what it held.
    pub fn take(&mut self) -> Vec<PixelRect> {
        std::mem::take(&mut self.rects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_empty_and_covered_rects() {
        let mut region = DirtyRegion::new(8);
        region.add(PixelRect::new(0, 0, 0, 4));
        assert!(region.is_empty());
        region.add(PixelRect::new(0, 0, 4, 4));
        region.add(PixelRect::new(1, 1, 2, 2));
        assert_eq!(region.rects(), &[PixelRect::new(0, 0, 4, 4)]);
    }

    #[test]
    fn larger_rect_replaces_the_ones_it_covers() {
        let mut region = DirtyRegion::new(8);
        region.add(PixelRect::new(1, 1, 1, 1));
        region.add(PixelRect::new(2, 2, 1, 1));
        region.add(PixelRect::new(0, 0, 4, 4));
        assert_eq!(region.rects(), &[PixelRect::new(0, 0, 4, 4)]);
    }

    #[test]
    fn collapses_to_bounding_box_past_limit() {
        let mut region = DirtyRegion::new(2);
        region.add(PixelRect::new(0, 0, 1, 1));
        region.add(PixelRect::new(5, 0, 1, 1));
        region.add(PixelRect::new(0, 5, 1, 1));
        assert_eq!(region.rects(), &[PixelRect::new(0, 0, 6, 6)]);
    }

    #[test]
    fn take_leaves_region_clean() {
        let mut region = DirtyRegion::new(4);
        region.add(PixelRect::new(0, 0, 2, 2));
        assert_eq!(region.take(), vec![PixelRect::new(0, 0, 2, 2)]);
        assert!(region.is_empty());
        assert!(region.bounds().is_empty());
    }
}
