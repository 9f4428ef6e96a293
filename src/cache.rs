// src/cache.rs

//! URI → decoded frames cache.
//!
//! Entries hold weak references: the cache never keeps frames alive by
//! itself. Whoever builds the application owns the cache and hands it to
//! the decoders that should share it.

use crate::frame::FrameSource;
use log::trace;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Frames = Arc<Vec<FrameSource>>;

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, Weak<Vec<FrameSource>>>,
    /// Most recently used at the back.
    recency: VecDeque<String>,
}

impl CacheState {
    fn touch(&mut self, uri: &str) {
        if let Some(pos) = self.recency.iter().position(|u| u == uri) {
            self.recency.remove(pos);
        }
        self.recency.push_back(uri.to_string());
    }

    fn remove(&mut self, uri: &str) {
        self.entries.remove(uri);
        self.recency.retain(|u| u != uri);
    }
}

/// Bounded LRU cache of weakly held frame lists.
#[derive(Debug)]
pub struct BitmapCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl BitmapCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remembers `frames` under `uri`, evicting the least recently used
    /// entry when full.
    pub fn insert(&self, uri: &str, frames: &Frames) {
        let mut state = self.state();
        state.entries.insert(uri.to_string(), Arc::downgrade(frames));
        state.touch(uri);
        while state.entries.len() > self.capacity {
            let Some(oldest) = state.recency.pop_front() else {
                break;
            };
            trace!("BitmapCache: evicting '{}'", oldest);
            state.entries.remove(&oldest);
        }
    }

    /// The frames for `uri` if they are still alive.
    pub fn get(&self, uri: &str) -> Option<Frames> {
        let mut state = self.state();
        let frames = state.entries.get(uri)?.upgrade();
        match &frames {
            Some(_) => state.touch(uri),
            None => state.remove(uri),
        }
        frames
    }

    pub fn remove(&self, uri: &str) {
        self.state().remove(uri);
    }

    /// Drops entries whose frames are gone. Returns how many were dropped.
    pub fn purge_dead(&self) -> usize {
        let mut state = self.state();
        let dead: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, weak)| weak.strong_count() == 0)
            .map(|(uri, _)| uri.clone())
            .collect();
        for uri in &dead {
            state.remove(uri);
        }
        dead.len()
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_format::PixelFormat;

    fn frames() -> Frames {
        Arc::new(vec![FrameSource::blank(1, 1, 96.0, 96.0, PixelFormat::Gray8, None).unwrap()])
    }

    #[test]
    fn get_returns_live_frames_only() {
        let cache = BitmapCache::new(4);
        let a = frames();
        cache.insert("a.png", &a);
        assert!(Arc::ptr_eq(&cache.get("a.png").unwrap(), &a));
        drop(a);
        assert!(cache.get("a.png").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = BitmapCache::new(2);
        let (a, b, c) = (frames(), frames(), frames());
        cache.insert("a", &a);
        cache.insert("b", &b);
        cache.get("a");
        cache.insert("c", &c);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn purge_dead_drops_collected_entries() {
        let cache = BitmapCache::new(4);
        let a = frames();
        cache.insert("a", &a);
        cache.insert("b", &frames());
        assert_eq!(cache.purge_dead(), 1);
        assert_eq!(cache.len(), 1);
        cache.remove("a");
        assert!(cache.is_empty());
    }
}
