// src/metadata.rs

//! Bitmap metadata addressed by hierarchical query paths.
//!
//! A query path is a `/`-separated list of block names and item keys, e.g.
//! `/app1/ifd/{ushort=270}`. Every block is a [`BitmapMetadata`] handle;
//! intermediate blocks are created on write. Handles are reference counted,
//! so a nested block returned from [`BitmapMetadata::get_query`] stays valid
//! even if its parent is dropped.

use crate::container::ContainerFormat;
use crate::error::{ImagingError, Result};
use crate::tagged_value::TaggedValue;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

struct MetadataBlock {
    container: ContainerFormat,
    /// Query path of this block from the root, `/` for the root itself.
    location: String,
    entries: BTreeMap<String, TaggedValue>,
    frozen: bool,
}

/// Shared handle to a metadata block.
#[derive(Clone)]
pub struct BitmapMetadata {
    block: Arc<Mutex<MetadataBlock>>,
}

/// Photo properties with a fixed home inside each container's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyProperty {
    Title,
    Subject,
    Author,
    Comment,
    Keywords,
    DateTaken,
    ApplicationName,
    CameraManufacturer,
    CameraModel,
    Copyright,
    Rating,
}

impl PolicyProperty {
    /// Query path for this property in `container`, if the container stores it.
    pub fn query_path(self, container: ContainerFormat) -> Option<String> {
        if let Some(ifd) = container.ifd_root() {
            let path = match self {
                PolicyProperty::Title => format!("{}/{{ushort=270}}", ifd),
                PolicyProperty::CameraManufacturer => format!("{}/{{ushort=271}}", ifd),
                PolicyProperty::CameraModel => format!("{}/{{ushort=272}}", ifd),
                PolicyProperty::ApplicationName => format!("{}/{{ushort=305}}", ifd),
                PolicyProperty::Author => format!("{}/{{ushort=315}}", ifd),
                PolicyProperty::Rating => format!("{}/{{ushort=18246}}", ifd),
                PolicyProperty::Copyright => format!("{}/{{ushort=33432}}", ifd),
                PolicyProperty::Comment => format!("{}/{{ushort=40092}}", ifd),
                PolicyProperty::Keywords => format!("{}/{{ushort=40094}}", ifd),
                PolicyProperty::Subject => format!("{}/{{ushort=40095}}", ifd),
                PolicyProperty::DateTaken => format!("{}/exif/{{ushort=36867}}", ifd),
            };
            return Some(path);
        }
        if container == ContainerFormat::Png {
            let key = match self {
                PolicyProperty::Title => "Title",
                PolicyProperty::Author => "Author",
                PolicyProperty::Subject => "Description",
                PolicyProperty::Comment => "Comment",
                PolicyProperty::Copyright => "Copyright",
                PolicyProperty::ApplicationName => "Software",
                PolicyProperty::DateTaken => "Creation Time",
                _ => return None,
            };
            return Some(format!("/tEXt/{{str={}}}", key));
        }
        None
    }
}

/// Splits and canonicalizes a query path.
///
/// `{type=value}` keys have their type lowercased so `{UShort=270}` and
/// `{ushort=270}` address the same item.
fn parse_query(path: &str) -> Result<Vec<String>> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| ImagingError::invalid(format!("query '{}' must start with '/'", path)))?;
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    rest.split('/')
        .map(|segment| {
            if segment.is_empty() {
                return Err(ImagingError::invalid(format!(
                    "query '{}' has an empty segment",
                    path
                )));
            }
            if let Some(body) = segment.strip_prefix('{') {
                let body = body.strip_suffix('}').ok_or_else(|| {
                    ImagingError::invalid(format!("unterminated key '{}' in '{}'", segment, path))
                })?;
                let (ty, value) = body.split_once('=').ok_or_else(|| {
                    ImagingError::invalid(format!("key '{}' lacks '=' in '{}'", segment, path))
                })?;
                if ty.is_empty() || value.is_empty() {
                    return Err(ImagingError::invalid(format!(
                        "key '{}' is incomplete in '{}'",
                        segment, path
                    )));
                }
                Ok(format!("{{{}={}}}", ty.to_ascii_lowercase(), value))
            } else if segment.contains(['{', '}']) {
                Err(ImagingError::invalid(format!(
                    "misplaced brace in '{}' of '{}'",
                    segment, path
                )))
            } else {
                Ok(segment.to_string())
            }
        })
        .collect()
}

impl BitmapMetadata {
    /// Creates an empty root block for `container`.
    pub fn new(container: ContainerFormat) -> Self {
        Self::with_location(container, "/".to_string())
    }

    fn with_location(container: ContainerFormat, location: String) -> Self {
        Self {
            block: Arc::new(Mutex::new(MetadataBlock {
                container,
                location,
                entries: BTreeMap::new(),
                frozen: false,
            })),
        }
    }

    fn block(&self) -> MutexGuard<'_, MetadataBlock> {
        // Entries are plain values; a panic mid-update cannot leave them torn.
        self.block.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn container_format(&self) -> ContainerFormat {
        self.block().container
    }

    /// Query path of this block relative to its root.
    pub fn location(&self) -> String {
        self.block().location.clone()
    }

    pub fn is_frozen(&self) -> bool {
        self.block().frozen
    }

    /// Number of live handles to this block.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.block)
    }

    /// Direct child keys of this block, in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.block().entries.keys().cloned().collect()
    }

    /// Walks to the block holding the last segment, optionally creating blocks.
    fn resolve_parent(&self, segments: &[String], create: bool) -> Result<BitmapMetadata> {
        let mut current = self.clone();
        for segment in segments {
            let next = {
                let mut block = current.block();
                match block.entries.get(segment) {
                    Some(TaggedValue::Metadata(child)) => child.clone(),
                    Some(other) => {
                        return Err(ImagingError::invalid(format!(
                            "'{}' holds a {} value, not a block",
                            segment,
                            other.kind().name()
                        )))
                    }
                    None if create => {
                        if block.frozen {
                            return Err(ImagingError::FrozenBitmap);
                        }
                        let location = if block.location == "/" {
                            format!("/{}", segment)
                        } else {
                            format!("{}/{}", block.location, segment)
                        };
                        let child = BitmapMetadata::with_location(block.container, location);
                        block
                            .entries
                            .insert(segment.clone(), TaggedValue::Metadata(child.clone()));
                        child
                    }
                    None => return Err(ImagingError::QueryNotFound(segment.clone())),
                }
            };
            current = next;
        }
        Ok(current)
    }

    /// Reads the value at `path`. A path naming a block returns its handle.
    pub fn get_query(&self, path: &str) -> Result<TaggedValue> {
        let segments = parse_query(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Ok(TaggedValue::Metadata(self.clone()));
        };
        let parent = self
            .resolve_parent(parents, false)
            .map_err(|e| match e {
                ImagingError::QueryNotFound(_) => ImagingError::QueryNotFound(path.to_string()),
                other => other,
            })?;
        let block = parent.block();
        block
            .entries
            .get(last)
            .cloned()
            .ok_or_else(|| ImagingError::QueryNotFound(path.to_string()))
    }

    pub fn contains_query(&self, path: &str) -> bool {
        self.get_query(path).is_ok()
    }

    /// Writes `value` at `path`, creating intermediate blocks.
    pub fn set_query(&self, path: &str, value: impl Into<TaggedValue>) -> Result<()> {
        let value = value.into();
        let segments = parse_query(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(ImagingError::invalid("cannot replace the root block"));
        };
        if self.is_frozen() {
            warn!("BitmapMetadata: write to '{}' on frozen metadata", path);
            return Err(ImagingError::FrozenBitmap);
        }
        let parent = self.resolve_parent(parents, true)?;
        let mut block = parent.block();
        if block.frozen {
            return Err(ImagingError::FrozenBitmap);
        }
        debug!("BitmapMetadata: set '{}' = {}", path, value.kind().name());
        block.entries.insert(last.clone(), value);
        Ok(())
    }

    pub fn remove_query(&self, path: &str) -> Result<()> {
        let segments = parse_query(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(ImagingError::invalid("cannot remove the root block"));
        };
        if self.is_frozen() {
            return Err(ImagingError::FrozenBitmap);
        }
        let parent = self.resolve_parent(parents, false)?;
        let mut block = parent.block();
        if block.frozen {
            return Err(ImagingError::FrozenBitmap);
        }
        block
            .entries
            .remove(last)
            .map(|_| ())
            .ok_or_else(|| ImagingError::QueryNotFound(path.to_string()))
    }

    /// Makes this block and every nested block read-only. One-way.
    pub fn freeze(&self) {
        let children: Vec<BitmapMetadata> = {
            let mut block = self.block();
            block.frozen = true;
            block
                .entries
                .values()
                .filter_map(|v| match v {
                    TaggedValue::Metadata(child) => Some(child.clone()),
                    _ => None,
                })
                .collect()
        };
        for child in children {
            child.freeze();
        }
    }

    /// Copies the whole tree into new, unfrozen blocks.
    pub fn deep_clone(&self) -> BitmapMetadata {
        let block = self.block();
        let copy = BitmapMetadata::with_location(block.container, block.location.clone());
        {
            let mut target = copy.block();
            for (key, value) in &block.entries {
                let value = match value {
                    TaggedValue::Metadata(child) => TaggedValue::Metadata(child.deep_clone()),
                    other => other.clone(),
                };
                target.entries.insert(key.clone(), value);
            }
        }
        copy
    }

    // --- Policy properties ---

    fn policy_path(&self, property: PolicyProperty) -> Result<String> {
        let container = self.container_format();
        property.query_path(container).ok_or_else(|| {
            ImagingError::invalid(format!("{:?} has no {:?} property", container, property))
        })
    }

    fn get_policy_string(&self, property: PolicyProperty) -> Option<String> {
        let path = self.policy_path(property).ok()?;
        self.get_query(&path).ok()?.to_value::<String>().ok()
    }

    fn set_policy(&self, property: PolicyProperty, value: TaggedValue) -> Result<()> {
        let path = self.policy_path(property)?;
        self.set_query(&path, value)
    }

    pub fn title(&self) -> Option<String> {
        self.get_policy_string(PolicyProperty::Title)
    }

    pub fn set_title(&self, title: &str) -> Result<()> {
        self.set_policy(PolicyProperty::Title, title.into())
    }

    pub fn subject(&self) -> Option<String> {
        self.get_policy_string(PolicyProperty::Subject)
    }

    pub fn set_subject(&self, subject: &str) -> Result<()> {
        self.set_policy(PolicyProperty::Subject, subject.into())
    }

    pub fn author(&self) -> Option<String> {
        self.get_policy_string(PolicyProperty::Author)
    }

    pub fn set_author(&self, author: &str) -> Result<()> {
        self.set_policy(PolicyProperty::Author, author.into())
    }

    pub fn comment(&self) -> Option<String> {
        self.get_policy_string(PolicyProperty::Comment)
    }

    pub fn set_comment(&self, comment: &str) -> Result<()> {
        self.set_policy(PolicyProperty::Comment, comment.into())
    }

    pub fn keywords(&self) -> Option<Vec<String>> {
        let path = self.policy_path(PolicyProperty::Keywords).ok()?;
        self.get_query(&path).ok()?.to_value::<Vec<String>>().ok()
    }

    pub fn set_keywords(&self, keywords: &[&str]) -> Result<()> {
        let value: Vec<String> = keywords.iter().map(|k| k.to_string()).collect();
        self.set_policy(PolicyProperty::Keywords, value.into())
    }

    /// EXIF-style `YYYY:MM:DD HH:MM:SS` capture time.
    pub fn date_taken(&self) -> Option<String> {
        self.get_policy_string(PolicyProperty::DateTaken)
    }

    pub fn set_date_taken(&self, date: &str) -> Result<()> {
        self.set_policy(PolicyProperty::DateTaken, date.into())
    }

    pub fn application_name(&self) -> Option<String> {
        self.get_policy_string(PolicyProperty::ApplicationName)
    }

    pub fn set_application_name(&self, name: &str) -> Result<()> {
        self.set_policy(PolicyProperty::ApplicationName, name.into())
    }

    pub fn camera_manufacturer(&self) -> Option<String> {
        self.get_policy_string(PolicyProperty::CameraManufacturer)
    }

    pub fn set_camera_manufacturer(&self, name: &str) -> Result<()> {
        self.set_policy(PolicyProperty::CameraManufacturer, name.into())
    }

    pub fn camera_model(&self) -> Option<String> {
        self.get_policy_string(PolicyProperty::CameraModel)
    }

    pub fn set_camera_model(&self, model: &str) -> Result<()> {
        self.set_policy(PolicyProperty::CameraModel, model.into())
    }

    pub fn copyright(&self) -> Option<String> {
        self.get_policy_string(PolicyProperty::Copyright)
    }

    pub fn set_copyright(&self, notice: &str) -> Result<()> {
        self.set_policy(PolicyProperty::Copyright, notice.into())
    }

    /// Star rating, 0..=5.
    pub fn rating(&self) -> Option<u16> {
        let path = self.policy_path(PolicyProperty::Rating).ok()?;
        self.get_query(&path).ok()?.to_value::<u16>().ok()
    }

    pub fn set_rating(&self, rating: u16) -> Result<()> {
        if rating > 5 {
            return Err(ImagingError::invalid(format!(
                "rating must be 0..=5, got {}",
                rating
            )));
        }
        self.set_policy(PolicyProperty::Rating, rating.into())
    }
}

impl PartialEq for BitmapMetadata {
    /// Handles are equal when they refer to the same block.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.block, &other.block)
    }
}

impl fmt::Debug for BitmapMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block.try_lock() {
            Ok(block) => f
                .debug_struct("BitmapMetadata")
                .field("container", &block.container)
                .field("location", &block.location)
                .field("keys", &block.entries.keys().collect::<Vec<_>>())
                .field("frozen", &block.frozen)
                .finish(),
            Err(_) => f.write_str("BitmapMetadata { <locked> }"),
        }
    }
}
