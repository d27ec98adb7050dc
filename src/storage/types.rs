//! Core data types for the photovault storage engine
//!
//! This module defines the fundamental types used throughout the storage layer:
//! - `Image`: A single image record with its tags and (on create) its payload
//! - `ImageSpecification`: The representation a caller wants rendered
//! - `ImageFilter` / `TagFilter`: Predicates and ordering for `find` operations
//! - `BlockEntry`: Where an image's payload lives in the segment files

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Logical image identifier. Positive, monotonically assigned, never reused.
pub type ImageId = u64;

/// A single image record
///
/// The raw payload is only carried on the way into `create`. It is never
/// persisted in the index snapshot; the bytes live in the segment files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Image {
    /// Unique identifier
    pub id: ImageId,
    /// Optional caption
    #[serde(default)]
    pub title: Option<String>,
    /// Tags attached to this image
    #[serde(default)]
    pub tags: Vec<String>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// Raw encoded image bytes (create-time only)
    #[serde(skip)]
    pub buffer: Option<Vec<u8>>,
}

impl Image {
    /// Create a new record with the current timestamp
    pub fn new(id: ImageId) -> Self {
        Self {
            id,
            title: None,
            tags: Vec::new(),
            created_at: Utc::now(),
            buffer: None,
        }
    }

    /// Builder method: set title
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Builder method: add a tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Builder method: add multiple tags
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Builder method: set creation time
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Builder method: attach the raw payload
    pub fn buffer(mut self, buffer: Vec<u8>) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Check if this image carries a tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

impl From<&Image> for ImageId {
    fn from(image: &Image) -> Self {
        image.id
    }
}

impl From<Image> for ImageId {
    fn from(image: Image) -> Self {
        image.id
    }
}

/// Target representation for render resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSpecification {
    /// The unmodified stored payload
    #[default]
    Origin,
    /// Small grid thumbnail
    Thumbnail,
    /// Screen-sized preview
    Preview,
    /// Fit inside a bounding box
    Fit { width: u32, height: u32 },
}

impl fmt::Display for ImageSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSpecification::Origin => write!(f, "origin"),
            ImageSpecification::Thumbnail => write!(f, "thumbnail"),
            ImageSpecification::Preview => write!(f, "preview"),
            ImageSpecification::Fit { width, height } => write!(f, "fit:{}x{}", width, height),
        }
    }
}

impl FromStr for ImageSpecification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "origin" => Ok(ImageSpecification::Origin),
            "thumbnail" => Ok(ImageSpecification::Thumbnail),
            "preview" => Ok(ImageSpecification::Preview),
            other => {
                let dims = other
                    .strip_prefix("fit:")
                    .ok_or_else(|| format!("Unknown specification: {}", s))?;
                let (w, h) = dims
                    .split_once('x')
                    .ok_or_else(|| format!("Expected fit:WIDTHxHEIGHT, got: {}", s))?;
                let width = w.parse().map_err(|_| format!("Invalid width: {}", w))?;
                let height = h.parse().map_err(|_| format!("Invalid height: {}", h))?;
                Ok(ImageSpecification::Fit { width, height })
            }
        }
    }
}

/// Field to order image results by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrder {
    Id,
    CreatedAt,
    Title,
}

/// Filter for image queries
///
/// Every predicate that is set must hold. Sorting is descending unless
/// `desc` is explicitly `Some(false)`.
#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    /// Restrict to these ids
    pub ids: Option<HashSet<ImageId>>,
    /// Image must carry every one of these tags
    pub tags_all: Vec<String>,
    /// Image must carry at least one of these tags (ignored when empty)
    pub tags_any: Vec<String>,
    /// Image must carry none of these tags
    pub tags_none: Vec<String>,
    /// Case-insensitive substring of the title
    pub title_contains: Option<String>,
    /// Sort field
    pub order: Option<ImageOrder>,
    /// Sort direction override
    pub desc: Option<bool>,
}

impl ImageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = ImageId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags_all.push(tag.into());
        self
    }

    pub fn any_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags_any.push(tag.into());
        self
    }

    pub fn exclude_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags_none.push(tag.into());
        self
    }

    pub fn title_contains(mut self, needle: impl Into<String>) -> Self {
        self.title_contains = Some(needle.into());
        self
    }

    pub fn order(mut self, order: ImageOrder) -> Self {
        self.order = Some(order);
        self
    }

    pub fn desc(mut self, desc: bool) -> Self {
        self.desc = Some(desc);
        self
    }

    /// Check if an image matches this filter
    pub fn matches(&self, image: &Image) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&image.id) {
                return false;
            }
        }

        if !self.tags_all.iter().all(|t| image.has_tag(t)) {
            return false;
        }

        if !self.tags_any.is_empty() && !self.tags_any.iter().any(|t| image.has_tag(t)) {
            return false;
        }

        if self.tags_none.iter().any(|t| image.has_tag(t)) {
            return false;
        }

        if let Some(needle) = &self.title_contains {
            let needle = needle.to_lowercase();
            let hit = image
                .title
                .as_deref()
                .map(|t| t.to_lowercase().contains(&needle))
                .unwrap_or(false);
            if !hit {
                return false;
            }
        }

        true
    }

    /// Order matched images in place
    pub fn apply_order(&self, images: &mut [Image]) {
        match self.order {
            Some(order) => {
                let desc = self.desc.unwrap_or(true);
                // sort_by is stable, so ties keep collection order
                images.sort_by(|a, b| {
                    let ord = match order {
                        ImageOrder::Id => a.id.cmp(&b.id),
                        ImageOrder::CreatedAt => a.created_at.cmp(&b.created_at),
                        ImageOrder::Title => a.title.cmp(&b.title),
                    };
                    if desc {
                        ord.reverse()
                    } else {
                        ord
                    }
                });
            }
            None => {
                if self.desc == Some(false) {
                    images.reverse();
                }
            }
        }
    }
}

/// Filter for tag vocabulary queries
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    /// Case-insensitive substring
    pub contains: Option<String>,
    /// Exact prefix
    pub prefix: Option<String>,
    /// Sort by name (ascending unless `desc == Some(true)`)
    pub sorted: bool,
    /// Direction override
    pub desc: Option<bool>,
}

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(mut self, needle: impl Into<String>) -> Self {
        self.contains = Some(needle.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn sorted(mut self) -> Self {
        self.sorted = true;
        self
    }

    pub fn desc(mut self, desc: bool) -> Self {
        self.desc = Some(desc);
        self
    }

    pub fn matches(&self, tag: &str) -> bool {
        if let Some(prefix) = &self.prefix {
            if !tag.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(needle) = &self.contains {
            if !tag.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }

    pub fn apply_order(&self, tags: &mut [String]) {
        if self.sorted {
            tags.sort();
            if self.desc == Some(true) {
                tags.reverse();
            }
        } else if self.desc == Some(false) {
            tags.reverse();
        }
    }
}

/// Location of an image payload: its byte length and its blocks, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    /// Payload length in bytes
    pub size: u64,
    /// Global block indices
    pub blocks: Vec<u64>,
}

impl BlockEntry {
    pub fn new(size: u64, blocks: Vec<u64>) -> Self {
        Self { size, blocks }
    }

    /// Highest block index used by this entry
    pub fn max_block(&self) -> Option<u64> {
        self.blocks.iter().copied().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_image_builder() {
        let image = Image::new(3).title("Beach").tag("sea").tags(["sun", "sand"]);

        assert_eq!(image.id, 3);
        assert_eq!(image.title.as_deref(), Some("Beach"));
        assert!(image.has_tag("sea"));
        assert!(image.has_tag("sand"));
        assert!(!image.has_tag("snow"));
    }

    #[test]
    fn test_buffer_not_serialized() {
        let image = Image::new(1).tag("cat").buffer(vec![1, 2, 3]);
        let bytes = bincode::serialize(&image).unwrap();
        let restored: Image = bincode::deserialize(&bytes).unwrap();

        assert_eq!(restored.id, 1);
        assert_eq!(restored.tags, vec!["cat".to_string()]);
        assert!(restored.buffer.is_none());
    }

    #[test]
    fn test_specification_parse() {
        assert_eq!("origin".parse::<ImageSpecification>().unwrap(), ImageSpecification::Origin);
        assert_eq!("Thumbnail".parse::<ImageSpecification>().unwrap(), ImageSpecification::Thumbnail);
        assert_eq!(
            "fit:640x480".parse::<ImageSpecification>().unwrap(),
            ImageSpecification::Fit { width: 640, height: 480 }
        );
        assert!("fit:640".parse::<ImageSpecification>().is_err());
        assert!("huge".parse::<ImageSpecification>().is_err());

        let spec = ImageSpecification::Fit { width: 10, height: 20 };
        assert_eq!(spec.to_string().parse::<ImageSpecification>().unwrap(), spec);
    }

    #[test]
    fn test_image_filter_predicates() {
        let image = Image::new(1).title("Garden Cat").tags(["cat", "outdoor"]);

        assert!(ImageFilter::new().matches(&image));
        assert!(ImageFilter::new().tag("cat").tag("outdoor").matches(&image));
        assert!(!ImageFilter::new().tag("cat").tag("dog").matches(&image));
        assert!(ImageFilter::new().any_tag("dog").any_tag("cat").matches(&image));
        assert!(!ImageFilter::new().any_tag("dog").matches(&image));
        assert!(!ImageFilter::new().exclude_tag("outdoor").matches(&image));
        assert!(ImageFilter::new().title_contains("garden").matches(&image));
        assert!(!ImageFilter::new().title_contains("kitchen").matches(&image));
        assert!(ImageFilter::new().ids([1, 2]).matches(&image));
        assert!(!ImageFilter::new().ids([2]).matches(&image));
    }

    #[test]
    fn test_image_filter_order_default_desc() {
        let mut images = vec![
            Image::new(1).created_at(at(30)),
            Image::new(2).created_at(at(10)),
            Image::new(3).created_at(at(20)),
        ];

        ImageFilter::new().order(ImageOrder::CreatedAt).apply_order(&mut images);
        let ids: Vec<_> = images.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);

        ImageFilter::new().order(ImageOrder::Id).desc(false).apply_order(&mut images);
        let ids: Vec<_> = images.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_image_filter_order_stable_ties() {
        let mut images = vec![
            Image::new(1).created_at(at(5)),
            Image::new(2).created_at(at(5)),
            Image::new(3).created_at(at(1)),
        ];

        ImageFilter::new().order(ImageOrder::CreatedAt).apply_order(&mut images);
        let ids: Vec<_> = images.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_image_filter_reverse_without_order() {
        let mut images = vec![Image::new(1), Image::new(2), Image::new(3)];
        ImageFilter::new().desc(false).apply_order(&mut images);
        let ids: Vec<_> = images.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_tag_filter() {
        let filter = TagFilter::new().contains("DOOR");
        assert!(filter.matches("outdoor"));
        assert!(!filter.matches("cat"));

        let filter = TagFilter::new().prefix("out");
        assert!(filter.matches("outdoor"));
        assert!(!filter.matches("indoor"));

        let mut tags = vec!["b".to_string(), "c".to_string(), "a".to_string()];
        TagFilter::new().sorted().apply_order(&mut tags);
        assert_eq!(tags, vec!["a", "b", "c"]);
        TagFilter::new().sorted().desc(true).apply_order(&mut tags);
        assert_eq!(tags, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_block_entry_max() {
        let entry = BlockEntry::new(10, vec![4, 5, 6]);
        assert_eq!(entry.max_block(), Some(6));
        assert_eq!(BlockEntry::new(0, vec![]).max_block(), None);
    }
}
