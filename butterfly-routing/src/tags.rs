//! Tag sets and the tag index
//!
//! Edges never store tags directly. Each distinct key/value set is stored once
//! in a [`TagsIndex`] and edges carry the small integer id it hands out.

use butterfly_common::{Error, Result};
use rustc_hash::FxHashMap;

/// Id reserved for "no tags".
pub const EMPTY_TAGS: u32 = 0;

/// Highest id a [`TagsIndex`] hands out. Edge payloads pack the id next to a
/// direction bit, so ids must fit in 31 bits.
pub const MAX_TAGS_ID: u32 = u32::MAX >> 1;

/// A single key/value pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// An order-independent set of tags.
///
/// Tags are kept sorted by key then value, so two collections built from the
/// same pairs in any order compare and hash equal. A key may only appear once;
/// inserting an existing key replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagsCollection {
    tags: Vec<Tag>,
}

impl TagsCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.tags.binary_search_by(|t| t.key.as_str().cmp(&key)) {
            Ok(pos) => self.tags[pos].value = value,
            Err(pos) => self.tags.insert(pos, Tag { key, value }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags
            .binary_search_by(|t| t.key.as_str().cmp(key))
            .ok()
            .map(|pos| self.tags[pos].value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// True if `key` is present with exactly `value`
    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.tags.iter().map(|t| (t.key.as_str(), t.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Keep only the tags whose key passes `keep`.
    pub fn retain_keys(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.tags.retain(|t| keep(&t.key));
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagsCollection {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tags = TagsCollection::new();
        for (key, value) in iter {
            tags.insert(key, value);
        }
        tags
    }
}

/// Deduplicating store of tag sets.
///
/// Id 0 is the empty set and is always present. Ids are assigned densely in
/// insertion order, never exceed [`MAX_TAGS_ID`], and are stable for the
/// lifetime of the index.
#[derive(Debug, Clone)]
pub struct TagsIndex {
    sets: Vec<TagsCollection>,
    ids: FxHashMap<TagsCollection, u32>,
}

impl Default for TagsIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TagsIndex {
    pub fn new() -> Self {
        let mut ids = FxHashMap::default();
        ids.insert(TagsCollection::new(), EMPTY_TAGS);
        Self {
            sets: vec![TagsCollection::new()],
            ids,
        }
    }

    /// Store `tags` if not yet present and return its id.
    pub fn add(&mut self, tags: &TagsCollection) -> Result<u32> {
        if let Some(&id) = self.ids.get(tags) {
            return Ok(id);
        }
        let id = next_id(self.sets.len())?;
        self.sets.push(tags.clone());
        self.ids.insert(tags.clone(), id);
        Ok(id)
    }

    /// Look up a tag set by id. Id 0 yields the empty set.
    pub fn get(&self, id: u32) -> Option<&TagsCollection> {
        self.sets.get(id as usize)
    }

    /// Number of stored sets, including the empty set.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.len() <= 1
    }
}

fn next_id(len: usize) -> Result<u32> {
    u32::try_from(len)
        .ok()
        .filter(|&id| id <= MAX_TAGS_ID)
        .ok_or_else(|| Error::InvalidInput(format!("tag index full ({len} sets)")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_is_order_independent() {
        let a: TagsCollection = [("highway", "residential"), ("name", "Rue Neuve")]
            .into_iter()
            .collect();
        let b: TagsCollection = [("name", "Rue Neuve"), ("highway", "residential")]
            .into_iter()
            .collect();
        assert_eq!(a, b);
        assert_eq!(a.get("highway"), Some("residential"));
        assert!(a.contains("name", "Rue Neuve"));
        assert!(!a.contains_key("oneway"));
    }

    #[test]
    fn test_insert_replaces_value() {
        let mut tags = TagsCollection::new();
        tags.insert("oneway", "no");
        tags.insert("oneway", "yes");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.get("oneway"), Some("yes"));
    }

    #[test]
    fn test_index_deduplicates() {
        let mut index = TagsIndex::new();
        let a: TagsCollection = [("highway", "primary")].into_iter().collect();
        let b: TagsCollection = [("highway", "secondary")].into_iter().collect();

        let id_a = index.add(&a).unwrap();
        let id_b = index.add(&b).unwrap();
        assert_ne!(id_a, id_b);
        assert_eq!(index.add(&a.clone()).unwrap(), id_a);
        assert_eq!(index.get(id_b), Some(&b));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_index_empty_set_is_zero() {
        let mut index = TagsIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.add(&TagsCollection::new()).unwrap(), EMPTY_TAGS);
        assert_eq!(index.get(EMPTY_TAGS).map(|t| t.is_empty()), Some(true));
        assert_eq!(index.get(99), None);
    }

    #[test]
    fn test_ids_stay_within_packing_range() {
        assert_eq!(next_id(7).unwrap(), 7);
        assert_eq!(next_id(MAX_TAGS_ID as usize).unwrap(), MAX_TAGS_ID);
        assert!(matches!(
            next_id(MAX_TAGS_ID as usize + 1),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_retain_keys() {
        let mut tags: TagsCollection = [("highway", "primary"), ("note", "fixme")]
            .into_iter()
            .collect();
        tags.retain_keys(|k| k != "note");
        assert_eq!(tags.len(), 1);
    }
}
