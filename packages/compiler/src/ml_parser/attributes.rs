//! Tag attributes
//!
//! Attributes are kept as a plain ordered list until a `runat="server"`
//! pair shows up. From then on they live in a case-insensitive map and
//! duplicates are rejected; before that, duplicates are tolerated so that
//! sloppy client HTML still parses.

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagAttributes {
    List(Vec<(String, Option<String>)>),
    /// Lower-cased key to (original key, value).
    Server(IndexMap<String, (String, Option<String>)>),
}

impl Default for TagAttributes {
    fn default() -> Self {
        TagAttributes::List(Vec::new())
    }
}

impl TagAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute. The error is the message to report at the tag.
    pub fn add(&mut self, key: &str, value: Option<String>) -> Result<(), String> {
        if key.eq_ignore_ascii_case("runat") {
            if let Some(v) = &value {
                if !v.eq_ignore_ascii_case("server") {
                    return Err(format!("runat={} is not valid.", v));
                }
                if self.is_run_at_server() {
                    return Ok(());
                }
                self.make_server()?;
            }
        }

        match self {
            TagAttributes::List(list) => list.push((key.to_string(), value)),
            TagAttributes::Server(map) => insert_unique(map, key, value)?,
        }
        Ok(())
    }

    fn make_server(&mut self) -> Result<(), String> {
        let list = match self {
            TagAttributes::List(list) => std::mem::take(list),
            TagAttributes::Server(_) => return Ok(()),
        };
        let mut map = IndexMap::with_capacity(list.len() + 1);
        for (key, value) in list {
            insert_unique(&mut map, &key, value)?;
        }
        *self = TagAttributes::Server(map);
        Ok(())
    }

    pub fn is_run_at_server(&self) -> bool {
        matches!(self, TagAttributes::Server(_))
    }

    /// Case-insensitive lookup; with duplicates, the first one wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        match self {
            TagAttributes::List(list) => list
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .and_then(|(_, v)| v.as_deref()),
            TagAttributes::Server(map) => map
                .get(&key.to_ascii_lowercase())
                .and_then(|(_, v)| v.as_deref()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        match self {
            TagAttributes::List(list) => list.iter().any(|(k, _)| k.eq_ignore_ascii_case(key)),
            TagAttributes::Server(map) => map.contains_key(&key.to_ascii_lowercase()),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        match self {
            TagAttributes::List(list) => {
                let idx = list.iter().position(|(k, _)| k.eq_ignore_ascii_case(key))?;
                list.remove(idx).1
            }
            TagAttributes::Server(map) => map.shift_remove(&key.to_ascii_lowercase())?.1,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TagAttributes::List(list) => list.len(),
            TagAttributes::Server(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attributes in source order with their original key spelling.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (&str, Option<&str>)> + '_> {
        match self {
            TagAttributes::List(list) => {
                Box::new(list.iter().map(|(k, v)| (k.as_str(), v.as_deref())))
            }
            TagAttributes::Server(map) => {
                Box::new(map.values().map(|(k, v)| (k.as_str(), v.as_deref())))
            }
        }
    }
}

fn insert_unique(
    map: &mut IndexMap<String, (String, Option<String>)>,
    key: &str,
    value: Option<String>,
) -> Result<(), String> {
    if key.is_empty() {
        return Err("The server tag is not well formed.".to_string());
    }
    let lower = key.to_ascii_lowercase();
    if map.contains_key(&lower) {
        return Err(format!("Tag contains duplicated '{}' attributes.", key));
    }
    map.insert(lower, (key.to_string(), value));
    Ok(())
}

impl Serialize for TagAttributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, &value)?;
        }
        map.end()
    }
}
