//! Domain models for the rules matrix and its version registry.
//!
//! - [`Matrix`] - country x category x subcategory table of regulatory text
//! - [`Country`] - a country column of the matrix
//! - [`CategoryEntry`] - text stored for one country and one category
//! - [`VersionMetadata`] / [`UploadRecord`] - persisted registry state

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

// =============================================================================
// Matrix
// =============================================================================

/// A country column of the matrix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Country {
    /// Trimmed header cell, unique within a matrix.
    pub key: String,
    /// Display name: the key without its trailing parenthetical.
    pub label: String,
}

/// Text stored for one country and one category.
///
/// Serializes to the flat object the frontend reads:
/// `{ "_value": "...", "<subcategory>": "..." }`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryEntry {
    value: Option<String>,
    subcategories: Vec<(String, String)>,
}

impl CategoryEntry {
    /// Default text, used when the row had no subcategory.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Subcategory texts in source order.
    pub fn subcategories(&self) -> impl Iterator<Item = (&str, &str)> {
        self.subcategories.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Text for one subcategory.
    pub fn subcategory(&self, name: &str) -> Option<&str> {
        self.subcategories
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Default text if present, otherwise all subcategory texts joined by a space.
    pub fn combined_text(&self) -> String {
        match &self.value {
            Some(v) => v.clone(),
            None => self
                .subcategories
                .iter()
                .map(|(_, v)| v.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.subcategories.is_empty()
    }

    /// Later rows overwrite earlier ones for the same slot.
    pub(crate) fn set_value(&mut self, text: String) {
        self.value = Some(text);
    }

    pub(crate) fn set_subcategory(&mut self, name: &str, text: String) {
        match self.subcategories.iter_mut().find(|(k, _)| k == name) {
            Some((_, slot)) => *slot = text,
            None => self.subcategories.push((name.to_string(), text)),
        }
    }
}

impl Serialize for CategoryEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.subcategories.len() + usize::from(self.value.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(ref v) = self.value {
            map.serialize_entry("_value", v)?;
        }
        for (k, v) in &self.subcategories {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// All categories recorded for one country, in matrix row order.
pub type CountryData = IndexMap<String, CategoryEntry>;

/// The parsed rules matrix.
///
/// Every key of `data` is also a key in `countries`; countries without any
/// non-empty cell have no `data` entry.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Matrix {
    pub countries: Vec<Country>,
    pub categories: Vec<String>,
    pub data: BTreeMap<String, CountryData>,
}

impl Matrix {
    /// Data slice for one country.
    pub fn country_data(&self, key: &str) -> Option<&CountryData> {
        self.data.get(key)
    }

    /// Whether the header row declared this country.
    pub fn has_country(&self, key: &str) -> bool {
        self.countries.iter().any(|c| c.key == key)
    }
}

// =============================================================================
// Version Registry
// =============================================================================

/// One successful upload, prepended to the history on activation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub version: u64,
    #[serde(rename = "filename")]
    pub stored_filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub original_name: String,
    pub mime_type: String,
    pub countries_count: usize,
}

/// Persisted registry state (`meta.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionMetadata {
    pub active_version: Option<u64>,
    #[serde(default)]
    pub latest_version: u64,
    /// Newest first.
    #[serde(default)]
    pub history: Vec<UploadRecord>,
}
