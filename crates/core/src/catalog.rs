use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::signing::sha256_hex;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogArea {
    pub area_id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogEntity {
    pub entity_id: String,
    pub domain: String,
    #[serde(default)]
    pub area_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub capabilities: BTreeMap<String, Value>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogScene {
    pub entity_id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediaItem {
    pub rating_key: String,
    pub title: String,
    pub media_type: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub collection: Vec<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub actors: Vec<String>,
    #[serde(default)]
    pub audio_language: Option<String>,
    #[serde(default)]
    pub subtitles: Vec<String>,
}

/// Read-only snapshot of everything the interpreter may target. Built by the
/// host's exporters and never mutated by the pipeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogPayload {
    #[serde(default)]
    pub areas: Vec<CatalogArea>,
    #[serde(default)]
    pub entities: Vec<CatalogEntity>,
    #[serde(default)]
    pub scenes: Vec<CatalogScene>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

impl CatalogPayload {
    /// Stable fingerprint over the canonical serialization. Any catalog change
    /// invalidates cached slices without needing a version counter.
    pub fn fingerprint(&self) -> String {
        let canonical = match serde_json::to_vec(self) {
            Ok(bytes) => bytes,
            Err(_) => Vec::new(),
        };
        sha256_hex(&canonical)
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
            && self.entities.is_empty()
            && self.scenes.is_empty()
            && self.media.is_empty()
    }
}
