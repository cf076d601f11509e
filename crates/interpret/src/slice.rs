//! Trimmed catalog projections for the model prompt.
//!
//! A slice carries only the fields the model needs plus a synthesized
//! one-line `summary` per item, so the prompt stays compact and deterministic
//! regardless of upstream schema drift. The same field filters are reused to
//! normalize loosely-typed vector-search payloads.

use serde::Serialize;
use serde_json::{Map, Value};

use hearth_core::catalog::{CatalogArea, CatalogEntity, CatalogPayload, CatalogScene, MediaItem};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CatalogSlice {
    pub areas: Vec<SlicedArea>,
    pub entities: Vec<SlicedEntity>,
    pub scenes: Vec<SlicedScene>,
    pub media: Vec<SlicedMedia>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SlicedArea {
    pub area_id: String,
    pub name: String,
    pub aliases: Vec<String>,
    pub summary: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SlicedEntity {
    pub entity_id: String,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    pub aliases: Vec<String>,
    pub capabilities: Map<String, Value>,
    pub summary: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SlicedScene {
    pub entity_id: String,
    pub name: String,
    pub aliases: Vec<String>,
    pub summary: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SlicedMedia {
    pub rating_key: String,
    pub title: String,
    pub media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i64>,
    pub collection: Vec<String>,
    pub genres: Vec<String>,
    pub actors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_language: Option<String>,
    pub subtitles: Vec<String>,
    pub summary: String,
}

pub fn build_catalog_slice(catalog: &CatalogPayload) -> CatalogSlice {
    CatalogSlice {
        areas: catalog.areas.iter().map(slice_area).collect(),
        entities: catalog.entities.iter().map(slice_entity).collect(),
        scenes: catalog.scenes.iter().map(slice_scene).collect(),
        media: catalog.media.iter().map(slice_media).collect(),
    }
}

fn slice_area(area: &CatalogArea) -> SlicedArea {
    let aliases = clean_aliases(&area.aliases);
    SlicedArea {
        area_id: area.area_id.clone(),
        name: area.name.clone(),
        summary: summarize_named(&area.name, &area.area_id, &aliases),
        aliases,
    }
}

fn slice_scene(scene: &CatalogScene) -> SlicedScene {
    let aliases = clean_aliases(&scene.aliases);
    SlicedScene {
        entity_id: scene.entity_id.clone(),
        name: scene.name.clone(),
        summary: summarize_named(&scene.name, &scene.entity_id, &aliases),
        aliases,
    }
}

fn slice_entity(entity: &CatalogEntity) -> SlicedEntity {
    let aliases = clean_aliases(&entity.aliases);
    SlicedEntity {
        entity_id: entity.entity_id.clone(),
        domain: entity.domain.clone(),
        area_id: entity.area_id.clone(),
        device_id: entity.device_id.clone(),
        friendly_name: entity.friendly_name.clone(),
        capabilities: entity.capabilities.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        summary: summarize_entity(
            entity.friendly_name.as_deref(),
            &entity.entity_id,
            Some(&entity.domain),
            entity.area_id.as_deref(),
            &aliases,
        ),
        aliases,
    }
}

fn slice_media(item: &MediaItem) -> SlicedMedia {
    let collection = clean_aliases(&item.collection);
    let genres = clean_aliases(&item.genres);
    SlicedMedia {
        rating_key: item.rating_key.clone(),
        title: item.title.clone(),
        media_type: item.media_type.clone(),
        year: item.year.map(i64::from),
        actors: clean_aliases(&item.actors),
        audio_language: item.audio_language.clone(),
        subtitles: clean_aliases(&item.subtitles),
        summary: summarize_media(
            &item.title,
            &item.rating_key,
            Some(&item.media_type),
            item.year.map(i64::from),
            &collection,
            &genres,
        ),
        collection,
        genres,
    }
}

fn clean_aliases(values: &[String]) -> Vec<String> {
    values.iter().filter(|value| !value.is_empty()).cloned().collect()
}

/// "{name} ({id})" with the id omitted when it matches the name, plus a
/// trailing alias list.
fn summarize_named(name: &str, id: &str, aliases: &[String]) -> String {
    let display = if name.is_empty() { id } else { name };
    let mut summary = display.to_string();
    if !id.is_empty() && id != display {
        summary.push_str(&format!(" ({id})"));
    }
    if !aliases.is_empty() {
        summary.push_str(&format!(" • aliases: {}", aliases.join(", ")));
    }
    summary
}

fn summarize_entity(
    friendly_name: Option<&str>,
    entity_id: &str,
    domain: Option<&str>,
    area_id: Option<&str>,
    aliases: &[String],
) -> String {
    let name = friendly_name.filter(|name| !name.is_empty()).unwrap_or(entity_id);
    let mut parts = vec![name.to_string()];
    if let Some(domain) = domain.filter(|domain| !domain.is_empty()) {
        parts.push(format!("domain:{domain}"));
    }
    if let Some(area) = area_id.filter(|area| !area.is_empty()) {
        parts.push(format!("area:{area}"));
    }
    if !aliases.is_empty() {
        parts.push(format!("aliases: {}", aliases.join(", ")));
    }
    parts.join(" | ")
}

fn summarize_media(
    title: &str,
    rating_key: &str,
    media_type: Option<&str>,
    year: Option<i64>,
    collection: &[String],
    genres: &[String],
) -> String {
    let name = if title.is_empty() { rating_key } else { title };
    let mut parts = vec![name.to_string()];
    if let Some(media_type) = media_type.filter(|value| !value.is_empty()) {
        parts.push(media_type.to_string());
    }
    if let Some(year) = year {
        parts.push(year.to_string());
    }
    if !collection.is_empty() {
        parts.push(format!("collections: {}", collection.join(", ")));
    }
    if !genres.is_empty() {
        parts.push(format!("genres: {}", genres.join(", ")));
    }
    parts.join(" | ")
}

const ENTITY_PAYLOAD_FIELDS: &[&str] =
    &["entity_id", "friendly_name", "domain", "area_id", "device_id", "aliases", "capabilities"];

const MEDIA_PAYLOAD_FIELDS: &[&str] = &[
    "rating_key",
    "title",
    "media_type",
    "year",
    "collection",
    "genres",
    "actors",
    "audio_language",
    "subtitles",
];

const MEDIA_LIST_FIELDS: &[&str] = &["collection", "genres", "actors", "subtitles"];

/// Re-type a loosely-structured entity payload from vector search into the
/// canonical field subset, returning the filtered payload and its summary.
pub(crate) fn filter_entity_payload(payload: &Map<String, Value>) -> (Map<String, Value>, String) {
    let mut filtered = Map::new();
    for key in ENTITY_PAYLOAD_FIELDS {
        let Some(value) = payload.get(*key) else { continue };
        match *key {
            "aliases" => {
                if let Value::Array(items) = value {
                    filtered.insert(key.to_string(), Value::Array(string_items(items)));
                }
            }
            "capabilities" => {
                if value.is_object() {
                    filtered.insert(key.to_string(), value.clone());
                }
            }
            _ => {
                if let Some(text) = value_to_string(value) {
                    filtered.insert(key.to_string(), Value::String(text));
                }
            }
        }
    }
    filtered.entry("aliases").or_insert_with(|| Value::Array(Vec::new()));
    filtered.entry("capabilities").or_insert_with(|| Value::Object(Map::new()));

    let summary = summarize_entity(
        filtered.get("friendly_name").and_then(Value::as_str),
        filtered.get("entity_id").and_then(Value::as_str).unwrap_or("Entity"),
        filtered.get("domain").and_then(Value::as_str),
        filtered.get("area_id").and_then(Value::as_str),
        &string_field(&filtered, "aliases"),
    );
    (filtered, summary)
}

/// Same re-typing for media payloads: list fields coerced to string lists,
/// year coerced to an integer or dropped.
pub(crate) fn filter_media_payload(payload: &Map<String, Value>) -> (Map<String, Value>, String) {
    let mut filtered = Map::new();
    for key in MEDIA_PAYLOAD_FIELDS {
        let Some(value) = payload.get(*key) else { continue };
        if MEDIA_LIST_FIELDS.contains(key) {
            if let Value::Array(items) = value {
                filtered.insert(key.to_string(), Value::Array(string_items(items)));
            }
            continue;
        }
        if *key == "year" {
            if let Some(year) = coerce_year(value) {
                filtered.insert(key.to_string(), Value::Number(year.into()));
            }
            continue;
        }
        if let Some(text) = value_to_string(value) {
            filtered.insert(key.to_string(), Value::String(text));
        }
    }
    for field in MEDIA_LIST_FIELDS {
        filtered.entry(*field).or_insert_with(|| Value::Array(Vec::new()));
    }

    let summary = summarize_media(
        filtered.get("title").and_then(Value::as_str).unwrap_or_default(),
        filtered.get("rating_key").and_then(Value::as_str).unwrap_or("Item"),
        filtered.get("media_type").and_then(Value::as_str),
        filtered.get("year").and_then(Value::as_i64),
        &string_field(&filtered, "collection"),
        &string_field(&filtered, "genres"),
    );
    (filtered, summary)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn string_items(items: &[Value]) -> Vec<Value> {
    items
        .iter()
        .filter_map(value_to_string)
        .filter(|text| !text.is_empty())
        .map(Value::String)
        .collect()
}

fn string_field(map: &Map<String, Value>, key: &str) -> Vec<String> {
    map.get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(value_to_string).collect())
        .unwrap_or_default()
}

fn coerce_year(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}
