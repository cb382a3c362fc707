//! Core domain model and provenance types for the catalog sync engine.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "catsync-core";

/// Which half of the provider catalog a run synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFlavor {
    Events,
    Attractions,
}

impl SyncFlavor {
    pub fn table(self) -> CatalogTable {
        match self {
            SyncFlavor::Events => CatalogTable::Events,
            SyncFlavor::Attractions => CatalogTable::Attractions,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncFlavor::Events => "events",
            SyncFlavor::Attractions => "attractions",
        }
    }
}

impl fmt::Display for SyncFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination table. Each flavor owns exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogTable {
    Events,
    Attractions,
}

impl CatalogTable {
    pub fn as_str(self) -> &'static str {
        match self {
            CatalogTable::Events => "events",
            CatalogTable::Attractions => "attractions",
        }
    }
}

impl fmt::Display for CatalogTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ties a canonical record back to the external listing it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub source_external_id: String,
}

impl Provenance {
    pub fn new(source: impl Into<String>, source_external_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_external_id: source_external_id.into(),
        }
    }
}

/// Raw price as the provider sends it. Non-positive values are sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawPrice {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Provider-defined listing shape. Read-only; only the fields the engine uses are modeled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    #[serde(deserialize_with = "deserialize_external_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub end: Option<i64>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub price: Option<RawPrice>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub is_attraction: bool,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub booking_url: Option<String>,
}

impl RawListing {
    /// Minimal listing used by tests and fixtures; every optional field empty.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            description: None,
            start: None,
            end: None,
            timezone: None,
            price: None,
            images: Vec::new(),
            status: None,
            url: None,
            city: None,
            is_attraction: false,
            rating: None,
            venue: None,
            booking_url: None,
        }
    }
}

/// Provider ids arrive as numbers or strings; both are kept as their decimal/string form.
fn deserialize_external_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ExternalId {
        Int(i64),
        Str(String),
    }

    match ExternalId::deserialize(deserializer)? {
        ExternalId::Int(n) => Ok(n.to_string()),
        ExternalId::Str(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Err(de::Error::custom("external id must not be empty"))
            } else {
                Ok(trimmed.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: f64,
    pub currency: String,
}

/// Local calendar view of an event instant, in the listing's own timezone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSchedule {
    pub timezone: String,
    pub starts_at: DateTime<Utc>,
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_date: Option<NaiveDate>,
    pub end_time: Option<NaiveTime>,
}

/// Transformer output: everything the engine owns about a record, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordCandidate {
    pub provenance: Provenance,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub category: String,
    pub price: Option<Price>,
    pub rating: Option<f64>,
    pub image_url: Option<String>,
    pub gallery: Vec<String>,
    pub booking_url: Option<String>,
    pub affiliate_url: Option<String>,
    pub venue: Option<String>,
    pub schedule: Option<EventSchedule>,
}

/// Canonical persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: Uuid,
    pub provenance: Provenance,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub category: String,
    pub price: Option<Price>,
    pub rating: Option<f64>,
    pub image_url: Option<String>,
    pub gallery: Vec<String>,
    pub booking_url: Option<String>,
    pub affiliate_url: Option<String>,
    pub venue: Option<String>,
    pub schedule: Option<EventSchedule>,
    pub is_active: bool,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalRecord {
    /// New rows start active and never featured.
    pub fn from_candidate(candidate: RecordCandidate, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provenance: candidate.provenance,
            title: candidate.title,
            slug: candidate.slug,
            description: candidate.description,
            category: candidate.category,
            price: candidate.price,
            rating: candidate.rating,
            image_url: candidate.image_url,
            gallery: candidate.gallery,
            booking_url: candidate.booking_url,
            affiliate_url: candidate.affiliate_url,
            venue: candidate.venue,
            schedule: candidate.schedule,
            is_active: true,
            is_featured: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply_update(&mut self, update: &RecordUpdate) {
        self.title = update.title.clone();
        self.slug = update.slug.clone();
        self.description = update.description.clone();
        self.category = update.category.clone();
        self.price = update.price.clone();
        self.rating = update.rating;
        self.image_url = update.image_url.clone();
        self.gallery = update.gallery.clone();
        self.booking_url = update.booking_url.clone();
        self.affiliate_url = update.affiliate_url.clone();
        self.venue = update.venue.clone();
        self.schedule = update.schedule.clone();
        self.is_active = true;
        self.updated_at = update.updated_at;
    }
}

/// Engine-owned fields only. Carries neither `is_featured` nor `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub category: String,
    pub price: Option<Price>,
    pub rating: Option<f64>,
    pub image_url: Option<String>,
    pub gallery: Vec<String>,
    pub booking_url: Option<String>,
    pub affiliate_url: Option<String>,
    pub venue: Option<String>,
    pub schedule: Option<EventSchedule>,
    pub updated_at: DateTime<Utc>,
}

impl RecordUpdate {
    pub fn from_candidate(candidate: RecordCandidate, now: DateTime<Utc>) -> Self {
        Self {
            title: candidate.title,
            slug: candidate.slug,
            description: candidate.description,
            category: candidate.category,
            price: candidate.price,
            rating: candidate.rating,
            image_url: candidate.image_url,
            gallery: candidate.gallery,
            booking_url: candidate.booking_url,
            affiliate_url: candidate.affiliate_url,
            venue: candidate.venue,
            schedule: candidate.schedule,
            updated_at: now,
        }
    }
}
