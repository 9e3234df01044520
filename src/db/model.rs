//! Row models returned by the repositories. Keep these focused on the data
//! shape of the queries; business logic lives in higher layers.

use chrono::{DateTime, Utc};

/// One row of the all-time catalog. `first_seen` is set by the database at
/// first insertion and never updated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub url: String,
    pub image_url: Option<String>,
    pub first_seen: DateTime<Utc>,
}
