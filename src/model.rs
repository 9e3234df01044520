use serde::{Deserialize, Serialize};

/// One observed listing. Identity is `id`; the descriptive fields may be
/// overwritten on re-observation but the id never changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub url: String,
    pub image_url: Option<String>,
}

/// A member of the notification audience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub id: i64,
    pub username: Option<String>,
}

/// Counters reported by one completed pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub observed: usize,
    pub new: usize,
}
