//! Collector: logs into the members site and fetches the current event list.
//!
//! The whole flow is blocking by design — callers run it on the blocking
//! pool and bound it with a timeout. Each observation builds a fresh client
//! with an empty cookie jar and logs in from scratch.

use crate::config;
use crate::model::Item;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36";

/// Present on every page rendered for a logged-in member.
const LOGIN_MARKER: &str = "logout.php";

static SESSID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"name=["']sessid["']\s+value=["']([^"']+)["']"#).unwrap()
});

static JSONP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)getEventsSelect_cb\((.*)\)").unwrap());

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("login rejected; check collector credentials")]
    Auth,
    #[error("unexpected page shape: {0}")]
    Shape(String),
}

pub trait Collector: Send + Sync {
    fn observe(&self) -> Result<Vec<Item>, CollectorError>;
}

/// Real collector against the members site.
pub struct HttpCollector {
    base_url: String,
    image_base_url: Option<String>,
    username: String,
    password: String,
    timeout: Duration,
}

impl HttpCollector {
    pub fn from_config(cfg: &config::Collector) -> Self {
        Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            image_base_url: cfg
                .image_base_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }

    fn login_page_url(&self) -> String {
        format!("{}/login2.php", self.base_url)
    }
}

impl Collector for HttpCollector {
    fn observe(&self) -> Result<Vec<Item>, CollectorError> {
        let client = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        // The login form carries a hidden session id we must echo back.
        let login_page = client
            .get(self.login_page_url())
            .send()?
            .error_for_status()?
            .text()?;
        let sessid = extract_sessid(&login_page)?;
        debug!("retrieved login session id");

        let form = [
            ("sessid", sessid.as_str()),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("submit", "Login"),
        ];
        let login_response = client
            .post(format!("{}/login.php", self.base_url))
            .header(reqwest::header::REFERER, self.login_page_url())
            .form(&form)
            .send()?
            .error_for_status()?
            .text()?;
        if !login_succeeded(&login_response) {
            return Err(CollectorError::Auth);
        }

        // Millisecond timestamp doubles as a cache buster.
        let timestamp = chrono::Utc::now().timestamp_millis();
        let events_url = format!(
            "{}/account/event_json.php?callback=getEventsSelect_cb&_={timestamp}",
            self.base_url
        );
        let payload = client
            .get(&events_url)
            .header(reqwest::header::REFERER, self.login_page_url())
            .send()?
            .error_for_status()?
            .text()?;

        let records = parse_events(&payload)?;
        debug!(events = records.len(), "fetched event list");
        Ok(items_from_events(
            records,
            &self.base_url,
            self.image_base_url.as_deref(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    #[serde(rename = "e", default)]
    id: String,
    #[serde(rename = "s", default)]
    name: String,
}

fn extract_sessid(html: &str) -> Result<String, CollectorError> {
    SESSID_RE
        .captures(html)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| CollectorError::Shape("login form has no sessid field".into()))
}

fn login_succeeded(html: &str) -> bool {
    html.to_lowercase().contains(LOGIN_MARKER)
}

/// Unwrap the JSONP envelope (`getEventsSelect_cb([...])`) and parse the
/// JSON array inside it.
fn parse_events(payload: &str) -> Result<Vec<EventRecord>, CollectorError> {
    let json = JSONP_RE
        .captures(payload)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| {
            CollectorError::Shape("events response is not the expected JSONP".into())
        })?;
    serde_json::from_str(&json)
        .map_err(|err| CollectorError::Shape(format!("events payload is not a JSON array: {err}")))
}

/// Map event records to items, deriving the detail-page and poster urls from
/// the id. Records with a blank id or a blank/placeholder name are skipped.
/// Duplicate ids collapse to the last record seen.
fn items_from_events(
    records: Vec<EventRecord>,
    base_url: &str,
    image_base_url: Option<&str>,
) -> Vec<Item> {
    let image_base = image_base_url.unwrap_or(base_url);
    let mut items: HashMap<String, Item> = HashMap::new();
    for record in records {
        let id = record.id.trim();
        let name = record.name.trim();
        if id.is_empty() || name.is_empty() || name == "[...]" {
            warn!(id, name, "skipping event with blank id or placeholder name");
            continue;
        }
        items.insert(
            id.to_string(),
            Item {
                id: id.to_string(),
                name: name.to_string(),
                url: format!("{base_url}/account/event_info.php?eid={id}"),
                image_url: Some(format!("{image_base}/images/events/{id}_std.jpg")),
            },
        );
    }
    items.into_values().collect()
}
