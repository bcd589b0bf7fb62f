use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Default per-request timeout for a fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How a document is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Static first, rendered on hard failure.
    #[default]
    Auto,
    /// Plain HTTP GET, no script execution.
    Static,
    /// Full browser rendering.
    Dynamic,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Auto => "auto",
            Strategy::Static => "static",
            Strategy::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Strategy::Auto),
            "static" => Ok(Strategy::Static),
            "dynamic" => Ok(Strategy::Dynamic),
            _ => Err(format!(
                "Invalid scraping method '{s}'. Use auto, static, or dynamic"
            )),
        }
    }
}

/// Built-in element kinds the extractor knows how to pull out of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Title,
    Headings,
    Text,
    Links,
    Images,
    Tables,
}

impl ElementKind {
    pub const ALL: [ElementKind; 6] = [
        ElementKind::Title,
        ElementKind::Headings,
        ElementKind::Text,
        ElementKind::Links,
        ElementKind::Images,
        ElementKind::Tables,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Title => "title",
            ElementKind::Headings => "headings",
            ElementKind::Text => "text",
            ElementKind::Links => "links",
            ElementKind::Images => "images",
            ElementKind::Tables => "tables",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ElementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ElementKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("Unknown element kind: {s}"))
    }
}

/// What to extract from a page: a set of built-in kinds, or a map of
/// output name to CSS selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementSet {
    Kinds(Vec<ElementKind>),
    Custom(BTreeMap<String, String>),
}

impl Default for ElementSet {
    fn default() -> Self {
        ElementSet::Kinds(ElementKind::ALL.to_vec())
    }
}

impl ElementSet {
    /// Parse a list of kind names (`"title"`, `"links"`, ...).
    ///
    /// An empty list selects every kind.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, String> {
        if names.is_empty() {
            return Ok(Self::default());
        }
        let mut kinds = Vec::with_capacity(names.len());
        for name in names {
            let kind: ElementKind = name.as_ref().parse()?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(ElementSet::Kinds(kinds))
    }

    /// Output keys this set produces, in extraction order.
    pub fn names(&self) -> Vec<String> {
        match self {
            ElementSet::Kinds(kinds) => kinds.iter().map(|k| k.as_str().to_string()).collect(),
            ElementSet::Custom(selectors) => selectors.keys().cloned().collect(),
        }
    }
}

/// A single fetch of one target.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    pub strategy: Strategy,
    pub elements: ElementSet,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            strategy: Strategy::default(),
            elements: ElementSet::default(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_elements(mut self, elements: ElementSet) -> Self {
        self.elements = elements;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Outcome of one fetch: per-element values (null where an element failed)
/// or an overall error when the document could not be obtained at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    #[serde(default)]
    pub elements: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Strategy that produced the document, when one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    pub elapsed_ms: u64,
}

impl FetchResult {
    pub fn success(
        elements: BTreeMap<String, serde_json::Value>,
        strategy: Strategy,
        elapsed: Duration,
    ) -> Self {
        Self {
            elements,
            error: None,
            strategy: Some(strategy),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn failure(error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            elements: BTreeMap::new(),
            error: Some(error.into()),
            strategy: None,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Status stored alongside every persisted fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Error,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Success => "success",
            RecordStatus::Error => "error",
        }
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RecordStatus::Success),
            "error" => Ok(RecordStatus::Error),
            _ => Err(format!("Unknown record status: {s}")),
        }
    }
}

/// A persisted fetch, as read back from the store.
#[derive(Debug, Clone, Serialize)]
pub struct FetchRecord {
    pub id: Uuid,
    pub owner: String,
    pub url: String,
    pub strategy: Strategy,
    pub elements: Vec<String>,
    pub result: FetchResult,
    pub status: RecordStatus,
    pub error_message: Option<String>,
    pub elapsed_ms: u64,
    /// SHA-256 of the extracted element map (for change detection)
    pub data_hash: String,
    pub created_at: DateTime<Utc>,
}

/// DTO for inserting a fetch outcome.
///
/// Every save path (sync, async, batch, scheduled) builds one of these
/// through [`NewFetchRecord::from_result`].
#[derive(Debug, Clone, Serialize)]
pub struct NewFetchRecord {
    pub owner: String,
    pub url: String,
    pub strategy: Strategy,
    pub elements: Vec<String>,
    pub result: FetchResult,
    pub status: RecordStatus,
    pub error_message: Option<String>,
    pub elapsed_ms: u64,
    pub data_hash: String,
}

impl NewFetchRecord {
    pub fn from_result(owner: &str, request: &FetchRequest, result: &FetchResult) -> Self {
        let data = serde_json::to_string(&result.elements).unwrap_or_default();
        Self {
            owner: owner.to_string(),
            url: request.url.clone(),
            strategy: request.strategy,
            elements: request.elements.names(),
            result: result.clone(),
            status: if result.is_success() {
                RecordStatus::Success
            } else {
                RecordStatus::Error
            },
            error_message: result.error.clone(),
            elapsed_ms: result.elapsed_ms,
            data_hash: compute_hash(&data),
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
