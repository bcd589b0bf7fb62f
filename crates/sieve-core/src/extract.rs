//! Structured content extraction from a parsed HTML document.
//!
//! Every element kind maps to one pure function over [`Html`]. Kinds are
//! extracted independently: an error (or panic) in one kind yields `null`
//! for that kind and never affects the others.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::Value;

use crate::error::ExtractionError;
use crate::models::{ElementKind, ElementSet};

/// Paragraph-like blocks at or below this many characters are dropped.
const MIN_TEXT_BLOCK_CHARS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Headings {
    pub h1: Vec<String>,
    pub h2: Vec<String>,
    pub h3: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub text: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    pub alt: String,
    pub src: String,
}

/// Rows of trimmed cell texts.
pub type Table = Vec<Vec<String>>;

/// Parse raw HTML and extract the requested elements.
pub fn extract_html(html: &str, elements: &ElementSet) -> BTreeMap<String, Value> {
    let document = Html::parse_document(html);
    extract(&document, elements)
}

/// Extract the requested elements from an already-parsed document.
pub fn extract(document: &Html, elements: &ElementSet) -> BTreeMap<String, Value> {
    match elements {
        ElementSet::Kinds(kinds) => kinds
            .iter()
            .map(|kind| {
                let value = isolate(kind.as_str(), || extract_kind(document, *kind));
                (kind.as_str().to_string(), value)
            })
            .collect(),
        ElementSet::Custom(selectors) => selectors
            .iter()
            .map(|(name, css)| {
                let value = isolate(name, || custom(document, css));
                (name.clone(), value)
            })
            .collect(),
    }
}

fn isolate<F>(label: &str, f: F) -> Value
where
    F: FnOnce() -> Result<Value, ExtractionError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            tracing::warn!(element = %label, error = %e, "Element extraction failed");
            Value::Null
        }
        Err(_) => {
            let e = ExtractionError::Panicked(label.to_string());
            tracing::error!(element = %label, error = %e, "Element extraction failed");
            Value::Null
        }
    }
}

fn extract_kind(document: &Html, kind: ElementKind) -> Result<Value, ExtractionError> {
    match kind {
        ElementKind::Title => Ok(title(document)?.map_or(Value::Null, Value::String)),
        ElementKind::Headings => encode(kind, headings(document)?),
        ElementKind::Text => encode(kind, text_blocks(document)?),
        ElementKind::Links => encode(kind, links(document)?),
        ElementKind::Images => encode(kind, images(document)?),
        ElementKind::Tables => encode(kind, tables(document)?),
    }
}

fn encode<T: Serialize>(kind: ElementKind, value: T) -> Result<Value, ExtractionError> {
    serde_json::to_value(value).map_err(|e| ExtractionError::Encode {
        kind: kind.to_string(),
        message: e.to_string(),
    })
}

fn selector(css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|_| ExtractionError::InvalidSelector(css.to_string()))
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// First `<title>` text, trimmed.
pub fn title(document: &Html) -> Result<Option<String>, ExtractionError> {
    let sel = selector("title")?;
    Ok(document.select(&sel).next().map(|el| element_text(&el)))
}

pub fn headings(document: &Html) -> Result<Headings, ExtractionError> {
    let level = |tag: &str| -> Result<Vec<String>, ExtractionError> {
        let sel = selector(tag)?;
        Ok(document
            .select(&sel)
            .map(|el| element_text(&el))
            .filter(|text| !text.is_empty())
            .collect())
    };

    Ok(Headings {
        h1: level("h1")?,
        h2: level("h2")?,
        h3: level("h3")?,
    })
}

pub fn text_blocks(document: &Html) -> Result<Vec<String>, ExtractionError> {
    let sel = selector("p, article, section")?;
    Ok(document
        .select(&sel)
        .map(|el| element_text(&el))
        .filter(|text| text.chars().count() > MIN_TEXT_BLOCK_CHARS)
        .collect())
}

pub fn links(document: &Html) -> Result<Vec<Link>, ExtractionError> {
    let sel = selector("a")?;
    Ok(document
        .select(&sel)
        .filter_map(|el| {
            let href = el.value().attr("href").filter(|h| !h.is_empty())?;
            let text = element_text(&el);
            (!text.is_empty()).then(|| Link {
                text,
                href: href.to_string(),
            })
        })
        .collect())
}

pub fn images(document: &Html) -> Result<Vec<Image>, ExtractionError> {
    let sel = selector("img")?;
    Ok(document
        .select(&sel)
        .filter_map(|el| {
            let src = el.value().attr("src").filter(|s| !s.is_empty())?;
            Some(Image {
                alt: el.value().attr("alt").unwrap_or_default().trim().to_string(),
                src: src.to_string(),
            })
        })
        .collect())
}

pub fn tables(document: &Html) -> Result<Vec<Table>, ExtractionError> {
    let table_sel = selector("table")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("td, th")?;

    Ok(document
        .select(&table_sel)
        .map(|table| {
            table
                .select(&row_sel)
                .map(|row| {
                    row.select(&cell_sel)
                        .map(|cell| element_text(&cell))
                        .collect::<Vec<_>>()
                })
                .filter(|cells| !cells.is_empty())
                .collect()
        })
        .collect())
}

/// Trimmed, non-empty texts of every element matching a caller-supplied selector.
fn custom(document: &Html, css: &str) -> Result<Value, ExtractionError> {
    let sel = selector(css)?;
    let texts: Vec<String> = document
        .select(&sel)
        .map(|el| element_text(&el))
        .filter(|text| !text.is_empty())
        .collect();
    Ok(Value::from(texts))
}
