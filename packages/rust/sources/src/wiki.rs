//! poewiki.net adapter.
//!
//! MediaWiki article bodies live under `.mw-parser-output`. The lead
//! paragraph becomes the description; the Mechanics, Synergies, and Version
//! history sections are collected by walking the flat child list between
//! headline elements.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Value, json};

use buildlens_shared::config::SourceSettings;
use buildlens_shared::error::FetchError;
use buildlens_shared::types::{LookupKey, Payload, SourceDomain, SourceId};

use crate::limiter::RateBudget;
use crate::{SourceAdapter, get_text, http_client};

const DEFAULT_BASE_URL: &str = "https://www.poewiki.net/wiki";

/// Adapter for poewiki.net (items and skills).
pub struct PoeWikiAdapter {
    client: Client,
    base_url: String,
    budget: RateBudget,
}

impl PoeWikiAdapter {
    pub fn new(settings: &SourceSettings) -> Self {
        Self::with_base_url(settings, DEFAULT_BASE_URL)
    }

    /// Point the adapter at a different host (tests).
    pub fn with_base_url(settings: &SourceSettings, base_url: &str) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            budget: RateBudget::new(
                settings.rate_limit,
                std::time::Duration::from_secs(settings.rate_window_secs),
            ),
        }
    }
}

#[async_trait]
impl SourceAdapter for PoeWikiAdapter {
    fn id(&self) -> SourceId {
        SourceId::PoeWiki
    }

    fn supports(&self, domain: SourceDomain) -> bool {
        matches!(domain, SourceDomain::Item | SourceDomain::Skill)
    }

    async fn fetch(&self, key: &LookupKey) -> std::result::Result<Payload, FetchError> {
        self.budget.acquire().await;
        let url = format!("{}/{}", self.base_url, key.name.replace(' ', "_"));
        tracing::debug!(%key, %url, "fetching wiki article");
        let html = get_text(&self.client, &url).await?;
        parse_article(&html, &key.name, &url)
    }
}

/// The article sections surfaced into the payload, as
/// `(headline fragment, payload key)` pairs.
const SECTIONS: &[(&str, &str)] = &[
    ("Mechanics", "mechanics"),
    ("Synergies", "synergies"),
    ("Version history", "version_history"),
];

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn parse_article(
    html: &str,
    name: &str,
    url: &str,
) -> std::result::Result<Payload, FetchError> {
    let doc = Html::parse_document(html);
    let content_sel = Selector::parse(".mw-parser-output").unwrap();
    let headline_sel = Selector::parse("span.mw-headline").unwrap();
    let li_sel = Selector::parse("li").unwrap();

    let content = doc
        .select(&content_sel)
        .next()
        .ok_or_else(|| FetchError::Parse("no article body on page".into()))?;

    let mut description = String::new();
    let mut sections: Vec<Vec<Value>> = vec![Vec::new(); SECTIONS.len()];
    let mut current: Option<usize> = None;

    // The article body is a flat sequence; headings delimit sections.
    for child in content.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "h2" | "h3" => {
                let headline = child
                    .select(&headline_sel)
                    .next()
                    .map(element_text)
                    .unwrap_or_else(|| element_text(child));
                current = SECTIONS
                    .iter()
                    .position(|(fragment, _)| headline.contains(fragment));
            }
            "p" => {
                let text = element_text(child);
                if text.is_empty() {
                    continue;
                }
                match current {
                    Some(idx) => sections[idx].push(Value::String(text)),
                    None if description.is_empty() => description = text,
                    None => {}
                }
            }
            "ul" => {
                if let Some(idx) = current {
                    for li in child.select(&li_sel) {
                        let text = element_text(li);
                        if !text.is_empty() {
                            sections[idx].push(Value::String(text));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    let mut payload = Payload::new();
    payload.insert("name".into(), json!(name));
    payload.insert("description".into(), Value::String(description));
    for ((_, section_key), values) in SECTIONS.iter().zip(sections) {
        payload.insert((*section_key).into(), Value::Array(values));
    }
    payload.insert("source_url".into(), json!(url));
    Ok(payload)
}
