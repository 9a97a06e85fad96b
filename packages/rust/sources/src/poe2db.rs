//! poe2db.tw adapter.
//!
//! Entity pages are `/us/<slug>`. Gem and item data lives in a popup card
//! (`.newItemPopup`): name, type line, gem tags, properties, requirements,
//! description, implicit/explicit mods. Level-scaling data sits outside the
//! card in a `Level Effect` table, flattened here into pipe-separated text.
//! Unique item slugs are unreliable, so several candidate slugs are tried
//! before giving up.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Value, json};

use buildlens_shared::config::SourceSettings;
use buildlens_shared::error::FetchError;
use buildlens_shared::types::{LookupKey, Payload, SourceDomain, SourceId};

use crate::limiter::RateBudget;
use crate::{SourceAdapter, get_text, http_client};

const DEFAULT_BASE_URL: &str = "https://poe2db.tw/us";

/// Adapter for poe2db.tw (items, skills, passives).
pub struct Poe2DbAdapter {
    client: Client,
    base_url: String,
    budget: RateBudget,
}

impl Poe2DbAdapter {
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
impl SourceAdapter for Poe2DbAdapter {
    fn id(&self) -> SourceId {
        SourceId::Poe2Db
    }

    fn supports(&self, domain: SourceDomain) -> bool {
        matches!(
            domain,
            SourceDomain::Item | SourceDomain::Skill | SourceDomain::Passive
        )
    }

    async fn fetch(&self, key: &LookupKey) -> std::result::Result<Payload, FetchError> {
        let unique = key.disambiguator.as_deref() == Some("unique");
        for slug in slug_candidates(&key.name, unique) {
            self.budget.acquire().await;
            let url = format!("{}/{slug}", self.base_url);
            tracing::debug!(%key, %url, "fetching poe2db page");
            match get_text(&self.client, &url).await {
                Ok(html) => return parse_card(&html, &url),
                // A missing slug just means the next candidate gets a turn.
                Err(FetchError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(FetchError::NotFound)
    }
}

/// Candidate URL slugs for a name, in the order they are tried.
fn slug_candidates(name: &str, unique: bool) -> Vec<String> {
    let underscored = name.replace(' ', "_");
    let mut candidates = vec![underscored.clone()];
    if unique {
        candidates.push(underscored.replace('_', "-"));
        candidates.push(underscored.replace('_', ""));
        candidates.push(format!("{underscored}-unique"));
    }
    candidates
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Extract the popup card and level table into a payload.
fn parse_card(html: &str, url: &str) -> std::result::Result<Payload, FetchError> {
    let doc = Html::parse_document(html);

    let card_sel = Selector::parse(".newItemPopup").unwrap();
    let card = doc
        .select(&card_sel)
        .next()
        .ok_or_else(|| FetchError::Parse("no item card on page".into()))?;

    let name_sel = Selector::parse(".itemName .lc").unwrap();
    let name = card
        .select(&name_sel)
        .next()
        .map(element_text)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| FetchError::Parse("item card has no name".into()))?;

    let type_sel = Selector::parse(".typeLine .lc").unwrap();
    let category = card.select(&type_sel).next().map(element_text);

    let tags_sel = Selector::parse("a.GemTags").unwrap();
    let tags: Vec<Value> = card
        .select(&tags_sel)
        .map(|el| Value::String(element_text(el)))
        .collect();

    // The tag row is itself a .property; keep only the textual ones.
    let property_sel = Selector::parse(".Stats .property").unwrap();
    let properties: Vec<Value> = card
        .select(&property_sel)
        .filter(|el| el.select(&tags_sel).next().is_none())
        .map(|el| Value::String(element_text(el)))
        .collect();

    let requirements_sel = Selector::parse(".Stats .requirements").unwrap();
    let requirements: Vec<String> = card.select(&requirements_sel).map(element_text).collect();

    let description_sel = Selector::parse(".secDescrText").unwrap();
    let description = card.select(&description_sel).next().map(element_text);

    let implicit_sel = Selector::parse(".implicitMod").unwrap();
    let implicit_mods: Vec<Value> = card
        .select(&implicit_sel)
        .map(|el| Value::String(element_text(el)))
        .collect();

    let explicit_sel = Selector::parse(".explicitMod").unwrap();
    let explicit_mods: Vec<Value> = card
        .select(&explicit_sel)
        .map(|el| Value::String(element_text(el)))
        .collect();

    let mut payload = Payload::new();
    payload.insert("name".into(), Value::String(name));
    if let Some(category) = category {
        payload.insert("category".into(), Value::String(category));
    }
    payload.insert("tags".into(), Value::Array(tags));
    payload.insert("properties".into(), Value::Array(properties));
    if !requirements.is_empty() {
        payload.insert("requirements".into(), Value::String(requirements.join(" | ")));
    }
    if let Some(description) = description {
        payload.insert("description".into(), Value::String(description));
    }
    payload.insert("implicit_mods".into(), Value::Array(implicit_mods));
    payload.insert("explicit_mods".into(), Value::Array(explicit_mods));
    if let Some(table) = level_table(&doc) {
        payload.insert("level_table".into(), Value::String(table));
    }
    payload.insert("source_url".into(), json!(url));

    Ok(payload)
}

/// Find the `Level Effect` card and flatten its table to pipe-separated
/// lines.
fn level_table(doc: &Html) -> Option<String> {
    let card_sel = Selector::parse("div.card").unwrap();
    let header_sel = Selector::parse("h5.card-header").unwrap();
    let table_sel = Selector::parse("table").unwrap();

    for card in doc.select(&card_sel) {
        let is_level_card = card
            .select(&header_sel)
            .next()
            .map(|h| element_text(h).contains("Level Effect"))
            .unwrap_or(false);
        if !is_level_card {
            continue;
        }
        let table = card.select(&table_sel).next()?;
        return Some(flatten_table(table));
    }
    None
}

fn flatten_table(table: ElementRef<'_>) -> String {
    let th_sel = Selector::parse("th").unwrap();
    let tr_sel = Selector::parse("tbody tr, table > tr").unwrap();
    let td_sel = Selector::parse("td").unwrap();

    let mut lines = Vec::new();
    let headers: Vec<String> = table.select(&th_sel).map(element_text).collect();
    if !headers.is_empty() {
        lines.push(headers.join(" | "));
    }
    for row in table.select(&tr_sel) {
        let cells: Vec<String> = row.select(&td_sel).map(element_text).collect();
        if cells.iter().any(|c| !c.is_empty()) {
            lines.push(cells.join(" | "));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FIREBALL_PAGE: &str = r#"<html><body>
<div class="newItemPopup gemPopup">
  <div class="itemName"><span class="lc">Fireball</span></div>
  <div class="typeLine"><span class="lc"><a href="/us/Spell">Spell</a></span></div>
  <div class="Stats">
    <div class="property"><a class="GemTags">Fire</a><a class="GemTags">Projectile</a></div>
    <div class="property">Cast Time: 0.85 sec</div>
    <div class="requirements">Requires Level 1</div>
    <div class="secDescrText">Launches a fiery projectile that explodes on impact.</div>
    <div class="explicitMod">Deals 9 to 14 Fire Damage</div>
  </div>
</div>
<div class="card">
  <h5 class="card-header">Level Effect /40</h5>
  <table>
    <thead><tr><th>Level</th><th>Damage</th></tr></thead>
    <tbody><tr><td>1</td><td>9-14</td></tr><tr><td>2</td><td>11-17</td></tr></tbody>
  </table>
</div>
</body></html>"#;

    fn test_settings() -> SourceSettings {
        SourceSettings {
            rate_limit: 0,
            ..SourceSettings::default()
        }
    }

    #[tokio::test]
    async fn extracts_gem_card() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Fireball"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FIREBALL_PAGE))
            .mount(&server)
            .await;

        let adapter = Poe2DbAdapter::with_base_url(&test_settings(), &server.uri());
        let key = LookupKey::new(SourceDomain::Skill, "Fireball");
        let payload = adapter.fetch(&key).await.expect("fetch");

        assert_eq!(payload["name"], "Fireball");
        assert_eq!(payload["category"], "Spell");
        assert_eq!(payload["tags"], json!(["Fire", "Projectile"]));
        assert_eq!(payload["properties"], json!(["Cast Time: 0.85 sec"]));
        assert_eq!(payload["requirements"], "Requires Level 1");
        assert_eq!(
            payload["explicit_mods"],
            json!(["Deals 9 to 14 Fire Damage"])
        );
        let table = payload["level_table"].as_str().expect("level table");
        assert!(table.starts_with("Level | Damage"));
        assert!(table.contains("2 | 11-17"));
    }

    #[tokio::test]
    async fn unique_item_falls_back_through_slug_candidates() {
        let server = MockServer::start().await;
        // Standard slug missing, hyphenated one resolves.
        Mock::given(method("GET"))
            .and(path("/Tabula_Rasa"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let unique_page = FIREBALL_PAGE.replace("Fireball", "Tabula Rasa");
        Mock::given(method("GET"))
            .and(path("/Tabula-Rasa"))
            .respond_with(ResponseTemplate::new(200).set_body_string(unique_page))
            .mount(&server)
            .await;

        let adapter = Poe2DbAdapter::with_base_url(&test_settings(), &server.uri());
        let key = LookupKey::with_disambiguator(SourceDomain::Item, "Tabula Rasa", "unique");
        let payload = adapter.fetch(&key).await.expect("fetch");
        assert_eq!(payload["name"], "Tabula Rasa");
    }

    #[tokio::test]
    async fn exhausted_candidates_are_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let adapter = Poe2DbAdapter::with_base_url(&test_settings(), &server.uri());
        let key = LookupKey::with_disambiguator(SourceDomain::Item, "No Such Item", "unique");
        assert!(matches!(
            adapter.fetch(&key).await,
            Err(FetchError::NotFound)
        ));
    }

    #[tokio::test]
    async fn page_without_card_is_a_parse_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><body>nothing</body></html>"),
            )
            .mount(&server)
            .await;

        let adapter = Poe2DbAdapter::with_base_url(&test_settings(), &server.uri());
        let key = LookupKey::new(SourceDomain::Skill, "Fireball");
        assert!(matches!(
            adapter.fetch(&key).await,
            Err(FetchError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn server_errors_are_unreachable_and_not_retried_here() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = Poe2DbAdapter::with_base_url(&test_settings(), &server.uri());
        let key = LookupKey::new(SourceDomain::Skill, "Fireball");
        assert!(matches!(
            adapter.fetch(&key).await,
            Err(FetchError::Unreachable(_))
        ));
    }
}
