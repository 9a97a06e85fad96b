//! Source adapters for BuildLens enrichment.
//!
//! Each external data source (poe2db.tw, poewiki.net, Reddit, the official
//! forums) is wrapped in a [`SourceAdapter`]: it owns its request shape, its
//! page-format knowledge, and its rate budget, and reports failures through
//! the [`FetchError`] taxonomy. Adapters never retry and never touch the
//! cache; the fetch coordinator owns both policies.

pub mod community;
pub mod limiter;
pub mod poe2db;
pub mod wiki;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use buildlens_shared::config::{AppConfig, USER_AGENT};
use buildlens_shared::error::FetchError;
use buildlens_shared::types::{LookupKey, Payload, SourceDomain, SourceId};

pub use community::{ForumAdapter, RedditAdapter};
pub use limiter::RateBudget;
pub use poe2db::Poe2DbAdapter;
pub use wiki::PoeWikiAdapter;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One external data source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Which source this adapter speaks for.
    fn id(&self) -> SourceId;

    /// Whether this source carries data for the given entity kind.
    fn supports(&self, domain: SourceDomain) -> bool;

    /// Fetch the source's data for one entity. Exactly one attempt; the
    /// adapter waits on its rate budget before sending the request.
    async fn fetch(&self, key: &LookupKey) -> std::result::Result<Payload, FetchError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds enabled adapters in priority order (most trusted first).
pub struct SourceRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    /// Build the registry from config: every enabled source, in priority
    /// order.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
        if config.sources.poe2db.enabled {
            adapters.push(Arc::new(Poe2DbAdapter::new(&config.sources.poe2db)));
        }
        if config.sources.wiki.enabled {
            adapters.push(Arc::new(PoeWikiAdapter::new(&config.sources.wiki)));
        }
        if config.sources.reddit.enabled {
            adapters.push(Arc::new(RedditAdapter::new(&config.sources.reddit)));
        }
        if config.sources.forum.enabled {
            adapters.push(Arc::new(ForumAdapter::new(&config.sources.forum)));
        }
        Self { adapters }
    }

    /// Build a registry from explicit adapters (tests, custom wiring).
    pub fn with_adapters(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self { adapters }
    }

    /// Adapters that carry data for a domain, in priority order.
    pub fn adapters_for(&self, domain: SourceDomain) -> Vec<Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .filter(|a| a.supports(domain))
            .cloned()
            .collect()
    }

    /// All registered adapters.
    pub fn all(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.adapters
    }
}

// ---------------------------------------------------------------------------
// Shared HTTP plumbing
// ---------------------------------------------------------------------------

/// Build the HTTP client every adapter uses.
pub(crate) fn http_client() -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(15))
        .build()
        .unwrap_or_default()
}

/// Send a GET and map the outcome into the fetch taxonomy.
pub(crate) async fn get_text(
    client: &Client,
    url: &str,
) -> std::result::Result<String, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::Unreachable(e.to_string()))?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(FetchError::NotFound);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(FetchError::RateLimited { retry_after });
    }
    if !status.is_success() {
        return Err(FetchError::Unreachable(format!("HTTP {status}")));
    }

    response
        .text()
        .await
        .map_err(|e| FetchError::Unreachable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_respects_enablement_and_priority() {
        let mut config = AppConfig::default();
        config.sources.reddit.enabled = false;

        let registry = SourceRegistry::from_config(&config);
        let ids: Vec<SourceId> = registry.all().iter().map(|a| a.id()).collect();
        assert_eq!(ids, vec![SourceId::Poe2Db, SourceId::PoeWiki, SourceId::Forum]);
    }

    #[tokio::test]
    async fn adapters_for_filters_by_domain() {
        let registry = SourceRegistry::from_config(&AppConfig::default());

        let skill_sources: Vec<SourceId> = registry
            .adapters_for(SourceDomain::Skill)
            .iter()
            .map(|a| a.id())
            .collect();
        assert_eq!(skill_sources, vec![SourceId::Poe2Db, SourceId::PoeWiki]);

        let topic_sources: Vec<SourceId> = registry
            .adapters_for(SourceDomain::CommunityTopic)
            .iter()
            .map(|a| a.id())
            .collect();
        assert_eq!(topic_sources, vec![SourceId::Reddit, SourceId::Forum]);

        let passive_sources: Vec<SourceId> = registry
            .adapters_for(SourceDomain::Passive)
            .iter()
            .map(|a| a.id())
            .collect();
        assert_eq!(passive_sources, vec![SourceId::Poe2Db]);

        let patch_sources: Vec<SourceId> = registry
            .adapters_for(SourceDomain::PatchNotes)
            .iter()
            .map(|a| a.id())
            .collect();
        assert_eq!(patch_sources, vec![SourceId::Forum]);
    }

    #[tokio::test]
    async fn get_text_maps_statuses() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/ok"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::path("/missing"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::path("/busy"))
            .respond_with(
                wiremock::ResponseTemplate::new(429).insert_header("retry-after", "7"),
            )
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::path("/broken"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = http_client();
        let base = server.uri();

        assert_eq!(get_text(&client, &format!("{base}/ok")).await.unwrap(), "hello");
        assert!(matches!(
            get_text(&client, &format!("{base}/missing")).await,
            Err(FetchError::NotFound)
        ));
        assert!(matches!(
            get_text(&client, &format!("{base}/busy")).await,
            Err(FetchError::RateLimited {
                retry_after: Some(d)
            }) if d == Duration::from_secs(7)
        ));
        assert!(matches!(
            get_text(&client, &format!("{base}/broken")).await,
            Err(FetchError::Unreachable(_))
        ));
    }
}
