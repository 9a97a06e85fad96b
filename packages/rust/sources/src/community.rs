//! Community discussion adapters: Reddit search and the official forums.
//!
//! Both serve the community-topic domain; the forum adapter also tracks the
//! patch-notes announcement subforum. Discussions are noisy, so payloads
//! keep a handful of top results with truncated bodies rather than full
//! threads.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Value, json};
use url::Url;

use buildlens_shared::config::SourceSettings;
use buildlens_shared::error::FetchError;
use buildlens_shared::types::{LookupKey, Payload, SourceDomain, SourceId};

use crate::limiter::RateBudget;
use crate::{SourceAdapter, get_text, http_client};

const REDDIT_BASE_URL: &str = "https://www.reddit.com";
const FORUM_BASE_URL: &str = "https://www.pathofexile.com";
const SUBREDDIT: &str = "pathofexile2";
const PATCH_FORUM_PATH: &str = "/forum/view-forum/2212";
const PATCH_KEYWORDS: &[&str] = &["patch", "hotfix", "update", "notes"];
const RESULT_LIMIT: usize = 5;
const BODY_LIMIT: usize = 500;

fn truncate_body(text: &str) -> String {
    text.chars().take(BODY_LIMIT).collect()
}

// ---------------------------------------------------------------------------
// Reddit
// ---------------------------------------------------------------------------

/// Adapter for r/pathofexile2 search (community topics).
pub struct RedditAdapter {
    client: Client,
    base_url: String,
    budget: RateBudget,
}

impl RedditAdapter {
    pub fn new(settings: &SourceSettings) -> Self {
        Self::with_base_url(settings, REDDIT_BASE_URL)
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
impl SourceAdapter for RedditAdapter {
    fn id(&self) -> SourceId {
        SourceId::Reddit
    }

    fn supports(&self, domain: SourceDomain) -> bool {
        matches!(domain, SourceDomain::CommunityTopic)
    }

    async fn fetch(&self, key: &LookupKey) -> std::result::Result<Payload, FetchError> {
        self.budget.acquire().await;

        let mut url = Url::parse(&format!("{}/r/{SUBREDDIT}/search.json", self.base_url))
            .map_err(|e| FetchError::Unreachable(format!("bad search url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("q", &key.name)
            .append_pair("restrict_sr", "on")
            .append_pair("sort", "relevance")
            .append_pair("t", "all")
            .append_pair("limit", &RESULT_LIMIT.to_string());

        tracing::debug!(%key, %url, "searching subreddit");
        let body = get_text(&self.client, url.as_str()).await?;
        let listing: Value = serde_json::from_str(&body)
            .map_err(|e| FetchError::Parse(format!("reddit listing decode: {e}")))?;

        let children = listing["data"]["children"]
            .as_array()
            .ok_or_else(|| FetchError::Parse("reddit listing has no children".into()))?;

        let posts: Vec<Value> = children
            .iter()
            .take(RESULT_LIMIT)
            .filter_map(|child| {
                let post = child.get("data")?;
                Some(json!({
                    "title": post["title"].as_str().unwrap_or_default(),
                    "url": format!(
                        "https://reddit.com{}",
                        post["permalink"].as_str().unwrap_or_default()
                    ),
                    "score": post["score"].as_i64().unwrap_or(0),
                    "num_comments": post["num_comments"].as_i64().unwrap_or(0),
                    "created_utc": post["created_utc"].as_f64().unwrap_or(0.0),
                    "selftext": truncate_body(post["selftext"].as_str().unwrap_or_default()),
                }))
            })
            .collect();

        let mut payload = Payload::new();
        payload.insert("search_term".into(), json!(key.name));
        payload.insert("subreddit".into(), json!(SUBREDDIT));
        payload.insert("posts".into(), Value::Array(posts));
        Ok(payload)
    }
}

// ---------------------------------------------------------------------------
// Official forum
// ---------------------------------------------------------------------------

/// Adapter for the official forums: topic search plus the patch-notes
/// announcement feed.
pub struct ForumAdapter {
    client: Client,
    base_url: String,
    budget: RateBudget,
}

impl ForumAdapter {
    pub fn new(settings: &SourceSettings) -> Self {
        Self::with_base_url(settings, FORUM_BASE_URL)
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
impl SourceAdapter for ForumAdapter {
    fn id(&self) -> SourceId {
        SourceId::Forum
    }

    fn supports(&self, domain: SourceDomain) -> bool {
        matches!(
            domain,
            SourceDomain::CommunityTopic | SourceDomain::PatchNotes
        )
    }

    async fn fetch(&self, key: &LookupKey) -> std::result::Result<Payload, FetchError> {
        self.budget.acquire().await;
        match key.domain {
            SourceDomain::PatchNotes => self.fetch_patch_notes(key).await,
            _ => self.search_posts(key).await,
        }
    }
}

impl ForumAdapter {
    async fn search_posts(&self, key: &LookupKey) -> std::result::Result<Payload, FetchError> {
        let mut url = Url::parse(&format!("{}/forum/search", self.base_url))
            .map_err(|e| FetchError::Unreachable(format!("bad search url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("q", &key.name)
            .append_pair("forum", "poe2")
            .append_pair("sort", "relevance");

        tracing::debug!(%key, %url, "searching forum");
        let html = get_text(&self.client, url.as_str()).await?;
        parse_forum_results(&html, &key.name)
    }

    /// The announcement subforum lists threads newest-first; the first one
    /// whose title carries a patch keyword is the current patch.
    async fn fetch_patch_notes(&self, key: &LookupKey) -> std::result::Result<Payload, FetchError> {
        let listing_url = format!("{}{PATCH_FORUM_PATH}", self.base_url);
        tracing::debug!(%key, url = %listing_url, "listing patch-note threads");
        let html = get_text(&self.client, &listing_url).await?;

        let threads = parse_patch_threads(&html);
        let Some((title, href)) = threads.first().cloned() else {
            return Err(FetchError::NotFound);
        };

        let thread_url = if href.starts_with("http") {
            href
        } else {
            format!("{}{href}", self.base_url)
        };
        let thread_html = get_text(&self.client, &thread_url).await?;
        let (date, summary) = parse_patch_thread(&thread_html);

        let recent: Vec<Value> = threads
            .iter()
            .skip(1)
            .take(RESULT_LIMIT - 1)
            .map(|(t, _)| json!(t))
            .collect();

        let mut payload = Payload::new();
        payload.insert("title".into(), json!(title));
        payload.insert("date".into(), json!(date));
        payload.insert("summary".into(), json!(summary));
        payload.insert("recent_titles".into(), Value::Array(recent));
        payload.insert("source_url".into(), json!(thread_url));
        Ok(payload)
    }
}

/// Patch-note threads from the subforum listing: (title, href), filtered
/// to titles that look like patch announcements.
fn parse_patch_threads(html: &str) -> Vec<(String, String)> {
    let doc = Html::parse_document(html);
    let thread_sel = Selector::parse("div.thread").unwrap();
    let title_sel = Selector::parse("div.title a, a.thread_title").unwrap();

    let mut threads = Vec::new();
    for thread in doc.select(&thread_sel) {
        let Some(link) = thread.select(&title_sel).next() else {
            continue;
        };
        let title = element_text(link);
        let lowered = title.to_lowercase();
        if !PATCH_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            continue;
        }
        let href = link.value().attr("href").unwrap_or_default().to_string();
        threads.push((title, href));
    }
    threads
}

/// Date and first-post summary from a patch thread page.
fn parse_patch_thread(html: &str) -> (String, String) {
    let doc = Html::parse_document(html);
    let content_sel = Selector::parse("div.content").unwrap();
    let date_sel = Selector::parse("span.post_date").unwrap();

    let summary = doc
        .select(&content_sel)
        .next()
        .map(|el| truncate_body(&element_text(el)))
        .unwrap_or_default();
    let date = doc
        .select(&date_sel)
        .next()
        .map(element_text)
        .unwrap_or_else(|| "Unknown".into());
    (date, summary)
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn parse_forum_results(html: &str, search_term: &str) -> std::result::Result<Payload, FetchError> {
    let doc = Html::parse_document(html);
    let post_sel = Selector::parse("div.forumPost").unwrap();
    let title_sel = Selector::parse("div.title").unwrap();
    let link_sel = Selector::parse("div.title a").unwrap();
    let content_sel = Selector::parse("div.content").unwrap();
    let author_sel = Selector::parse("div.author").unwrap();

    let mut posts = Vec::new();
    for post in doc.select(&post_sel).take(RESULT_LIMIT) {
        let (Some(title), Some(content)) = (
            post.select(&title_sel).next().map(element_text),
            post.select(&content_sel).next().map(element_text),
        ) else {
            continue;
        };
        let url = post
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .unwrap_or_default();
        let author = post
            .select(&author_sel)
            .next()
            .map(element_text)
            .unwrap_or_else(|| "Unknown".into());
        posts.push(json!({
            "title": title,
            "url": url,
            "content": truncate_body(&content),
            "author": author,
        }));
    }

    let mut payload = Payload::new();
    payload.insert("search_term".into(), json!(search_term));
    payload.insert("posts".into(), Value::Array(posts));
    Ok(payload)
}
