//! RSS collector: polls the aggregator's category feeds, drops entries the
//! store already has, enriches new ones with an OGP image, embeds them and
//! upserts. Articles are shared rows, written only from here.

use std::sync::LazyLock;
use std::time::Duration;

use axum::{Router, extract::State, routing::post};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use futures::stream::StreamExt;
use pgvector::Vector;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{App, error::AppError, models::article::NewArticle};

pub mod embedder;

/// The aggregator's category feeds, polled as one batch per cycle.
pub const FEEDS: [&str; 13] = [
    "https://news.ceek.jp/search.cgi?feed=1",
    "https://news.ceek.jp/search.cgi?category_id=national&feed=1",
    "https://news.ceek.jp/search.cgi?category_id=politics&feed=1",
    "https://news.ceek.jp/search.cgi?category_id=business&feed=1",
    "https://news.ceek.jp/search.cgi?category_id=world&feed=1",
    "https://news.ceek.jp/search.cgi?category_id=triple&feed=1",
    "https://news.ceek.jp/search.cgi?category_id=it&feed=1",
    "https://news.ceek.jp/search.cgi?category_id=sports&feed=1",
    "https://news.ceek.jp/search.cgi?category_id=entertainment&feed=1",
    "https://news.ceek.jp/search.cgi?category_id=science&feed=1",
    "https://news.ceek.jp/search.cgi?category_id=obituaries&feed=1",
    "https://news.ceek.jp/search.cgi?category_id=local&feed=1",
    "https://news.ceek.jp/search.cgi?category_id=etc&feed=1",
];

const COLLECT_EVERY: Duration = Duration::from_mins(30);
const MIN_COLLECT_INTERVAL: Duration = Duration::from_mins(10);
const FEED_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const OGP_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
/// Only the head of the page is scanned for the og:image tag.
const OGP_SCAN_BYTES: usize = 10_000;
pub const MAX_CONCURRENT_FETCHES: usize = 4;
const UPSERT_BATCH_SIZE: usize = 50;

pub struct CollectorState {
    last_run: Mutex<Option<Instant>>,
    in_progress: Mutex<bool>,
}

impl CollectorState {
    pub fn new() -> Self {
        Self {
            last_run: Mutex::new(None),
            in_progress: Mutex::new(false),
        }
    }
}

impl Default for CollectorState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn route() -> Router<App> {
    Router::<App>::new()
        .route("/collector/run", post(trigger_collect))
        .route("/collector/backfill", post(trigger_backfill))
}

pub fn start_background_collect(ctx: App) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(COLLECT_EVERY);
        loop {
            interval.tick().await;
            if let Err(err) = run_collect_guarded(ctx.clone()).await {
                tracing::warn!(?err, "Scheduled collect failed");
            }
        }
    });
}

async fn trigger_collect(State(ctx): State<App>) -> Result<(), AppError> {
    tokio::spawn(async move {
        if let Err(err) = run_collect_guarded(ctx).await {
            tracing::warn!(?err, "Manual collect failed");
        }
    });
    Ok(())
}

async fn trigger_backfill(State(ctx): State<App>) -> Result<(), AppError> {
    tokio::spawn(async move {
        if let Err(err) = embedder::run_backfill(&ctx).await {
            tracing::warn!(?err, "Backfill failed");
        }
    });
    Ok(())
}

/// Content-addressed article id: first 16 hex chars of SHA-256 over the
/// canonical link. Stable across runs and deployments.
pub fn article_id(link: &str) -> String {
    let digest = Sha256::digest(link.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug)]
struct FeedEntry {
    id: String,
    title: String,
    link: String,
    summary: String,
    published: String,
    category: String,
}

fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedEntry>, eyre::Error> {
    let feed = feed_rs::parser::parse(bytes)?;

    let mut entries = Vec::new();
    for entry in feed.entries {
        let Some(link) = entry.links.as_slice().first().map(|l| l.href.clone()) else {
            continue;
        };
        match url::Url::parse(&link) {
            Ok(url) if url.scheme().starts_with("http") => {}
            _ => continue,
        }

        entries.push(FeedEntry {
            id: article_id(&link),
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            summary: entry.summary.map(|s| s.content).unwrap_or_default(),
            published: entry
                .published
                .map(|d| d.to_rfc2822())
                .unwrap_or_default(),
            category: entry
                .categories
                .iter()
                .map(|c| c.term.clone())
                .collect::<Vec<_>>()
                .join(","),
            link,
        });
    }

    Ok(entries)
}

async fn fetch_feed(ctx: &App, feed_url: &str) -> Result<Vec<FeedEntry>, eyre::Error> {
    let resp = ctx
        .http
        .get(feed_url)
        .timeout(FEED_FETCH_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;
    let bytes = resp.bytes().await?;
    parse_feed(bytes.as_ref())
}

static OG_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+property=["']og:image["'][^>]+content=["']([^"']+)["']"#)
        .expect("og:image pattern is valid")
});
static OG_IMAGE_REVERSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+content=["']([^"']+)["'][^>]+property=["']og:image["']"#)
        .expect("reversed og:image pattern is valid")
});

fn extract_og_image(html: &str) -> Option<String> {
    OG_IMAGE
        .captures(html)
        .or_else(|| OG_IMAGE_REVERSED.captures(html))
        .map(|c| c[1].to_string())
}

/// Best-effort og:image lookup; any failure yields an empty string so a slow
/// or broken site never blocks collection.
async fn fetch_ogp_image(ctx: &App, link: &str) -> String {
    let resp = match ctx
        .http
        .get(link)
        .timeout(OGP_FETCH_TIMEOUT)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(_) => return String::new(),
    };
    let bytes = match resp.bytes().await {
        Ok(bytes) => bytes,
        Err(_) => return String::new(),
    };

    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(OGP_SCAN_BYTES)]);
    extract_og_image(&head).unwrap_or_default()
}

/// One guarded collect cycle: skips when a run is already in flight or the
/// last one finished moments ago, then collects and fills pending
/// embeddings.
pub async fn run_collect_guarded(ctx: App) -> Result<(), eyre::Error> {
    {
        let mut in_progress = ctx.collector.in_progress.lock().await;
        if *in_progress {
            tracing::debug!("Collect already in progress, skipping");
            return Ok(());
        }

        let last_run = ctx.collector.last_run.lock().await;
        if let Some(last) = *last_run
            && last.elapsed() < MIN_COLLECT_INTERVAL
        {
            tracing::debug!("Collect ran recently, skipping");
            return Ok(());
        }

        *in_progress = true;
    }

    let result = async {
        run_collect(&ctx).await?;
        let _ = embedder::embed_pending(&ctx).await.inspect_err(|err| {
            tracing::warn!(?err, "Embedding pending articles failed, will retry next run");
        });
        Ok::<(), eyre::Error>(())
    }
    .await;

    {
        let mut in_progress = ctx.collector.in_progress.lock().await;
        *in_progress = false;
        let mut last_run = ctx.collector.last_run.lock().await;
        *last_run = Some(Instant::now());
    }

    result
}

#[tracing::instrument(skip(ctx))]
pub async fn run_collect(ctx: &App) -> Result<usize, eyre::Error> {
    use crate::schema::articles::dsl as a_dsl;

    tracing::debug!("Starting collect run");

    let mut conn = ctx.diesel.get().await?;
    let existing: Vec<String> = a_dsl::articles.select(a_dsl::link).load(&mut conn).await?;
    let mut existing_links: std::collections::HashSet<String> = existing.into_iter().collect();
    // Release connection before the HTTP fetches
    drop(conn);

    let mut new_entries: Vec<FeedEntry> = Vec::new();
    for feed_url in FEEDS {
        let entries = match fetch_feed(ctx, feed_url).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(feed = feed_url, ?err, "Failed to fetch feed");
                continue;
            }
        };
        for entry in entries {
            // Dedup against the store and across feeds within this batch
            if existing_links.insert(entry.link.clone()) {
                new_entries.push(entry);
            }
        }
    }

    if new_entries.is_empty() {
        tracing::debug!("No new articles found");
        return Ok(0);
    }

    tracing::debug!("Processing {} new entries", new_entries.len());

    let rows: Vec<NewArticle> = futures::stream::iter(new_entries)
        .map(|entry| {
            let ctx = ctx.clone();
            async move {
                let image_url = fetch_ogp_image(&ctx, &entry.link).await;
                NewArticle {
                    id: entry.id,
                    link: entry.link,
                    title: entry.title,
                    summary: entry.summary,
                    published: entry.published,
                    category: entry.category,
                    image_url,
                    embedding: None,
                }
            }
        })
        .buffer_unordered(MAX_CONCURRENT_FETCHES)
        .collect::<Vec<_>>()
        .await;

    let mut batches: Vec<Vec<NewArticle>> = Vec::new();
    let mut current: Vec<NewArticle> = Vec::new();
    for row in rows {
        current.push(row);
        if current.len() == UPSERT_BATCH_SIZE {
            batches.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }

    let mut conn = ctx.diesel.get().await?;
    let mut inserted = 0usize;
    for mut batch in batches {
        if ctx.config.embedder.is_some() {
            let texts: Vec<String> = batch
                .iter()
                .map(|a| format!("{} {}", a.title, a.summary))
                .collect();
            match embedder::embed_batch(ctx, &texts).await {
                Ok(vectors) => {
                    for (row, vector) in batch.iter_mut().zip(vectors) {
                        row.embedding = Some(Vector::from(vector));
                    }
                }
                // The rows still land, just without vectors; embed_pending
                // picks them up on a later run.
                Err(err) => {
                    tracing::warn!(?err, "Embedding failed, storing batch as pending")
                }
            }
        }

        inserted += diesel::insert_into(a_dsl::articles)
            .values(&batch)
            .on_conflict(a_dsl::link)
            .do_nothing()
            .execute(&mut conn)
            .await?;
    }

    tracing::info!(inserted, "Collected new articles");
    Ok(inserted)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn article_id_is_a_stable_sha256_prefix() {
        // Leading 16 hex chars of the SHA-256 test vectors.
        assert_eq!(article_id("abc"), "ba7816bf8f01cfea");
        assert_eq!(article_id(""), "e3b0c44298fc1c14");
        assert_eq!(article_id("abc"), article_id("abc"));
        assert_ne!(article_id("abc"), article_id("abd"));
        assert_eq!(article_id("https://news.example.com/1").len(), 16);
    }

    #[test]
    fn feed_entries_are_extracted_with_categories() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>CEEK.JP NEWS</title>
    <link>https://news.ceek.jp/</link>
    <description>latest</description>
    <item>
      <title>日経平均が続伸</title>
      <link>https://news.example.com/economy/1</link>
      <description>株式市場の概況。</description>
      <pubDate>Mon, 01 Jul 2024 12:00:00 GMT</pubDate>
      <category>経済</category>
      <category>株式</category>
    </item>
    <item>
      <title>リンクのない記事</title>
      <description>これは捨てられる。</description>
    </item>
  </channel>
</rss>"#;

        let entries = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry.link, "https://news.example.com/economy/1");
        assert_eq!(entry.id, article_id("https://news.example.com/economy/1"));
        assert_eq!(entry.title, "日経平均が続伸");
        assert_eq!(entry.category, "経済,株式");
        assert!(entry.published.contains("2024"));
    }

    #[test]
    fn og_image_matches_both_attribute_orders() {
        let property_first =
            r#"<meta property="og:image" content="https://img.example.com/a.jpg">"#;
        let content_first =
            r#"<meta content="https://img.example.com/b.jpg" property="og:image">"#;

        assert_eq!(
            extract_og_image(property_first).as_deref(),
            Some("https://img.example.com/a.jpg")
        );
        assert_eq!(
            extract_og_image(content_first).as_deref(),
            Some("https://img.example.com/b.jpg")
        );
        assert_eq!(extract_og_image("<html><head></head></html>"), None);
    }
}
