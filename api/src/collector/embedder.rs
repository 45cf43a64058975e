//! Batch embedding through Cloudflare Workers AI. Article text goes in as
//! `"<title> <summary>"`, dense vectors come back in the same order.

use std::time::Duration;

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use eyre::{OptionExt, eyre};
use pgvector::Vector;
use serde::Deserialize;

use crate::App;

pub const EMBED_BATCH_SIZE: usize = 50;
const EMBED_TIMEOUT: Duration = Duration::from_secs(120);
/// Pause between batches; keeps a full backfill inside the provider's
/// per-minute budget.
const INTER_BATCH_DELAY: Duration = Duration::from_secs(1);
/// Upper bound on pending rows handled in one run.
const PENDING_PER_RUN: usize = 500;
const BACKOFF_MAX_RETRIES: u32 = 5;

#[derive(Deserialize)]
struct EmbeddingResponse {
    success: bool,
    result: Option<EmbeddingResult>,
}

#[derive(Deserialize)]
struct EmbeddingResult {
    data: Vec<Vec<f32>>,
}

pub async fn embed_batch(ctx: &App, texts: &[String]) -> Result<Vec<Vec<f32>>, eyre::Error> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let creds = ctx
        .config
        .embedder
        .as_ref()
        .ok_or_eyre("embedding credentials are not configured")?;

    let url = format!(
        "https://api.cloudflare.com/client/v4/accounts/{}/ai/run/{}",
        creds.account_id, ctx.config.embedding_model
    );

    let resp = ctx
        .http
        .post(&url)
        .bearer_auth(&creds.api_token)
        .json(&serde_json::json!({ "text": texts }))
        .timeout(EMBED_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;

    let body: EmbeddingResponse = resp.json().await?;
    if !body.success {
        return Err(eyre!("embedding endpoint reported failure"));
    }
    let data = body
        .result
        .ok_or_eyre("embedding response carried no result")?
        .data;

    if data.len() != texts.len() {
        return Err(eyre!(
            "embedding endpoint returned {} vectors for {} texts",
            data.len(),
            texts.len()
        ));
    }
    for vector in &data {
        if vector.len() != ctx.config.embedding_dim {
            return Err(eyre!(
                "embedding dimension {} does not match the configured {}",
                vector.len(),
                ctx.config.embedding_dim
            ));
        }
    }

    Ok(data)
}

/// `embed_batch` with exponential backoff (1/2/4/8/16 s, up to 5 retries).
/// Only the backfill path retries; the regular collect run fails fast and
/// leaves the rows for its next cycle.
pub async fn embed_with_backoff(
    ctx: &App,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, eyre::Error> {
    let mut delay = Duration::from_secs(1);
    let mut attempt = 0u32;
    loop {
        match embed_batch(ctx, texts).await {
            Ok(vectors) => return Ok(vectors),
            Err(err) => {
                attempt += 1;
                if attempt > BACKOFF_MAX_RETRIES {
                    return Err(err);
                }
                tracing::warn!(attempt, ?err, "Embedding batch failed, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
}

async fn pending_batch(
    conn: &mut AsyncPgConnection,
) -> Result<Vec<(String, String, String)>, eyre::Error> {
    use crate::schema::articles::dsl as a_dsl;

    Ok(a_dsl::articles
        .filter(a_dsl::embedding.is_null())
        .select((a_dsl::id, a_dsl::title, a_dsl::summary))
        .limit(EMBED_BATCH_SIZE as i64)
        .load(conn)
        .await?)
}

async fn store_embeddings(
    conn: &mut AsyncPgConnection,
    batch: &[(String, String, String)],
    vectors: Vec<Vec<f32>>,
) -> Result<(), eyre::Error> {
    use crate::schema::articles::dsl as a_dsl;

    for ((id, _, _), vector) in batch.iter().zip(vectors) {
        diesel::update(a_dsl::articles.filter(a_dsl::id.eq(id)))
            .set(a_dsl::embedding.eq(Vector::from(vector)))
            .execute(conn)
            .await?;
    }
    Ok(())
}

fn batch_texts(batch: &[(String, String, String)]) -> Vec<String> {
    batch
        .iter()
        .map(|(_, title, summary)| format!("{title} {summary}"))
        .collect()
}

/// Fill in embeddings for articles stored without one. A provider failure
/// aborts the run; the same rows are picked up again on the next cycle.
#[tracing::instrument(skip(ctx))]
pub async fn embed_pending(ctx: &App) -> Result<usize, eyre::Error> {
    if ctx.config.embedder.is_none() {
        return Ok(0);
    }

    let mut conn = ctx.diesel.get().await?;
    let mut processed = 0usize;

    while processed < PENDING_PER_RUN {
        let batch = pending_batch(&mut conn).await?;
        if batch.is_empty() {
            break;
        }

        let vectors = embed_batch(ctx, &batch_texts(&batch)).await?;
        store_embeddings(&mut conn, &batch, vectors).await?;

        processed += batch.len();
        tokio::time::sleep(INTER_BATCH_DELAY).await;
    }

    if processed > 0 {
        tracing::info!(processed, "Embedded pending articles");
    }
    Ok(processed)
}

/// Backfill pass for pending rows, e.g. after switching the embedding model
/// generation. Same work as `embed_pending` but survives provider hiccups
/// with backoff.
#[tracing::instrument(skip(ctx))]
pub async fn run_backfill(ctx: &App) -> Result<usize, eyre::Error> {
    if ctx.config.embedder.is_none() {
        return Err(eyre!("embedding credentials are not configured"));
    }

    let mut conn = ctx.diesel.get().await?;
    let mut processed = 0usize;

    while processed < PENDING_PER_RUN {
        let batch = pending_batch(&mut conn).await?;
        if batch.is_empty() {
            break;
        }

        let vectors = embed_with_backoff(ctx, &batch_texts(&batch)).await?;
        store_embeddings(&mut conn, &batch, vectors).await?;

        processed += batch.len();
        tokio::time::sleep(INTER_BATCH_DELAY).await;
    }

    tracing::info!(processed, "Backfill finished");
    Ok(processed)
}
