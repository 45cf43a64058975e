//! Deep-dive analysis: a one-shot LLM call that expands an article into
//! background, impact and outlook. Opaque to the ranking engine; reading the
//! analysis is recorded separately as `deep_dive` feedback.

use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use eyre::{OptionExt, eyre};
use serde::{Deserialize, Serialize};

use crate::{App, error::AppError, ranking::store};

const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const GROQ_MODEL: &str = "llama-3.3-70b-versatile";
const GROQ_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TOKENS: u32 = 512;

const SYSTEM_PROMPT: &str = "あなたはニュースアナリストです。\
与えられたニュース記事について、背景・影響・今後の展望を\
日本語で簡潔に分析してください（300字以内）。";

pub fn route() -> Router<App> {
    Router::<App>::new().route("/articles/{id}/analysis", post(post_analysis))
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: &'static str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Serialize)]
struct AnalysisResponse {
    analysis: String,
}

async fn analyze(ctx: &App, title: &str, summary: &str) -> Result<String, eyre::Error> {
    let api_key = ctx
        .config
        .groq_api_key
        .as_ref()
        .ok_or_eyre("GROQ_API_KEY is not configured")?;

    let request = ChatRequest {
        model: GROQ_MODEL,
        messages: vec![
            ChatMessage {
                role: "system",
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: "user",
                content: format!("タイトル: {title}\n概要: {summary}"),
            },
        ],
        max_tokens: MAX_TOKENS,
    };

    let resp = ctx
        .http
        .post(GROQ_URL)
        .bearer_auth(api_key)
        .json(&request)
        .timeout(GROQ_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;

    let body: ChatResponse = resp.json().await?;
    body.choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| eyre!("analysis response carried no choices"))
}

async fn post_analysis(
    State(ctx): State<App>,
    Path(article_id): Path<String>,
) -> Result<Json<AnalysisResponse>, AppError> {
    let mut conn = ctx.diesel.get().await.map_err(eyre::Report::from)?;
    let card = store::article_card(&mut conn, &article_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no article with id `{article_id}`")))?;
    drop(conn);

    let analysis = analyze(&ctx, &card.title, &card.summary).await?;
    Ok(Json(AnalysisResponse { analysis }))
}
