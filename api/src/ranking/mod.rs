//! The ranking engine: per-user interest vectors, the blended similarity +
//! random feed, feedback updates, near-duplicate grouping and the
//! informational-health analytics, exposed as the HTTP surface a front-end
//! consumes.

use std::collections::HashSet;

use axum::{
    Router,
    extract::{Query, State},
    routing::{get, post},
};
use chrono::NaiveDateTime;
use diesel_async::AsyncPgConnection;
use serde::{Deserialize, Serialize};

use crate::{
    App,
    error::AppError,
    identity::UserId,
    json::Json,
    models::article::RankedArticle,
    taxonomy,
};

pub mod feedback;
pub mod grouping;
pub mod health;
pub mod onboarding;
pub mod reason;
pub mod stats;
pub mod store;

use feedback::InteractionKind;
use grouping::ArticleGroup;

const DEFAULT_FILTER_STRENGTH: f64 = 0.5;
const DEFAULT_TOP_N: i64 = 30;
const DEFAULT_HISTORY_LIMIT: i64 = 50;
const DEFAULT_HEALTH_HISTORY_DAYS: i64 = 30;
const DEFAULT_ONBOARDING_COUNT: usize = 20;

/// Extra random picks requested beyond the target, so overlap with the
/// similarity set can be discarded without a second round-trip.
const RANDOM_OVERFETCH: usize = 10;

pub fn route() -> Router<App> {
    Router::<App>::new()
        .route("/feed", get(get_feed))
        .route("/feed/groups", post(group_articles))
        .route("/articles/{id}/view", post(feedback::record_view))
        .route("/articles/{id}/deep-dive", post(feedback::record_deep_dive))
        .route(
            "/articles/{id}/not-interested",
            post(feedback::record_not_interested),
        )
        .route("/interactions", get(get_interacted))
        .route("/interactions/history", get(get_history))
        .route("/stats", get(get_stats))
        .route("/health/info", get(get_info_health))
        .route("/health/hierarchy", get(get_hierarchical_health))
        .route("/health/snapshot", post(post_health_snapshot))
        .route("/health/history", get(get_health_history))
        .route("/onboarding", get(get_onboarding_status))
        .route("/onboarding/articles", get(get_onboarding_articles))
        .route("/onboarding/complete", post(complete_onboarding))
}

/// Split the requested feed size between similarity retrieval and random
/// exploration. At least one slot always goes to similarity so the dial
/// never fully disables personalization, the rest follows `⌊N·F⌋`.
pub(crate) fn retrieval_split(filter_strength: f64, top_n: usize) -> (usize, usize) {
    let similar = ((top_n as f64 * filter_strength) as usize).max(1);
    (similar, top_n.saturating_sub(similar))
}

/// Append random picks that are not already present until the feed reaches
/// `top_n`. Random items carry no similarity signal.
pub(crate) fn fill_from_random(
    results: &mut Vec<RankedArticle>,
    picked: Vec<RankedArticle>,
    top_n: usize,
) {
    let mut seen: HashSet<String> = results.iter().map(|r| r.id.clone()).collect();
    for mut article in picked {
        if results.len() >= top_n {
            break;
        }
        if !seen.insert(article.id.clone()) {
            continue;
        }
        article.similarity = 0.0;
        results.push(article);
    }
}

/// The blended feed: top-`K_sim` by cosine against the user vector, padded
/// with `K_rand` random picks, every entry annotated with a reason.
///
/// A user without a vector gets one lazily (mean of the first 100 stored
/// embeddings); an empty corpus degrades to a latest-first listing.
#[tracing::instrument(skip(conn))]
pub async fn rank(
    conn: &mut AsyncPgConnection,
    user: &str,
    filter_strength: f64,
    top_n: usize,
) -> Result<Vec<RankedArticle>, eyre::Error> {
    let user_vector = match store::get_user_vector(conn, user).await? {
        Some(v) => Some(v),
        None => store::init_user_vector(conn, user).await?,
    };
    let Some(user_vector) = user_vector else {
        return store::latest_articles(conn, top_n as i64).await;
    };

    let (similar_count, random_count) = retrieval_split(filter_strength, top_n);

    let mut results = store::match_articles(conn, &user_vector, similar_count as i64).await?;

    if random_count > 0 {
        let picked =
            store::random_articles(conn, (random_count + RANDOM_OVERFETCH) as i64).await?;
        fill_from_random(&mut results, picked, top_n);
    }

    let top_categories = reason::user_top_categories(conn, user).await?;
    for article in results.iter_mut() {
        article.reason = Some(reason::explain_recommendation(
            article.similarity,
            &article.category,
            &top_categories,
        ));
    }

    Ok(results)
}

// --- feed ---

#[derive(Deserialize)]
struct FeedQuery {
    filter_strength: Option<f64>,
    top_n: Option<i64>,
}

async fn get_feed(
    State(ctx): State<App>,
    UserId(user): UserId,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<RankedArticle>>, AppError> {
    let filter_strength = query.filter_strength.unwrap_or(DEFAULT_FILTER_STRENGTH);
    let top_n = query.top_n.unwrap_or(DEFAULT_TOP_N);

    if !(0.0..=1.0).contains(&filter_strength) {
        return Err(AppError::BadRequest(
            "filter_strength must be within [0, 1]".into(),
        ));
    }
    if top_n < 1 {
        return Err(AppError::BadRequest("top_n must be at least 1".into()));
    }

    let mut conn = ctx.diesel.get().await.map_err(eyre::Report::from)?;
    let articles = rank(&mut conn, &user, filter_strength, top_n as usize).await?;
    Ok(Json(articles))
}

#[derive(Deserialize)]
struct GroupRequest {
    articles: Vec<RankedArticle>,
    threshold: Option<f32>,
}

async fn group_articles(
    State(ctx): State<App>,
    Json(body): Json<GroupRequest>,
) -> Result<Json<Vec<ArticleGroup>>, AppError> {
    if body.articles.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let threshold = body.threshold.unwrap_or(grouping::GROUPING_THRESHOLD);
    let ids: Vec<String> = body.articles.iter().map(|a| a.id.clone()).collect();

    let mut conn = ctx.diesel.get().await.map_err(eyre::Report::from)?;
    let embeddings = store::embeddings_for(&mut conn, &ids).await?;

    Ok(Json(grouping::group_by_similarity(
        &body.articles,
        &embeddings,
        threshold,
    )))
}

// --- interactions ---

fn parse_kinds(raw: &str) -> Result<Vec<InteractionKind>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            InteractionKind::parse(s)
                .ok_or_else(|| AppError::BadRequest(format!("unknown interaction kind `{s}`")))
        })
        .collect()
}

#[derive(Deserialize)]
struct InteractedQuery {
    kinds: Option<String>,
}

async fn get_interacted(
    State(ctx): State<App>,
    UserId(user): UserId,
    Query(query): Query<InteractedQuery>,
) -> Result<Json<Vec<String>>, AppError> {
    let kinds = match query.kinds.as_deref() {
        Some(raw) => parse_kinds(raw)?,
        None => Vec::new(),
    };

    let mut conn = ctx.diesel.get().await.map_err(eyre::Report::from)?;
    let mut ids: Vec<String> = store::interacted_ids(&mut conn, &user, &kinds)
        .await?
        .into_iter()
        .collect();
    ids.sort();
    Ok(Json(ids))
}

#[derive(Deserialize)]
struct HistoryQuery {
    kinds: Option<String>,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct InteractionHistoryItem {
    article_id: String,
    interaction_type: String,
    created_at: NaiveDateTime,
    title: String,
    link: String,
    category: String,
    published: String,
    image_url: String,
}

async fn get_history(
    State(ctx): State<App>,
    UserId(user): UserId,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<InteractionHistoryItem>>, AppError> {
    let kinds = match query.kinds.as_deref() {
        Some(raw) => parse_kinds(raw)?,
        None => InteractionKind::ALL.to_vec(),
    };
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 500);

    let mut conn = ctx.diesel.get().await.map_err(eyre::Report::from)?;
    let rows = store::interaction_rows(&mut conn, &user, &kinds, limit).await?;
    if rows.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let ids: Vec<String> = rows
        .iter()
        .map(|row| row.article_id.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let cards = store::cards_for(&mut conn, &ids).await?;
    let by_id: std::collections::HashMap<&str, _> =
        cards.iter().map(|c| (c.id.as_str(), c)).collect();

    let items = rows
        .iter()
        .map(|row| match by_id.get(row.article_id.as_str()) {
            Some(card) => InteractionHistoryItem {
                article_id: row.article_id.clone(),
                interaction_type: row.interaction_type.clone(),
                created_at: row.created_at,
                title: card.title.clone(),
                link: card.link.clone(),
                category: card.category.clone(),
                published: card.published.clone(),
                image_url: card.image_url.clone(),
            },
            // The article was purged from the store; keep the log entry
            // readable instead of dropping it.
            None => InteractionHistoryItem {
                article_id: row.article_id.clone(),
                interaction_type: row.interaction_type.clone(),
                created_at: row.created_at,
                title: "(削除済み)".to_string(),
                link: String::new(),
                category: String::new(),
                published: String::new(),
                image_url: String::new(),
            },
        })
        .collect();

    Ok(Json(items))
}

// --- stats & health ---

async fn get_stats(
    State(ctx): State<App>,
    UserId(user): UserId,
) -> Result<Json<stats::Stats>, AppError> {
    let mut conn = ctx.diesel.get().await.map_err(eyre::Report::from)?;
    Ok(Json(stats::get_stats(&mut conn, &user).await?))
}

async fn get_info_health(
    State(ctx): State<App>,
    UserId(user): UserId,
) -> Result<Json<health::InfoHealth>, AppError> {
    let mut conn = ctx.diesel.get().await.map_err(eyre::Report::from)?;
    Ok(Json(health::info_health(&mut conn, &user).await?))
}

async fn get_hierarchical_health(
    State(ctx): State<App>,
    UserId(user): UserId,
) -> Result<Json<health::HierarchicalHealth>, AppError> {
    let mut conn = ctx.diesel.get().await.map_err(eyre::Report::from)?;
    Ok(Json(health::hierarchical_health(&mut conn, &user).await?))
}

async fn post_health_snapshot(
    State(ctx): State<App>,
    UserId(user): UserId,
) -> Result<(), AppError> {
    let mut conn = ctx.diesel.get().await.map_err(eyre::Report::from)?;
    health::record_snapshot(&mut conn, &user).await?;
    Ok(())
}

#[derive(Deserialize)]
struct HealthHistoryQuery {
    days: Option<i64>,
}

async fn get_health_history(
    State(ctx): State<App>,
    UserId(user): UserId,
    Query(query): Query<HealthHistoryQuery>,
) -> Result<Json<Vec<health::HealthHistoryEntry>>, AppError> {
    let days = query
        .days
        .unwrap_or(DEFAULT_HEALTH_HISTORY_DAYS)
        .clamp(1, 365);
    let mut conn = ctx.diesel.get().await.map_err(eyre::Report::from)?;
    Ok(Json(health::history(&mut conn, &user, days).await?))
}

// --- onboarding ---

#[derive(Serialize)]
struct OnboardingStatus {
    onboarded: bool,
}

async fn get_onboarding_status(
    State(ctx): State<App>,
    UserId(user): UserId,
) -> Result<Json<OnboardingStatus>, AppError> {
    let mut conn = ctx.diesel.get().await.map_err(eyre::Report::from)?;
    let onboarded = onboarding::is_onboarded(&mut conn, &user).await?;
    Ok(Json(OnboardingStatus { onboarded }))
}

#[derive(Deserialize)]
struct OnboardingArticlesQuery {
    categories: Option<String>,
    count: Option<usize>,
}

async fn get_onboarding_articles(
    State(ctx): State<App>,
    UserId(_user): UserId,
    Query(query): Query<OnboardingArticlesQuery>,
) -> Result<Json<Vec<RankedArticle>>, AppError> {
    let categories: Vec<String> = match query.categories.as_deref() {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => taxonomy::ONBOARDING_CATEGORIES
            .iter()
            .map(|c| c.to_string())
            .collect(),
    };
    let count = query.count.unwrap_or(DEFAULT_ONBOARDING_COUNT).clamp(1, 100);

    let mut conn = ctx.diesel.get().await.map_err(eyre::Report::from)?;
    let articles = onboarding::onboarding_articles(&mut conn, &categories, count).await?;
    Ok(Json(articles))
}

#[derive(Deserialize)]
struct CompleteOnboardingBody {
    #[serde(default)]
    liked_ids: Vec<String>,
    #[serde(default)]
    disliked_ids: Vec<String>,
}

async fn complete_onboarding(
    State(ctx): State<App>,
    UserId(user): UserId,
    Json(body): Json<CompleteOnboardingBody>,
) -> Result<(), AppError> {
    let mut conn = ctx.diesel.get().await.map_err(eyre::Report::from)?;
    onboarding::complete_onboarding(&mut conn, &user, &body.liked_ids, &body.disliked_ids).await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn ranked(id: &str, similarity: f64) -> RankedArticle {
        RankedArticle {
            id: id.to_string(),
            title: String::new(),
            link: String::new(),
            summary: String::new(),
            published: String::new(),
            category: String::new(),
            image_url: String::new(),
            similarity,
            reason: None,
        }
    }

    #[test]
    fn full_filter_strength_leaves_no_random_slots() {
        assert_eq!(retrieval_split(1.0, 30), (30, 0));
        assert_eq!(retrieval_split(1.0, 1), (1, 0));
    }

    #[test]
    fn zero_filter_strength_keeps_one_similarity_slot() {
        assert_eq!(retrieval_split(0.0, 30), (1, 29));
        assert_eq!(retrieval_split(0.0, 1), (1, 0));
    }

    #[test]
    fn split_floors_the_similarity_share() {
        // 0.5 * 31 = 15.5 → 15 similar, 16 random
        assert_eq!(retrieval_split(0.5, 31), (15, 16));
        assert_eq!(retrieval_split(0.33, 10), (3, 7));
    }

    #[test]
    fn split_always_sums_to_top_n() {
        for n in 1..50 {
            for f in [0.0, 0.1, 0.33, 0.5, 0.77, 1.0] {
                let (s, r) = retrieval_split(f, n);
                assert_eq!(s + r, n.max(s));
                assert!(s >= 1);
            }
        }
    }

    #[test]
    fn random_fill_skips_duplicates_and_respects_the_cap() {
        let mut results = vec![ranked("a", 0.9), ranked("b", 0.8)];
        let picked = vec![
            ranked("b", 0.0),
            ranked("c", 0.3),
            ranked("c", 0.0),
            ranked("d", 0.0),
            ranked("e", 0.0),
        ];
        fill_from_random(&mut results, picked, 4);

        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        // Appended picks are exploration, not matches.
        assert_eq!(results[2].similarity, 0.0);
        assert_eq!(results[3].similarity, 0.0);
    }

    #[test]
    fn random_fill_handles_an_already_full_feed() {
        let mut results = vec![ranked("a", 0.9)];
        fill_from_random(&mut results, vec![ranked("b", 0.0)], 1);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn unknown_interaction_kind_is_rejected() {
        assert!(parse_kinds("view,deep_dive").is_ok());
        assert!(parse_kinds("view,likes").is_err());
        assert!(parse_kinds("").unwrap().is_empty());
    }
}
