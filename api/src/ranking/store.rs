//! Storage adapters for the ranking engine. Everything the engine knows
//! about persistence lives here: the rest of the module sees `Vec<f32>`
//! embeddings and plain row structs, never pgvector or SQL.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use diesel::sql_types::Integer;
use diesel::upsert::excluded;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use pgvector::Vector;

use crate::models::article::{ArticleCard, MatchedArticleRow, PickedArticleRow, RankedArticle};
use crate::models::user::{Interaction, NewHealthSnapshot, NewUserProfile, UserProfile};
use crate::vecmath;

use super::feedback::InteractionKind;

// --- user vectors ---

pub async fn get_user_vector(
    conn: &mut AsyncPgConnection,
    user: &str,
) -> Result<Option<Vec<f32>>, eyre::Error> {
    use crate::schema::user_vectors::dsl as uv_dsl;

    let vector = uv_dsl::user_vectors
        .filter(uv_dsl::user_id.eq(user))
        .select(uv_dsl::vector)
        .first::<Vector>(conn)
        .await
        .optional()?;

    Ok(vector.map(|v| v.to_vec()))
}

pub async fn save_user_vector(
    conn: &mut AsyncPgConnection,
    user: &str,
    vector: Vec<f32>,
) -> Result<(), eyre::Error> {
    use crate::schema::user_vectors::dsl as uv_dsl;

    diesel::insert_into(uv_dsl::user_vectors)
        .values((
            uv_dsl::user_id.eq(user),
            uv_dsl::vector.eq(Vector::from(vector)),
            uv_dsl::updated_at.eq(diesel::dsl::now),
        ))
        .on_conflict(uv_dsl::user_id)
        .do_update()
        .set((
            uv_dsl::vector.eq(excluded(uv_dsl::vector)),
            uv_dsl::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await?;

    Ok(())
}

/// Lazy initialization for users who skipped onboarding: the mean of the
/// first 100 stored embeddings, persisted so the next call is a plain read.
/// `None` when the corpus has no embeddings yet.
pub async fn init_user_vector(
    conn: &mut AsyncPgConnection,
    user: &str,
) -> Result<Option<Vec<f32>>, eyre::Error> {
    use crate::schema::articles::dsl as a_dsl;

    let embeddings: Vec<Option<Vector>> = a_dsl::articles
        .filter(a_dsl::embedding.is_not_null())
        .select(a_dsl::embedding)
        .limit(100)
        .load(conn)
        .await?;

    let vectors: Vec<Vec<f32>> = embeddings
        .into_iter()
        .flatten()
        .map(|v| v.to_vec())
        .collect();

    let Some(avg) = vecmath::mean(&vectors) else {
        return Ok(None);
    };

    save_user_vector(conn, user, avg.clone()).await?;
    Ok(Some(avg))
}

// --- article retrieval ---

/// ANN retrieval through the store's `match_articles` procedure; results
/// arrive sorted by cosine similarity, best first.
pub async fn match_articles(
    conn: &mut AsyncPgConnection,
    query: &[f32],
    count: i64,
) -> Result<Vec<RankedArticle>, eyre::Error> {
    let rows: Vec<MatchedArticleRow> = diesel::sql_query(
        "SELECT id, title, link, summary, published, category, image_url, similarity \
         FROM match_articles($1, $2)",
    )
    .bind::<crate::schema::PgVector, _>(Vector::from(query.to_vec()))
    .bind::<Integer, _>(count as i32)
    .load(conn)
    .await?;

    Ok(rows.into_iter().map(RankedArticle::from).collect())
}

/// Uniform pick through the store's `random_articles` procedure. Rows still
/// waiting for an embedding are included on purpose.
pub async fn random_articles(
    conn: &mut AsyncPgConnection,
    count: i64,
) -> Result<Vec<RankedArticle>, eyre::Error> {
    let rows: Vec<PickedArticleRow> = diesel::sql_query(
        "SELECT id, title, link, summary, published, category, image_url \
         FROM random_articles($1)",
    )
    .bind::<Integer, _>(count as i32)
    .load(conn)
    .await?;

    Ok(rows.into_iter().map(RankedArticle::from).collect())
}

pub async fn latest_articles(
    conn: &mut AsyncPgConnection,
    limit: i64,
) -> Result<Vec<RankedArticle>, eyre::Error> {
    use crate::schema::articles::dsl as a_dsl;

    let cards: Vec<ArticleCard> = a_dsl::articles
        .select(ArticleCard::as_select())
        .order(a_dsl::collected_at.desc())
        .limit(limit)
        .load(conn)
        .await?;

    Ok(cards
        .into_iter()
        .map(|c| RankedArticle::from_card(c, 0.0))
        .collect())
}

pub async fn onboarding_samples(
    conn: &mut AsyncPgConnection,
    category: &str,
    limit: i64,
) -> Result<Vec<ArticleCard>, eyre::Error> {
    use crate::schema::articles::dsl as a_dsl;

    Ok(a_dsl::articles
        .filter(a_dsl::category.ilike(format!("%{category}%")))
        .filter(a_dsl::embedding.is_not_null())
        .select(ArticleCard::as_select())
        .limit(limit)
        .load(conn)
        .await?)
}

pub async fn cards_for(
    conn: &mut AsyncPgConnection,
    ids: &[String],
) -> Result<Vec<ArticleCard>, eyre::Error> {
    use crate::schema::articles::dsl as a_dsl;

    Ok(a_dsl::articles
        .filter(a_dsl::id.eq_any(ids))
        .select(ArticleCard::as_select())
        .load(conn)
        .await?)
}

pub async fn article_card(
    conn: &mut AsyncPgConnection,
    id: &str,
) -> Result<Option<ArticleCard>, eyre::Error> {
    use crate::schema::articles::dsl as a_dsl;

    Ok(a_dsl::articles
        .filter(a_dsl::id.eq(id))
        .select(ArticleCard::as_select())
        .first(conn)
        .await
        .optional()?)
}

// --- embeddings ---

pub async fn article_embedding(
    conn: &mut AsyncPgConnection,
    id: &str,
) -> Result<Option<Vec<f32>>, eyre::Error> {
    use crate::schema::articles::dsl as a_dsl;

    let embedding: Option<Option<Vector>> = a_dsl::articles
        .filter(a_dsl::id.eq(id))
        .select(a_dsl::embedding)
        .first(conn)
        .await
        .optional()?;

    Ok(embedding.flatten().map(|v| v.to_vec()))
}

/// Embeddings for a set of ids; ids without a stored vector are simply
/// absent from the map.
pub async fn embeddings_for(
    conn: &mut AsyncPgConnection,
    ids: &[String],
) -> Result<HashMap<String, Vec<f32>>, eyre::Error> {
    use crate::schema::articles::dsl as a_dsl;

    let rows: Vec<(String, Option<Vector>)> = a_dsl::articles
        .filter(a_dsl::id.eq_any(ids))
        .filter(a_dsl::embedding.is_not_null())
        .select((a_dsl::id, a_dsl::embedding))
        .load(conn)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(id, v)| v.map(|v| (id, v.to_vec())))
        .collect())
}

pub async fn embeddings_of(
    conn: &mut AsyncPgConnection,
    ids: &[String],
) -> Result<Vec<Vec<f32>>, eyre::Error> {
    use crate::schema::articles::dsl as a_dsl;

    let rows: Vec<Option<Vector>> = a_dsl::articles
        .filter(a_dsl::id.eq_any(ids))
        .filter(a_dsl::embedding.is_not_null())
        .select(a_dsl::embedding)
        .load(conn)
        .await?;

    Ok(rows.into_iter().flatten().map(|v| v.to_vec()).collect())
}

// --- interactions ---

/// Idempotent upsert keyed by `(user, article, kind)`: repeated clicks only
/// refresh the timestamp, the history stays a set.
pub async fn upsert_interaction(
    conn: &mut AsyncPgConnection,
    user: &str,
    article_id: &str,
    kind: InteractionKind,
) -> Result<(), eyre::Error> {
    use crate::schema::user_interactions::dsl as ui_dsl;

    diesel::insert_into(ui_dsl::user_interactions)
        .values((
            ui_dsl::user_id.eq(user),
            ui_dsl::article_id.eq(article_id),
            ui_dsl::interaction_type.eq(kind.as_str()),
        ))
        .on_conflict((ui_dsl::user_id, ui_dsl::article_id, ui_dsl::interaction_type))
        .do_update()
        .set(ui_dsl::created_at.eq(diesel::dsl::now))
        .execute(conn)
        .await?;

    Ok(())
}

pub async fn interacted_ids(
    conn: &mut AsyncPgConnection,
    user: &str,
    kinds: &[InteractionKind],
) -> Result<HashSet<String>, eyre::Error> {
    use crate::schema::user_interactions::dsl as ui_dsl;

    let mut query = ui_dsl::user_interactions
        .filter(ui_dsl::user_id.eq(user))
        .select(ui_dsl::article_id)
        .into_boxed();
    if !kinds.is_empty() {
        query = query.filter(ui_dsl::interaction_type.eq_any(kinds.iter().map(|k| k.as_str())));
    }

    let ids: Vec<String> = query.load(conn).await?;
    Ok(ids.into_iter().collect())
}

pub async fn interaction_rows(
    conn: &mut AsyncPgConnection,
    user: &str,
    kinds: &[InteractionKind],
    limit: i64,
) -> Result<Vec<Interaction>, eyre::Error> {
    use crate::schema::user_interactions::dsl as ui_dsl;

    Ok(ui_dsl::user_interactions
        .filter(ui_dsl::user_id.eq(user))
        .filter(ui_dsl::interaction_type.eq_any(kinds.iter().map(|k| k.as_str())))
        .order(ui_dsl::created_at.desc())
        .limit(limit)
        .select(Interaction::as_select())
        .load(conn)
        .await?)
}

/// Ids of every positively-interacted article (views and deep dives), the
/// population all health analytics run over.
pub async fn positive_ids(
    conn: &mut AsyncPgConnection,
    user: &str,
) -> Result<Vec<String>, eyre::Error> {
    use crate::schema::user_interactions::dsl as ui_dsl;

    Ok(ui_dsl::user_interactions
        .filter(ui_dsl::user_id.eq(user))
        .filter(ui_dsl::interaction_type.eq_any([
            InteractionKind::View.as_str(),
            InteractionKind::DeepDive.as_str(),
        ]))
        .select(ui_dsl::article_id)
        .load(conn)
        .await?)
}

pub async fn recent_positive_ids(
    conn: &mut AsyncPgConnection,
    user: &str,
    limit: i64,
) -> Result<Vec<String>, eyre::Error> {
    use crate::schema::user_interactions::dsl as ui_dsl;

    Ok(ui_dsl::user_interactions
        .filter(ui_dsl::user_id.eq(user))
        .filter(ui_dsl::interaction_type.eq_any([
            InteractionKind::View.as_str(),
            InteractionKind::DeepDive.as_str(),
        ]))
        .order(ui_dsl::created_at.desc())
        .limit(limit)
        .select(ui_dsl::article_id)
        .load(conn)
        .await?)
}

pub async fn user_interaction_pairs(
    conn: &mut AsyncPgConnection,
    user: &str,
) -> Result<Vec<(String, String)>, eyre::Error> {
    use crate::schema::user_interactions::dsl as ui_dsl;

    Ok(ui_dsl::user_interactions
        .filter(ui_dsl::user_id.eq(user))
        .select((ui_dsl::article_id, ui_dsl::interaction_type))
        .load(conn)
        .await?)
}

// --- article metadata for analytics ---

pub async fn categories_for(
    conn: &mut AsyncPgConnection,
    ids: &[String],
) -> Result<Vec<String>, eyre::Error> {
    use crate::schema::articles::dsl as a_dsl;

    Ok(a_dsl::articles
        .filter(a_dsl::id.eq_any(ids))
        .select(a_dsl::category)
        .load(conn)
        .await?)
}

/// Per-article label sources for the hierarchical health levels: title,
/// major category string and the cached medium/minor classifications.
pub async fn label_rows(
    conn: &mut AsyncPgConnection,
    ids: &[String],
) -> Result<Vec<(String, String, Option<String>, Option<Vec<String>>)>, eyre::Error> {
    use crate::schema::articles::dsl as a_dsl;

    Ok(a_dsl::articles
        .filter(a_dsl::id.eq_any(ids))
        .select((
            a_dsl::title,
            a_dsl::category,
            a_dsl::category_medium,
            a_dsl::category_minor,
        ))
        .load(conn)
        .await?)
}

pub async fn article_count(conn: &mut AsyncPgConnection) -> Result<i64, eyre::Error> {
    use crate::schema::articles::dsl as a_dsl;

    Ok(a_dsl::articles.count().get_result::<i64>(conn).await?)
}

pub async fn latest_collected_timestamps(
    conn: &mut AsyncPgConnection,
    limit: i64,
) -> Result<Vec<NaiveDateTime>, eyre::Error> {
    use crate::schema::articles::dsl as a_dsl;

    Ok(a_dsl::articles
        .order(a_dsl::collected_at.desc())
        .limit(limit)
        .select(a_dsl::collected_at)
        .load(conn)
        .await?)
}

// --- user profile ---

pub async fn ensure_profile(conn: &mut AsyncPgConnection, user: &str) -> Result<(), eyre::Error> {
    use crate::schema::user_profile::dsl as up_dsl;

    let existing: Option<UserProfile> = up_dsl::user_profile
        .filter(up_dsl::user_id.eq(user))
        .select(UserProfile::as_select())
        .first(conn)
        .await
        .optional()?;

    if existing.is_none() {
        diesel::insert_into(up_dsl::user_profile)
            .values(NewUserProfile {
                user_id: user.to_string(),
                display_name: String::new(),
                onboarded: false,
            })
            .on_conflict(up_dsl::user_id)
            .do_nothing()
            .execute(conn)
            .await?;
    }

    Ok(())
}

pub async fn is_onboarded(conn: &mut AsyncPgConnection, user: &str) -> Result<bool, eyre::Error> {
    use crate::schema::user_profile::dsl as up_dsl;

    let onboarded = up_dsl::user_profile
        .filter(up_dsl::user_id.eq(user))
        .select(up_dsl::onboarded)
        .first::<bool>(conn)
        .await
        .optional()?;

    Ok(onboarded.unwrap_or(false))
}

pub async fn set_onboarded(conn: &mut AsyncPgConnection, user: &str) -> Result<(), eyre::Error> {
    use crate::schema::user_profile::dsl as up_dsl;

    diesel::update(up_dsl::user_profile.filter(up_dsl::user_id.eq(user)))
        .set(up_dsl::onboarded.eq(true))
        .execute(conn)
        .await?;

    Ok(())
}

// --- health snapshots ---

/// One snapshot per user per day: a second call on the same date overwrites
/// the row in place.
pub async fn upsert_health_snapshot(
    conn: &mut AsyncPgConnection,
    snapshot: NewHealthSnapshot,
) -> Result<(), eyre::Error> {
    use crate::schema::health_score_history::dsl as hs_dsl;

    diesel::insert_into(hs_dsl::health_score_history)
        .values(&snapshot)
        .on_conflict((hs_dsl::user_id, hs_dsl::score_date))
        .do_update()
        .set((
            hs_dsl::diversity.eq(excluded(hs_dsl::diversity)),
            hs_dsl::bias_ratio.eq(excluded(hs_dsl::bias_ratio)),
            hs_dsl::top_category.eq(excluded(hs_dsl::top_category)),
            hs_dsl::detail.eq(excluded(hs_dsl::detail)),
        ))
        .execute(conn)
        .await?;

    Ok(())
}

pub async fn health_history(
    conn: &mut AsyncPgConnection,
    user: &str,
    days: i64,
) -> Result<Vec<(NaiveDate, i32, f64, String, serde_json::Value)>, eyre::Error> {
    use crate::schema::health_score_history::dsl as hs_dsl;

    let mut rows: Vec<(NaiveDate, i32, f64, String, serde_json::Value)> =
        hs_dsl::health_score_history
            .filter(hs_dsl::user_id.eq(user))
            .order(hs_dsl::score_date.desc())
            .limit(days)
            .select((
                hs_dsl::score_date,
                hs_dsl::diversity,
                hs_dsl::bias_ratio,
                hs_dsl::top_category,
                hs_dsl::detail,
            ))
            .load(conn)
            .await?;

    // Query newest-first to apply the limit, return oldest-first for charts
    rows.reverse();
    Ok(rows)
}
