use axum::extract::{Path, State};
use diesel_async::AsyncPgConnection;

use crate::{App, error::AppError, identity::UserId, vecmath};

use super::store;

/// The closed set of feedback signals. The string form is the stable
/// vocabulary stored in the interaction log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InteractionKind {
    View,
    DeepDive,
    NotInterested,
}

impl InteractionKind {
    pub const ALL: [InteractionKind; 3] = [
        InteractionKind::View,
        InteractionKind::DeepDive,
        InteractionKind::NotInterested,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InteractionKind::View => "view",
            InteractionKind::DeepDive => "deep_dive",
            InteractionKind::NotInterested => "not_interested",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Learning rate applied to the user vector for this signal. A view is a
    /// weak positive, a deep dive a strong one, not-interested pushes away.
    pub fn alpha(self) -> f32 {
        match self {
            InteractionKind::View => 0.03,
            InteractionKind::DeepDive => 0.15,
            InteractionKind::NotInterested => -0.20,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FeedbackError {
    #[error("article embedding has {actual} dimensions, user vector has {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Store(#[from] eyre::Error),
}

impl From<FeedbackError> for AppError {
    fn from(e: FeedbackError) -> Self {
        match e {
            FeedbackError::DimensionMismatch { .. } => AppError::BadRequest(e.to_string()),
            FeedbackError::Store(e) => AppError::Unhandled(e),
        }
    }
}

/// One online update of the user vector `u` toward (or away from) the
/// article embedding `v`.
///
/// Positive alpha is a convex blend, so `‖u‖` stays bounded by
/// `max(‖u‖, ‖v‖)`. Negative alpha mirrors the blend to the other side and
/// then rescales back to the previous magnitude: only the direction moves
/// away from `v`, the norm never grows.
pub fn feedback_step(u: &[f32], v: &[f32], alpha: f32) -> Vec<f32> {
    if alpha >= 0.0 {
        u.iter()
            .zip(v)
            .map(|(ui, vi)| (1.0 - alpha) * ui + alpha * vi)
            .collect()
    } else {
        let strength = alpha.abs();
        let pushed: Vec<f32> = u
            .iter()
            .zip(v)
            .map(|(ui, vi)| (1.0 + strength) * ui - strength * vi)
            .collect();
        let pushed_norm = vecmath::norm(&pushed);
        if pushed_norm > 0.0 {
            vecmath::scale(&pushed, vecmath::norm(u) / pushed_norm)
        } else {
            pushed
        }
    }
}

/// Record an interaction and fold it into the user vector. The interaction
/// row is written first: it is the audit trail, and a vector that misses one
/// step merely adapts a little slower on the next signal.
#[tracing::instrument(skip(conn))]
pub async fn apply(
    conn: &mut AsyncPgConnection,
    user: &str,
    article_id: &str,
    kind: InteractionKind,
) -> Result<(), FeedbackError> {
    store::upsert_interaction(conn, user, article_id, kind).await?;

    // An article still waiting for its embedding contributes nothing yet.
    let Some(v) = store::article_embedding(conn, article_id).await? else {
        return Ok(());
    };

    let alpha = kind.alpha();
    match store::get_user_vector(conn, user).await? {
        None => {
            if alpha > 0.0 {
                store::save_user_vector(conn, user, v).await?;
            }
        }
        Some(u) => {
            if u.len() != v.len() {
                return Err(FeedbackError::DimensionMismatch {
                    expected: u.len(),
                    actual: v.len(),
                });
            }
            let updated = feedback_step(&u, &v, alpha);
            store::save_user_vector(conn, user, updated).await?;
        }
    }

    Ok(())
}

async fn record(
    ctx: &App,
    user: &str,
    article_id: &str,
    kind: InteractionKind,
) -> Result<(), AppError> {
    let mut conn = ctx
        .diesel
        .get()
        .await
        .map_err(|e| AppError::Unhandled(e.into()))?;
    apply(&mut conn, user, article_id, kind).await?;
    Ok(())
}

pub async fn record_view(
    State(ctx): State<App>,
    UserId(user): UserId,
    Path(article_id): Path<String>,
) -> Result<(), AppError> {
    record(&ctx, &user, &article_id, InteractionKind::View).await
}

pub async fn record_deep_dive(
    State(ctx): State<App>,
    UserId(user): UserId,
    Path(article_id): Path<String>,
) -> Result<(), AppError> {
    record(&ctx, &user, &article_id, InteractionKind::DeepDive).await
}

pub async fn record_not_interested(
    State(ctx): State<App>,
    UserId(user): UserId,
    Path(article_id): Path<String>,
) -> Result<(), AppError> {
    record(&ctx, &user, &article_id, InteractionKind::NotInterested).await
}

#[cfg(test)]
mod test {
    use super::*;

    fn close(a: &[f32], b: &[f32]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in InteractionKind::ALL {
            assert_eq!(InteractionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(InteractionKind::parse("like"), None);
    }

    #[test]
    fn positive_step_is_a_convex_blend() {
        // deep_dive on B from u = e_A: expect 0.85*e_A + 0.15*e_B
        let u = vec![1.0, 0.0];
        let v = vec![0.0, 1.0];
        let stepped = feedback_step(&u, &v, InteractionKind::DeepDive.alpha());
        assert!(close(&stepped, &[0.85, 0.15]));
    }

    #[test]
    fn negative_step_preserves_magnitude() {
        let u = vec![0.85, 0.15];
        let v = vec![0.0, 1.0];
        let before = vecmath::norm(&u);
        let stepped = feedback_step(&u, &v, InteractionKind::NotInterested.alpha());
        assert!((vecmath::norm(&stepped) - before).abs() < 1e-5);
        // Direction moved away from v: the similarity to v must drop.
        assert!(
            vecmath::cosine_similarity(&stepped, &v) < vecmath::cosine_similarity(&u, &v)
        );
    }

    #[test]
    fn negative_step_works_on_unnormalized_vectors() {
        let u = vec![3.0, 4.0]; // norm 5
        let v = vec![0.0, 10.0];
        let stepped = feedback_step(&u, &v, -0.2);
        assert!((vecmath::norm(&stepped) - 5.0).abs() < 1e-4);
    }

    #[test]
    fn norm_stays_bounded_over_any_feedback_sequence() {
        let mut u = vec![0.6, 0.8];
        let targets = [vec![1.0, 0.0], vec![0.0, 2.0], vec![-1.5, 0.5]];
        let mut bound = vecmath::norm(&u);
        for v in &targets {
            bound = bound.max(vecmath::norm(v));
        }
        for (i, v) in targets.iter().cycle().take(30).enumerate() {
            let alpha = InteractionKind::ALL[i % 3].alpha();
            u = feedback_step(&u, v, alpha);
            assert!(vecmath::norm(&u) <= bound + 1e-4);
        }
    }

    #[test]
    fn zero_result_skips_rescale() {
        // u and v collinear so the mirror step can land on the origin;
        // rescaling by 0/0 must not produce NaN.
        let u = vec![1.0, 0.0];
        let v = vec![6.0, 0.0];
        let stepped = feedback_step(&u, &v, -0.2);
        assert!(stepped.iter().all(|x| x.is_finite()));
    }
}
