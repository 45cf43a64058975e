use diesel_async::AsyncPgConnection;

use crate::models::article::RankedArticle;
use crate::vecmath;

use super::store;

/// Weight of the disliked centroid when seeding the interest vector.
const DISLIKE_WEIGHT: f32 = 0.3;
/// Over-fetch margin when padding category samples with random picks.
const RANDOM_PAD_MARGIN: usize = 5;

pub async fn is_onboarded(conn: &mut AsyncPgConnection, user: &str) -> Result<bool, eyre::Error> {
    store::ensure_profile(conn, user).await?;
    store::is_onboarded(conn, user).await
}

/// Representative articles for the onboarding vote: a spread over the chosen
/// categories, padded with random picks when the corpus is thin.
pub async fn onboarding_articles(
    conn: &mut AsyncPgConnection,
    categories: &[String],
    count: usize,
) -> Result<Vec<RankedArticle>, eyre::Error> {
    let per_category = count.div_ceil(categories.len().max(1)).max(3);

    let mut results: Vec<RankedArticle> = Vec::new();
    for category in categories {
        let cards = store::onboarding_samples(conn, category, per_category as i64).await?;
        results.extend(cards.into_iter().map(|c| RankedArticle::from_card(c, 0.0)));
    }

    if results.len() < count {
        let picked =
            store::random_articles(conn, (count - results.len() + RANDOM_PAD_MARGIN) as i64)
                .await?;
        for article in picked {
            if results.len() >= count {
                break;
            }
            if !results.iter().any(|r| r.id == article.id) {
                results.push(article);
            }
        }
    }

    results.truncate(count);
    Ok(results)
}

/// Seed interest vector from the onboarding votes.
///
/// The liked centroid carries the signal; when dislikes exist their centroid
/// is subtracted at reduced weight and the result is rescaled back to the
/// liked centroid's magnitude, so dislikes rotate the seed without shrinking
/// or inflating it. No likes, no seed.
pub fn seed_vector(liked: &[Vec<f32>], disliked: &[Vec<f32>]) -> Option<Vec<f32>> {
    let positive = vecmath::mean(liked)?;
    let Some(negative) = vecmath::mean(disliked) else {
        return Some(positive);
    };

    let shifted: Vec<f32> = positive
        .iter()
        .zip(&negative)
        .map(|(p, n)| p - DISLIKE_WEIGHT * n)
        .collect();

    let shifted_norm = vecmath::norm(&shifted);
    if shifted_norm > 0.0 {
        Some(vecmath::scale(
            &shifted,
            vecmath::norm(&positive) / shifted_norm,
        ))
    } else {
        Some(shifted)
    }
}

#[tracing::instrument(skip(conn, liked_ids, disliked_ids))]
pub async fn complete_onboarding(
    conn: &mut AsyncPgConnection,
    user: &str,
    liked_ids: &[String],
    disliked_ids: &[String],
) -> Result<(), eyre::Error> {
    if !liked_ids.is_empty() {
        let liked = store::embeddings_of(conn, liked_ids).await?;
        let disliked = if disliked_ids.is_empty() {
            Vec::new()
        } else {
            store::embeddings_of(conn, disliked_ids).await?
        };

        if let Some(seed) = seed_vector(&liked, &disliked) {
            store::save_user_vector(conn, user, seed).await?;
        }
    }

    store::ensure_profile(conn, user).await?;
    store::set_onboarded(conn, user).await?;

    tracing::info!(user, "Onboarding completed");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn no_likes_means_no_seed() {
        assert!(seed_vector(&[], &[vec![1.0, 0.0]]).is_none());
    }

    #[test]
    fn likes_alone_seed_with_their_mean() {
        let seed = seed_vector(&[vec![1.0, 0.0], vec![0.0, 1.0]], &[]).unwrap();
        assert!((seed[0] - 0.5).abs() < 1e-6);
        assert!((seed[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn dislikes_rotate_but_keep_the_positive_magnitude() {
        let liked = vec![vec![1.0, 0.0]];
        let disliked = vec![vec![0.0, 1.0]];
        let seed = seed_vector(&liked, &disliked).unwrap();

        // Direction: away from the dislike, i.e. negative second component.
        assert!(seed[1] < 0.0);
        // Magnitude: that of the liked centroid.
        assert!((vecmath::norm(&seed) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn seed_components_follow_the_reference_formula() {
        // seed' = μ⁺ − 0.3·μ⁻ = (1, −0.3), then rescaled to ‖μ⁺‖ = 1.
        let seed = seed_vector(&[vec![1.0, 0.0]], &[vec![0.0, 1.0]]).unwrap();
        let expected_norm = (1.0f32 + 0.09).sqrt();
        assert!((seed[0] - 1.0 / expected_norm).abs() < 1e-5);
        assert!((seed[1] + 0.3 / expected_norm).abs() < 1e-5);
    }
}
