use diesel_async::AsyncPgConnection;

use crate::taxonomy;

use super::{health, store};

/// How many of the user's most-read categories feed the "よく読む" reason.
const TOP_CATEGORY_COUNT: usize = 3;
/// How far back into the positive history the top categories look.
const TOP_CATEGORY_WINDOW: i64 = 200;

/// One-line explanation of why an article is in the feed. Deterministic in
/// `(similarity, article categories, user top categories)`.
pub fn explain_recommendation(
    similarity: f64,
    category: &str,
    user_top_categories: &[String],
) -> String {
    let cats = taxonomy::split_categories(category);
    let matching = cats.iter().find(|c| user_top_categories.contains(*c));

    if similarity > 0.7 {
        let pct = (similarity * 100.0) as i64;
        format!("あなたの関心と{pct}%マッチ")
    } else if let Some(matched) = matching {
        format!("よく読む「{matched}」カテゴリの記事")
    } else if similarity > 0.3 {
        let pct = (similarity * 100.0) as i64;
        format!("関心に近い記事（{pct}%マッチ）")
    } else if let Some(first) = cats.first() {
        format!("新しい視点: {first}")
    } else {
        "多様性のための提案".to_string()
    }
}

/// The user's three most-read major categories over their recent positive
/// interactions. Computed once per feed request.
pub async fn user_top_categories(
    conn: &mut AsyncPgConnection,
    user: &str,
) -> Result<Vec<String>, eyre::Error> {
    let ids = store::recent_positive_ids(conn, user, TOP_CATEGORY_WINDOW).await?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let categories = store::categories_for(conn, &ids).await?;
    let labels = categories
        .iter()
        .flat_map(|c| taxonomy::split_categories(c));

    Ok(health::count_labels(labels)
        .into_iter()
        .take(TOP_CATEGORY_COUNT)
        .map(|(category, _)| category)
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn high_similarity_wins_over_category_match() {
        let top = vec!["経済".to_string()];
        assert_eq!(
            explain_recommendation(0.71, "IT・テクノロジー", &[]),
            "あなたの関心と71%マッチ"
        );
        assert_eq!(
            explain_recommendation(0.95, "経済", &top),
            "あなたの関心と95%マッチ"
        );
    }

    #[test]
    fn category_match_beats_medium_similarity() {
        let top = vec!["経済".to_string()];
        assert_eq!(
            explain_recommendation(0.50, "経済", &top),
            "よく読む「経済」カテゴリの記事"
        );
    }

    #[test]
    fn medium_similarity_without_match() {
        assert_eq!(
            explain_recommendation(0.50, "経済", &[]),
            "関心に近い記事（50%マッチ）"
        );
    }

    #[test]
    fn low_similarity_with_category_offers_a_new_angle() {
        assert_eq!(
            explain_recommendation(0.10, "政治, 経済", &[]),
            "新しい視点: 政治"
        );
    }

    #[test]
    fn bare_article_falls_back_to_diversity() {
        assert_eq!(explain_recommendation(0.0, "", &[]), "多様性のための提案");
    }

    #[test]
    fn boundary_values_are_exclusive() {
        // 0.7 and 0.3 sit below their thresholds.
        assert_eq!(
            explain_recommendation(0.7, "", &[]),
            "多様性のための提案"
        );
        assert_eq!(
            explain_recommendation(0.3, "社会", &[]),
            "新しい視点: 社会"
        );
    }
}
