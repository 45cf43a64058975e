//! Informational-health analytics: how diverse (or lopsided) a user's news
//! diet is, measured as normalized Shannon entropy over the category labels
//! of everything they read, at three levels of granularity.

use chrono::NaiveDate;
use diesel_async::AsyncPgConnection;
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use crate::models::user::NewHealthSnapshot;
use crate::taxonomy;

use super::store;

/// A label→count map kept in descending-count order. Serialized as a JSON
/// object whose key order is the count order, which is what the front-end
/// charts expect.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Distribution(pub Vec<(String, u64)>);

impl Serialize for Distribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, count) in &self.0 {
            map.serialize_entry(label, count)?;
        }
        map.end()
    }
}

#[derive(Serialize, Debug)]
pub struct InfoHealth {
    pub category_distribution: Distribution,
    pub diversity_score: i32,
    pub dominant_category: String,
    pub dominant_ratio: f64,
    pub bias_level: String,
    pub missing_categories: Vec<String>,
    pub total_viewed: usize,
}

#[derive(Serialize, Debug)]
pub struct LevelHealth {
    pub distribution: Distribution,
    pub diversity_score: i32,
    pub dominant: String,
    pub dominant_ratio: f64,
}

#[derive(Serialize, Debug)]
pub struct HierarchicalHealth {
    pub major: LevelHealth,
    pub medium: LevelHealth,
    pub minor: LevelHealth,
    pub total_viewed: usize,
}

#[derive(Serialize, Debug)]
pub struct HealthHistoryEntry {
    pub score_date: NaiveDate,
    pub diversity: i32,
    pub bias_ratio: f64,
    pub top_category: String,
    pub detail: serde_json::Value,
}

/// Count labels preserving first-seen order, then sort by count descending.
/// The sort is stable, so ties keep their first-seen order.
pub fn count_labels<I: IntoIterator<Item = String>>(items: I) -> Vec<(String, u64)> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: std::collections::HashMap<String, u64> = std::collections::HashMap::new();

    for item in items {
        match counts.get_mut(&item) {
            Some(c) => *c += 1,
            None => {
                counts.insert(item.clone(), 1);
                order.push(item);
            }
        }
    }

    let mut counted: Vec<(String, u64)> = order
        .into_iter()
        .map(|label| {
            let count = counts[&label];
            (label, count)
        })
        .collect();
    counted.sort_by(|a, b| b.1.cmp(&a.1));
    counted
}

/// Normalized Shannon entropy scaled to 0–100. A single label (or none) is
/// zero diversity; a uniform spread over n ≥ 2 labels is 100.
pub fn diversity_score(counts: &[(String, u64)]) -> i32 {
    if counts.len() <= 1 {
        return 0;
    }
    let total: u64 = counts.iter().map(|(_, c)| *c).sum();
    let total = total as f64;
    let entropy: f64 = counts
        .iter()
        .map(|(_, c)| {
            let p = *c as f64 / total;
            -p * p.log2()
        })
        .sum();
    let max_entropy = (counts.len() as f64).log2();
    ((entropy / max_entropy) * 100.0) as i32
}

pub fn bias_level(dominant_ratio: f64) -> &'static str {
    if dominant_ratio > 0.6 {
        "偏食（強）"
    } else if dominant_ratio > 0.4 {
        "やや偏り"
    } else {
        "バランス良好"
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn empty_info_health(total_viewed: usize) -> InfoHealth {
    InfoHealth {
        category_distribution: Distribution::default(),
        diversity_score: 0,
        dominant_category: String::new(),
        dominant_ratio: 0.0,
        bias_level: "データ不足".to_string(),
        missing_categories: taxonomy::ONBOARDING_CATEGORIES
            .iter()
            .map(|c| c.to_string())
            .collect(),
        total_viewed,
    }
}

pub async fn info_health(
    conn: &mut AsyncPgConnection,
    user: &str,
) -> Result<InfoHealth, eyre::Error> {
    let viewed_ids = store::positive_ids(conn, user).await?;
    if viewed_ids.is_empty() {
        return Ok(empty_info_health(0));
    }

    let categories = store::categories_for(conn, &viewed_ids).await?;
    let labels: Vec<String> = categories
        .iter()
        .flat_map(|c| taxonomy::split_categories(c))
        .collect();
    if labels.is_empty() {
        return Ok(empty_info_health(viewed_ids.len()));
    }

    let counted = count_labels(labels);
    let total: u64 = counted.iter().map(|(_, c)| *c).sum();
    let score = diversity_score(&counted);

    let (dominant_category, dominant_count) = counted[0].clone();
    let dominant_ratio = dominant_count as f64 / total as f64;

    let missing = taxonomy::ONBOARDING_CATEGORIES
        .iter()
        .filter(|c| !counted.iter().any(|(label, _)| label == *c))
        .map(|c| c.to_string())
        .collect();

    Ok(InfoHealth {
        diversity_score: score,
        dominant_ratio: round2(dominant_ratio),
        bias_level: bias_level(dominant_ratio).to_string(),
        missing_categories: missing,
        total_viewed: viewed_ids.len(),
        dominant_category,
        category_distribution: Distribution(counted),
    })
}

/// Health of one label level; the distribution is capped at the ten largest
/// entries for display, the score uses all of them.
pub fn level_health(items: Vec<String>) -> LevelHealth {
    let counted = count_labels(items);
    if counted.is_empty() {
        return LevelHealth {
            distribution: Distribution::default(),
            diversity_score: 0,
            dominant: String::new(),
            dominant_ratio: 0.0,
        };
    }

    let total: u64 = counted.iter().map(|(_, c)| *c).sum();
    let score = diversity_score(&counted);
    let (dominant, dominant_count) = counted[0].clone();

    LevelHealth {
        distribution: Distribution(counted.into_iter().take(10).collect()),
        diversity_score: score,
        dominant,
        dominant_ratio: round2(dominant_count as f64 / total as f64),
    }
}

pub async fn hierarchical_health(
    conn: &mut AsyncPgConnection,
    user: &str,
) -> Result<HierarchicalHealth, eyre::Error> {
    let viewed_ids = store::positive_ids(conn, user).await?;
    if viewed_ids.is_empty() {
        return Ok(HierarchicalHealth {
            major: level_health(Vec::new()),
            medium: level_health(Vec::new()),
            minor: level_health(Vec::new()),
            total_viewed: 0,
        });
    }

    let rows = store::label_rows(conn, &viewed_ids).await?;

    let mut major_list: Vec<String> = Vec::new();
    let mut medium_list: Vec<String> = Vec::new();
    let mut minor_list: Vec<String> = Vec::new();

    for (title, category, cached_medium, cached_minor) in rows {
        major_list.extend(taxonomy::split_categories(&category));

        // Prefer the classifications cached at ingestion time; fall back to
        // the keyword scan for articles collected before they existed.
        match cached_medium.filter(|m| !m.is_empty()) {
            Some(medium) => medium_list.push(medium),
            None => medium_list.push(taxonomy::classify_medium(&title, &category)),
        }
        match cached_minor {
            Some(minors) => minor_list.extend(minors),
            None => minor_list.extend(taxonomy::extract_minor_keywords(&title)),
        }
    }

    Ok(HierarchicalHealth {
        major: level_health(major_list),
        medium: level_health(medium_list),
        minor: level_health(minor_list),
        total_viewed: viewed_ids.len(),
    })
}

/// Persist today's health profile; overwrites the row on repeat calls within
/// the same calendar day. A user with no positive history has no profile to
/// record yet, so this is a no-op for them.
pub async fn record_snapshot(
    conn: &mut AsyncPgConnection,
    user: &str,
) -> Result<(), eyre::Error> {
    let health = info_health(conn, user).await?;
    if health.total_viewed == 0 {
        return Ok(());
    }
    let hierarchical = hierarchical_health(conn, user).await?;

    store::upsert_health_snapshot(
        conn,
        NewHealthSnapshot {
            user_id: user.to_string(),
            score_date: chrono::Local::now().date_naive(),
            diversity: health.diversity_score,
            bias_ratio: health.dominant_ratio,
            top_category: health.dominant_category,
            detail: serde_json::json!({
                "major_diversity": hierarchical.major.diversity_score,
                "medium_diversity": hierarchical.medium.diversity_score,
                "minor_diversity": hierarchical.minor.diversity_score,
            }),
        },
    )
    .await
}

pub async fn history(
    conn: &mut AsyncPgConnection,
    user: &str,
    days: i64,
) -> Result<Vec<HealthHistoryEntry>, eyre::Error> {
    let rows = store::health_history(conn, user, days).await?;
    Ok(rows
        .into_iter()
        .map(
            |(score_date, diversity, bias_ratio, top_category, detail)| HealthHistoryEntry {
                score_date,
                diversity,
                bias_ratio,
                top_category,
                detail,
            },
        )
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;

    fn labels(spec: &[(&str, usize)]) -> Vec<String> {
        spec.iter()
            .flat_map(|(label, n)| std::iter::repeat_n(label.to_string(), *n))
            .collect()
    }

    #[test]
    fn counting_orders_by_descending_count() {
        let counted = count_labels(labels(&[("政治", 2), ("経済", 8)]));
        assert_eq!(
            counted,
            vec![("経済".to_string(), 8), ("政治".to_string(), 2)]
        );
    }

    #[test]
    fn counting_keeps_first_seen_order_on_ties() {
        let counted = count_labels(labels(&[("社会", 1), ("国際", 1)]));
        assert_eq!(
            counted,
            vec![("社会".to_string(), 1), ("国際".to_string(), 1)]
        );
    }

    #[test]
    fn diversity_of_one_label_is_zero() {
        assert_eq!(diversity_score(&count_labels(labels(&[("経済", 10)]))), 0);
        assert_eq!(diversity_score(&[]), 0);
    }

    #[test]
    fn diversity_of_uniform_spread_is_hundred() {
        assert_eq!(
            diversity_score(&count_labels(labels(&[("経済", 5), ("政治", 5)]))),
            100
        );
        assert_eq!(
            diversity_score(&count_labels(labels(&[
                ("経済", 3),
                ("政治", 3),
                ("社会", 3),
                ("国際", 3),
            ]))),
            100
        );
    }

    #[test]
    fn diversity_of_skewed_history() {
        // 8×経済 + 2×政治: H ≈ 0.7219, H_max = 1 → floor(72.19) = 72
        let counted = count_labels(labels(&[("経済", 8), ("政治", 2)]));
        assert_eq!(diversity_score(&counted), 72);
    }

    #[test]
    fn diversity_stays_in_bounds() {
        for spec in [
            vec![("a", 1), ("b", 99)],
            vec![("a", 7), ("b", 3), ("c", 1)],
            vec![("a", 1), ("b", 1), ("c", 1), ("d", 97)],
        ] {
            let score = diversity_score(&count_labels(labels(&spec)));
            assert!((0..=100).contains(&score), "score {score} out of range");
        }
    }

    #[test]
    fn bias_labels_follow_the_dominant_ratio() {
        assert_eq!(bias_level(0.8), "偏食（強）");
        assert_eq!(bias_level(0.5), "やや偏り");
        assert_eq!(bias_level(0.3), "バランス良好");
        // Boundaries are exclusive
        assert_eq!(bias_level(0.6), "やや偏り");
        assert_eq!(bias_level(0.4), "バランス良好");
    }

    #[test]
    fn level_health_of_skewed_history() {
        let level = level_health(labels(&[("経済", 8), ("政治", 2)]));
        assert_eq!(level.diversity_score, 72);
        assert_eq!(level.dominant, "経済");
        assert_eq!(level.dominant_ratio, 0.8);
    }

    #[test]
    fn level_health_caps_the_distribution_at_ten() {
        let many: Vec<(String, usize)> = (0..16).map(|i| (format!("カテゴリ{i}"), 1)).collect();
        let spec: Vec<(&str, usize)> = many.iter().map(|(l, n)| (l.as_str(), *n)).collect();
        let level = level_health(labels(&spec));
        assert_eq!(level.distribution.0.len(), 10);
        // The score still reflects all sixteen labels.
        assert_eq!(level.diversity_score, 100);
    }

    #[test]
    fn empty_level_health_is_all_zero() {
        let level = level_health(Vec::new());
        assert_eq!(level.diversity_score, 0);
        assert_eq!(level.dominant, "");
        assert_eq!(level.dominant_ratio, 0.0);
        assert!(level.distribution.0.is_empty());
    }

    #[test]
    fn distribution_serializes_in_count_order() {
        let dist = Distribution(vec![("経済".to_string(), 8), ("政治".to_string(), 2)]);
        let json = serde_json::to_string(&dist).unwrap();
        assert_eq!(json, r#"{"経済":8,"政治":2}"#);
    }
}
