use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use diesel_async::AsyncPgConnection;
use serde::Serialize;

use crate::taxonomy;

use super::feedback::InteractionKind;
use super::health::{self, Distribution};
use super::store;

/// How many of the newest articles the daily ingestion chart looks at.
const DAILY_COUNT_WINDOW: i64 = 2000;

#[derive(Serialize, Debug)]
pub struct Stats {
    pub total_articles: i64,
    pub view_count: u64,
    pub not_interested_count: u64,
    pub category_counts: Distribution,
    pub daily_counts: BTreeMap<String, u64>,
}

/// Bucket collection timestamps by calendar day, oldest day first.
pub fn daily_counts<I: IntoIterator<Item = NaiveDateTime>>(timestamps: I) -> BTreeMap<String, u64> {
    let mut days: BTreeMap<String, u64> = BTreeMap::new();
    for ts in timestamps {
        *days.entry(ts.date().to_string()).or_insert(0) += 1;
    }
    days
}

pub async fn get_stats(conn: &mut AsyncPgConnection, user: &str) -> Result<Stats, eyre::Error> {
    let total_articles = store::article_count(conn).await?;

    let is_positive = |kind: &str| {
        kind == InteractionKind::View.as_str() || kind == InteractionKind::DeepDive.as_str()
    };

    let interactions = store::user_interaction_pairs(conn, user).await?;
    let view_count = interactions
        .iter()
        .filter(|(_, kind)| is_positive(kind))
        .count() as u64;
    let not_interested_count = interactions
        .iter()
        .filter(|(_, kind)| kind.as_str() == InteractionKind::NotInterested.as_str())
        .count() as u64;

    let viewed_ids: Vec<String> = interactions
        .into_iter()
        .filter(|(_, kind)| is_positive(kind))
        .map(|(article_id, _)| article_id)
        .collect();

    let category_counts = if viewed_ids.is_empty() {
        Distribution::default()
    } else {
        let categories = store::categories_for(conn, &viewed_ids).await?;
        Distribution(health::count_labels(
            categories
                .iter()
                .flat_map(|c| taxonomy::split_categories(c)),
        ))
    };

    let timestamps = store::latest_collected_timestamps(conn, DAILY_COUNT_WINDOW).await?;

    Ok(Stats {
        total_articles,
        view_count,
        not_interested_count,
        category_counts,
        daily_counts: daily_counts(timestamps),
    })
}

#[cfg(test)]
mod test {
    use chrono::NaiveDate;

    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn daily_counts_bucket_by_calendar_day() {
        let days = daily_counts([
            at(2024, 3, 1, 9),
            at(2024, 3, 1, 23),
            at(2024, 3, 2, 0),
        ]);
        assert_eq!(days.get("2024-03-01"), Some(&2));
        assert_eq!(days.get("2024-03-02"), Some(&1));
    }

    #[test]
    fn daily_counts_iterate_oldest_first() {
        let days = daily_counts([at(2024, 3, 5, 1), at(2024, 2, 28, 1)]);
        let keys: Vec<&String> = days.keys().collect();
        assert_eq!(keys, vec!["2024-02-28", "2024-03-05"]);
    }

    #[test]
    fn daily_counts_of_nothing_is_empty() {
        assert!(daily_counts([]).is_empty());
    }
}
