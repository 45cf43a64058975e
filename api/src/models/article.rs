use diesel::prelude::*;
use diesel::sql_types::{Float8, Text};
use pgvector::Vector;
use serde::{Deserialize, Serialize};

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::articles)]
pub struct NewArticle {
    pub id: String,
    pub link: String,
    pub title: String,
    pub summary: String,
    pub published: String,
    pub category: String,
    pub image_url: String,
    pub embedding: Option<Vector>,
}

/// The card-sized projection every feed-facing query selects.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::articles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ArticleCard {
    pub id: String,
    pub title: String,
    pub link: String,
    pub summary: String,
    pub published: String,
    pub category: String,
    pub image_url: String,
}

/// Row shape of the `match_articles` stored procedure.
#[derive(QueryableByName, Debug, Clone)]
pub struct MatchedArticleRow {
    #[diesel(sql_type = Text)]
    pub id: String,
    #[diesel(sql_type = Text)]
    pub title: String,
    #[diesel(sql_type = Text)]
    pub link: String,
    #[diesel(sql_type = Text)]
    pub summary: String,
    #[diesel(sql_type = Text)]
    pub published: String,
    #[diesel(sql_type = Text)]
    pub category: String,
    #[diesel(sql_type = Text)]
    pub image_url: String,
    #[diesel(sql_type = Float8)]
    pub similarity: f64,
}

/// Row shape of the `random_articles` stored procedure.
#[derive(QueryableByName, Debug, Clone)]
pub struct PickedArticleRow {
    #[diesel(sql_type = Text)]
    pub id: String,
    #[diesel(sql_type = Text)]
    pub title: String,
    #[diesel(sql_type = Text)]
    pub link: String,
    #[diesel(sql_type = Text)]
    pub summary: String,
    #[diesel(sql_type = Text)]
    pub published: String,
    #[diesel(sql_type = Text)]
    pub category: String,
    #[diesel(sql_type = Text)]
    pub image_url: String,
}

/// An article as the feed returns it: card fields plus the ranking
/// annotations. `reason` is absent on the latest-only fallback path, which
/// predates the annotation feature.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RankedArticle {
    pub id: String,
    pub title: String,
    pub link: String,
    pub summary: String,
    pub published: String,
    pub category: String,
    pub image_url: String,
    pub similarity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RankedArticle {
    pub fn from_card(card: ArticleCard, similarity: f64) -> Self {
        RankedArticle {
            id: card.id,
            title: card.title,
            link: card.link,
            summary: card.summary,
            published: card.published,
            category: card.category,
            image_url: card.image_url,
            similarity,
            reason: None,
        }
    }
}

impl From<MatchedArticleRow> for RankedArticle {
    fn from(row: MatchedArticleRow) -> Self {
        RankedArticle {
            id: row.id,
            title: row.title,
            link: row.link,
            summary: row.summary,
            published: row.published,
            category: row.category,
            image_url: row.image_url,
            similarity: row.similarity,
            reason: None,
        }
    }
}

impl From<PickedArticleRow> for RankedArticle {
    fn from(row: PickedArticleRow) -> Self {
        RankedArticle {
            id: row.id,
            title: row.title,
            link: row.link,
            summary: row.summary,
            published: row.published,
            category: row.category,
            image_url: row.image_url,
            similarity: 0.0,
            reason: None,
        }
    }
}
