use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde::Serialize;

#[derive(Queryable, Selectable, Debug, Serialize, Clone)]
#[diesel(table_name = crate::schema::user_profile)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: String,
    pub onboarded: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::user_profile)]
pub struct NewUserProfile {
    pub user_id: String,
    pub display_name: String,
    pub onboarded: bool,
}

#[derive(Queryable, Selectable, Debug, Serialize, Clone)]
#[diesel(table_name = crate::schema::user_interactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Interaction {
    pub id: i32,
    pub user_id: String,
    pub article_id: String,
    pub interaction_type: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::health_score_history)]
pub struct NewHealthSnapshot {
    pub user_id: String,
    pub score_date: NaiveDate,
    pub diversity: i32,
    pub bias_ratio: f64,
    pub top_category: String,
    pub detail: serde_json::Value,
}
