use crate::errors::{AppError, AppResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CounterField {
    Likes,
    Comments,
    Messages,
    Views,
}

impl CounterField {
    pub const ALL: [CounterField; 4] = [Self::Likes, Self::Comments, Self::Messages, Self::Views];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Likes => "likes",
            Self::Comments => "comments",
            Self::Messages => "messages",
            Self::Views => "views",
        }
    }
}

impl fmt::Display for CounterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CounterField {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "likes" => Ok(Self::Likes),
            "comments" => Ok(Self::Comments),
            "messages" => Ok(Self::Messages),
            "views" => Ok(Self::Views),
            other => Err(AppError::validation(
                "field",
                format!("unknown counter '{}'", other),
            )),
        }
    }
}

/// The four validated, non-negative engagement counters of one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Counters {
    pub likes: u64,
    pub comments: u64,
    pub messages: u64,
    pub views: u64,
}

impl Counters {
    pub fn new(likes: u64, comments: u64, messages: u64, views: u64) -> Self {
        Self {
            likes,
            comments,
            messages,
            views,
        }
    }

    pub fn set(&mut self, field: CounterField, value: u64) {
        match field {
            CounterField::Likes => self.likes = value,
            CounterField::Comments => self.comments = value,
            CounterField::Messages => self.messages = value,
            CounterField::Views => self.views = value,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Counters as they arrive from a caller, before the non-negative check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CounterInput {
    pub likes: i64,
    pub comments: i64,
    pub messages: i64,
    pub views: i64,
}

impl CounterInput {
    pub fn new(likes: i64, comments: i64, messages: i64, views: i64) -> Self {
        Self {
            likes,
            comments,
            messages,
            views,
        }
    }

    fn raw(&self, field: CounterField) -> i64 {
        match field {
            CounterField::Likes => self.likes,
            CounterField::Comments => self.comments,
            CounterField::Messages => self.messages,
            CounterField::Views => self.views,
        }
    }

    pub fn validate(&self) -> AppResult<Counters> {
        let mut counters = Counters::default();
        for field in CounterField::ALL {
            let raw = self.raw(field);
            let value = u64::try_from(raw).map_err(|_| {
                AppError::validation(field.as_str(), format!("must be a non-negative integer, got {}", raw))
            })?;
            counters.set(field, value);
        }
        Ok(counters)
    }
}

impl From<Counters> for CounterInput {
    fn from(value: Counters) -> Self {
        let clamp = |raw: u64| i64::try_from(raw).unwrap_or(i64::MAX);
        Self {
            likes: clamp(value.likes),
            comments: clamp(value.comments),
            messages: clamp(value.messages),
            views: clamp(value.views),
        }
    }
}

/// One element of a batch write: a date plus its four counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricEntry {
    pub date: NaiveDate,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub comments: i64,
    #[serde(default)]
    pub messages: i64,
    #[serde(default)]
    pub views: i64,
}

impl MetricEntry {
    pub fn new(date: NaiveDate, counters: CounterInput) -> Self {
        Self {
            date,
            likes: counters.likes,
            comments: counters.comments,
            messages: counters.messages,
            views: counters.views,
        }
    }

    pub fn counters(&self) -> CounterInput {
        CounterInput::new(self.likes, self.comments, self.messages, self.views)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetricRow {
    pub work_id: i64,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub counters: Counters,
    pub updated_at: DateTime<Utc>,
}

/// One dense-grid entry; days without a stored row carry zero counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRow {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub counters: Counters,
}

impl GridRow {
    pub fn zero(date: NaiveDate) -> Self {
        Self {
            date,
            counters: Counters::default(),
        }
    }
}

/// Historical peak of each counter for one work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterMaxima {
    pub max_likes: u64,
    pub max_comments: u64,
    pub max_messages: u64,
    pub max_views: u64,
}

impl CounterMaxima {
    pub fn absorb(&mut self, counters: &Counters) {
        self.max_likes = self.max_likes.max(counters.likes);
        self.max_comments = self.max_comments.max(counters.comments);
        self.max_messages = self.max_messages.max(counters.messages);
        self.max_views = self.max_views.max(counters.views);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveCategoryPayload {
    pub id: Option<i64>,
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub category_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    #[serde(flatten)]
    pub account: Account,
    pub category_name: Option<String>,
    pub category_color: Option<String>,
    pub works_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAccountPayload {
    pub id: Option<i64>,
    pub name: String,
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Work {
    pub id: i64,
    pub account_id: i64,
    pub title: String,
    pub cover_image: Option<String>,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkPayload {
    pub account_id: i64,
    pub title: String,
    pub cover_image: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkPayload {
    pub id: i64,
    pub title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkSummary {
    #[serde(flatten)]
    pub work: Work,
    #[serde(flatten)]
    pub maxima: CounterMaxima,
    pub metrics_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListWorksFilters {
    pub account_id: Option<i64>,
    pub search: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct AppSettings {
    pub works_list_limit: u32,
    pub default_category_color: String,
    pub seed_default_categories: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            works_list_limit: 100,
            default_category_color: "#20c997".to_string(),
            seed_default_categories: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanResponse {
    pub ok: bool,
}
