//! Typed client for the habit resources.
//!
//! Every call goes through [`ApiClient`], so it is authorized and refreshed
//! like any other request. List endpoints may answer with a bare array or a
//! paginated `{"results": [...]}` envelope; both decode to a `Vec`.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::{self, ApiClient};
use crate::error::ApiError;
use crate::transport::ApiRequest;

pub const HABITS_PATH: &str = "habits/";
pub const DASHBOARD_PATH: &str = "habits/dashboard/";
pub const CATEGORIES_PATH: &str = "categories/";
pub const COMPLETIONS_PATH: &str = "completions/";

/// Points needed per level.
pub const POINTS_PER_LEVEL: i64 = 100;

/// Level reached at `total_points`, matching the server's rule.
#[must_use]
pub fn level_for_points(total_points: i64) -> i64 {
    total_points.max(0) / POINTS_PER_LEVEL + 1
}

// =============================================================================
// MODELS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
}

impl Frequency {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown frequency '{0}' (expected 'daily' or 'weekly')")]
pub struct UnknownFrequency(String);

impl FromStr for Frequency {
    type Err = UnknownFrequency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            _ => Err(UnknownFrequency(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<u64>,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub frequency: Frequency,
    pub points_per_completion: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub streak: u32,
    #[serde(default)]
    pub is_completed_today: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub id: u64,
    pub habit: u64,
    #[serde(default)]
    pub habit_name: Option<String>,
    pub completed_at: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelProgress {
    pub current: i64,
    pub needed: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub total_habits: u64,
    pub completed_today: u64,
    pub total_points: i64,
    pub current_level: i64,
    pub level_progress: LevelProgress,
    #[serde(default)]
    pub habits: Vec<Habit>,
    #[serde(default)]
    pub recent_completions: Vec<Completion>,
}

/// Write model for create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HabitDraft {
    pub name: String,
    pub description: String,
    pub category: Option<u64>,
    pub frequency: Frequency,
    pub points_per_completion: i64,
}

impl HabitDraft {
    pub const DEFAULT_POINTS: i64 = 10;

    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category: None,
            frequency: Frequency::Daily,
            points_per_completion: Self::DEFAULT_POINTS,
        }
    }
}

impl From<&Habit> for HabitDraft {
    fn from(habit: &Habit) -> Self {
        Self {
            name: habit.name.clone(),
            description: habit.description.clone(),
            category: habit.category,
            frequency: habit.frequency,
            points_per_completion: habit.points_per_completion,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListBody<T> {
    Bare(Vec<T>),
    Page { results: Vec<T> },
}

impl<T> From<ListBody<T>> for Vec<T> {
    fn from(body: ListBody<T>) -> Self {
        match body {
            ListBody::Bare(items) | ListBody::Page { results: items } => items,
        }
    }
}

// =============================================================================
// API
// =============================================================================

#[derive(Clone)]
pub struct HabitsApi {
    client: ApiClient,
}

impl HabitsApi {
    #[must_use]
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// # Errors
    ///
    /// Returns the classified [`ApiError`].
    pub async fn list_habits(&self) -> Result<Vec<Habit>, ApiError> {
        self.list(HABITS_PATH).await
    }

    /// # Errors
    ///
    /// Returns the classified [`ApiError`]; an unknown id is `Rejected { status: 404, .. }`.
    pub async fn get_habit(&self, id: u64) -> Result<Habit, ApiError> {
        self.client.get(&habit_path(id)).await
    }

    /// Create a habit. The server echoes only the write fields, so the result
    /// is the stored draft rather than a full [`Habit`].
    ///
    /// # Errors
    ///
    /// Returns the classified [`ApiError`], with per-field messages on 400.
    pub async fn create_habit(&self, draft: &HabitDraft) -> Result<HabitDraft, ApiError> {
        let created: CreatedHabit = self.client.post(HABITS_PATH, draft).await?;
        tracing::info!(name = %created.name, "habit created");
        Ok(created.into())
    }

    /// # Errors
    ///
    /// Returns the classified [`ApiError`].
    pub async fn update_habit(&self, id: u64, draft: &HabitDraft) -> Result<Habit, ApiError> {
        let habit: Habit = self.client.put(&habit_path(id), draft).await?;
        tracing::info!(habit_id = id, "habit updated");
        Ok(habit)
    }

    /// # Errors
    ///
    /// Returns the classified [`ApiError`].
    pub async fn delete_habit(&self, id: u64) -> Result<(), ApiError> {
        self.client.delete(&habit_path(id)).await?;
        tracing::info!(habit_id = id, "habit deleted");
        Ok(())
    }

    /// Record today's completion. A second completion on the same day is
    /// refused by the server with a 400.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ApiError`].
    pub async fn complete_habit(&self, id: u64, notes: Option<&str>) -> Result<Completion, ApiError> {
        let body = match notes {
            Some(notes) => json!({ "notes": notes }),
            None => json!({}),
        };
        let response = self
            .client
            .send(ApiRequest::post(format!("{}complete/", habit_path(id)), body))
            .await?;
        let completion: Completion = client::decode(response)?;
        tracing::info!(habit_id = id, completion_id = completion.id, "habit completed");
        Ok(completion)
    }

    /// # Errors
    ///
    /// Returns the classified [`ApiError`].
    pub async fn dashboard(&self) -> Result<Dashboard, ApiError> {
        self.client.get(DASHBOARD_PATH).await
    }

    /// # Errors
    ///
    /// Returns the classified [`ApiError`].
    pub async fn list_categories(&self) -> Result<Vec<Category>, ApiError> {
        self.list(CATEGORIES_PATH).await
    }

    /// # Errors
    ///
    /// Returns the classified [`ApiError`].
    pub async fn list_completions(&self) -> Result<Vec<Completion>, ApiError> {
        self.list(COMPLETIONS_PATH).await
    }

    async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ApiError> {
        let body: ListBody<T> = self.client.get(path).await?;
        Ok(body.into())
    }
}

/// `POST habits/` echoes the write fields only.
#[derive(Deserialize)]
struct CreatedHabit {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: Option<u64>,
    #[serde(default)]
    frequency: Frequency,
    #[serde(default = "default_points")]
    points_per_completion: i64,
}

fn default_points() -> i64 {
    HabitDraft::DEFAULT_POINTS
}

impl From<CreatedHabit> for HabitDraft {
    fn from(c: CreatedHabit) -> Self {
        Self {
            name: c.name,
            description: c.description,
            category: c.category,
            frequency: c.frequency,
            points_per_completion: c.points_per_completion,
        }
    }
}

fn habit_path(id: u64) -> String {
    format!("{HABITS_PATH}{id}/")
}

#[cfg(test)]
#[path = "habits_test.rs"]
mod tests;
