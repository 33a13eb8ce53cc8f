// =============================================================================
// CATEGORY MODELS
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Category {
    pub id: Uuid,
    /// Unique display name
    pub name: String,
    pub description: Option<String>,
    /// Unique URL-friendly identifier
    pub slug: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Category {
    pub fn apply_patch(&mut self, patch: CategoryPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = Some(description);
        }
        if let Some(slug) = patch.slug {
            self.slug = slug;
        }
        if let Some(is_active) = patch.is_active {
            self.is_active = is_active;
        }
    }
}

fn default_true() -> bool {
    true
}

/// Request body for creating a category
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewCategory {
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    pub description: Option<String>,

    #[validate(length(min = 1, max = 120))]
    pub slug: String,

    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Partial category update
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CategoryPatch {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub slug: Option<String>,
    pub is_active: Option<bool>,
}

/// Category as returned by the API, with its product count
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryView {
    #[serde(flatten)]
    pub category: Category,
    pub products_count: i64,
}
