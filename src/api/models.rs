// API request/response models (DTOs)

use crate::cart::CartLine;
use crate::store::{MappingRow, MappingStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: Some(Meta::now()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            meta: Some(Meta::now()),
        }
    }
}

/// Metadata included in all API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub version: String,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

/// One recipe in the list view, with its mapping progress.
#[derive(Debug, Serialize)]
pub struct RecipeListItem {
    pub slug: String,
    pub name: String,
    pub image: Option<String>,
    pub total: i64,
    pub mapped: i64,
    pub skipped: i64,
    pub ready: bool,
}

#[derive(Debug, Serialize)]
pub struct RecipeListResponse {
    pub recipes: Vec<RecipeListItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One ingredient line of a recipe, joined with its mapping decision.
#[derive(Debug, Serialize)]
pub struct IngredientView {
    pub reference_id: String,
    pub display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<MappingRow>,
}

#[derive(Debug, Serialize)]
pub struct RecipeDetailResponse {
    pub slug: String,
    pub name: String,
    pub ingredients: Vec<IngredientView>,
    pub stats: Option<MappingStats>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct SuggestionQuery {
    pub recipe_slug: String,
    pub ingredient_display: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteMappingRequest {
    pub recipe_slug: String,
    pub ingredient_reference_id: String,
}

/// Per-day entry of the week view.
#[derive(Debug, Serialize)]
pub struct MealplanDay {
    pub date: String,
    pub recipes: Vec<MealplanDayRecipe>,
    /// "ready" | "needs_mapping" | "empty"
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct MealplanDayRecipe {
    pub slug: String,
    pub name: String,
    pub ready: bool,
}

#[derive(Debug, Serialize)]
pub struct MealplanResponse {
    pub start_date: String,
    pub end_date: String,
    pub days: Vec<MealplanDay>,
    pub cart_preview: Vec<CartLine>,
    pub unmapped: Vec<MappingRow>,
    pub has_token: bool,
}

#[derive(Debug, Serialize)]
pub struct FillCartResponse {
    pub outcome: crate::cart::FillOutcome,
    pub message: String,
}

/// Externally extracted recipe to import into Mealie.
#[derive(Debug, Deserialize)]
pub struct ImportRecipeRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "yield")]
    pub recipe_yield: String,
    #[serde(default)]
    pub total_time: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub verbose_logging: bool,
    pub ah_token_set: bool,
    pub ah_refresh_token_set: bool,
    pub mealie_ok: bool,
    pub ah_login_url: String,
}

#[derive(Debug, Deserialize)]
pub struct LoggingRequest {
    pub verbose: bool,
}

#[derive(Debug, Deserialize)]
pub struct AhCodeRequest {
    /// A raw authorization code or the full `appie://login-exit?code=...`
    /// callback URL pasted by the user.
    pub code: String,
}
