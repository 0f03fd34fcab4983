// HTTP request handlers for API endpoints

use crate::api::models::*;
use crate::cart;
use crate::clients::mealie::parse_ingredient_line;
use crate::clients::{AhClient, MealieClient};
use crate::logging::LogHandle;
use crate::store::settings::{
    SETTING_AH_REFRESH_TOKEN, SETTING_AH_USER_TOKEN, SETTING_VERBOSE_LOGGING,
};
use crate::store::{Db, MappingStatus, SaveMapping, SettingsTokenSink};
use crate::suggest;
use actix_web::{web, HttpResponse, Result};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Health check endpoint
pub async fn health_check(db: web::Data<Db>) -> Result<HttpResponse> {
    let db_status = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&db.pool)
        .await
    {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    let response = ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        database: db_status.to_string(),
    });
    Ok(HttpResponse::Ok().json(response))
}

fn internal_error(e: impl std::fmt::Display) -> HttpResponse {
    HttpResponse::InternalServerError().json(ApiResponse::<Value>::error(e.to_string()))
}

/// Recipe list merged with per-recipe mapping stats. A Mealie outage
/// degrades to an empty list with the error attached, not a failed request.
pub async fn list_recipes(
    db: web::Data<Db>,
    mealie: web::Data<MealieClient>,
) -> Result<HttpResponse> {
    let raw = match mealie.get_recipes(100).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("failed to fetch recipes from Mealie: {}", e);
            let response = ApiResponse::success(RecipeListResponse {
                recipes: Vec::new(),
                error: Some(format!("Mealie niet bereikbaar: {e}")),
            });
            return Ok(HttpResponse::Ok().json(response));
        }
    };

    let slugs: Vec<String> = raw
        .iter()
        .filter_map(|r| r.get("slug").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
        .collect();
    let stats = match db.stats_for_recipes(&slugs).await {
        Ok(stats) => stats,
        Err(e) => return Ok(internal_error(e)),
    };
    let stats_by_slug: HashMap<&str, _> = stats
        .iter()
        .map(|s| (s.recipe_slug.as_str(), s))
        .collect();

    let recipes: Vec<RecipeListItem> = raw
        .iter()
        .filter_map(|r| {
            let slug = r.get("slug").and_then(|v| v.as_str())?;
            let stat = stats_by_slug.get(slug);
            Some(RecipeListItem {
                slug: slug.to_string(),
                name: r
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or(slug)
                    .to_string(),
                image: r
                    .get("image")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                total: stat.map_or(0, |s| s.total),
                mapped: stat.map_or(0, |s| s.mapped),
                skipped: stat.map_or(0, |s| s.skipped),
                ready: stat.is_some_and(|s| s.ready()),
            })
        })
        .collect();

    let response = ApiResponse::success(RecipeListResponse {
        recipes,
        error: None,
    });
    Ok(HttpResponse::Ok().json(response))
}

/// Recipe detail: ingredient lines joined with their mapping decisions.
pub async fn recipe_detail(
    path: web::Path<String>,
    db: web::Data<Db>,
    mealie: web::Data<MealieClient>,
) -> Result<HttpResponse> {
    let slug = path.into_inner();
    let recipe = match mealie.get_recipe(&slug).await {
        Ok(Some(recipe)) => recipe,
        Ok(None) => {
            return Ok(HttpResponse::NotFound()
                .json(ApiResponse::<Value>::error(format!("Recept '{slug}' niet gevonden"))));
        }
        Err(e) => return Ok(internal_error(e)),
    };

    let mappings = match db.mappings_for_recipe(&slug).await {
        Ok(rows) => rows,
        Err(e) => return Ok(internal_error(e)),
    };
    let mut by_reference: HashMap<String, _> = mappings
        .into_iter()
        .map(|m| (m.ingredient_reference_id.clone(), m))
        .collect();

    let ingredients: Vec<IngredientView> = recipe
        .ingredients
        .iter()
        .map(|ing| IngredientView {
            reference_id: ing.reference_id.clone(),
            display: ing.display_text(),
            mapping: by_reference.remove(&ing.reference_id),
        })
        .collect();

    let stats = match db.stats_for_recipes(std::slice::from_ref(&slug)).await {
        Ok(mut stats) => stats.pop(),
        Err(e) => return Ok(internal_error(e)),
    };

    let response = ApiResponse::success(RecipeDetailResponse {
        slug: recipe.slug,
        name: recipe.name,
        ingredients,
        stats,
    });
    Ok(HttpResponse::Ok().json(response))
}

/// Catalog search. Upstream failure degrades to an empty product list with
/// the error attached, so the mapping page stays usable.
pub async fn search_products(
    query: web::Query<SearchQuery>,
    ah: web::Data<AhClient>,
) -> Result<HttpResponse> {
    let q = query.q.trim();
    if q.is_empty() {
        return Ok(HttpResponse::BadRequest()
            .json(ApiResponse::<Value>::error("Zoekterm mag niet leeg zijn")));
    }

    match ah.search(q).await {
        Ok(products) => Ok(HttpResponse::Ok()
            .json(ApiResponse::success(json!({ "products": products })))),
        Err(e) => {
            tracing::warn!(query = q, "AH search failed: {}", e);
            Ok(HttpResponse::Ok().json(ApiResponse::success(json!({
                "products": [],
                "error": e.to_string(),
            }))))
        }
    }
}

pub async fn mapping_suggestions(
    query: web::Query<SuggestionQuery>,
    db: web::Data<Db>,
) -> Result<HttpResponse> {
    match suggest::suggestions_for(&db, &query.recipe_slug, &query.ingredient_display).await {
        Ok(suggestions) => Ok(HttpResponse::Ok()
            .json(ApiResponse::success(json!({ "suggestions": suggestions })))),
        Err(e) => Ok(internal_error(e)),
    }
}

pub async fn save_mapping(
    payload: web::Json<SaveMapping>,
    db: web::Data<Db>,
) -> Result<HttpResponse> {
    let input = payload.into_inner();
    if input.recipe_slug.trim().is_empty() || input.ingredient_reference_id.trim().is_empty() {
        return Ok(HttpResponse::BadRequest().json(ApiResponse::<Value>::error(
            "recipe_slug en ingredient_reference_id zijn verplicht",
        )));
    }
    if input.status == MappingStatus::Mapped && input.ah_product_id.is_none() {
        return Ok(HttpResponse::BadRequest()
            .json(ApiResponse::<Value>::error("Geen product geselecteerd")));
    }

    match db.save_mapping(&input).await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::success(json!({ "saved": true })))),
        Err(e) => Ok(internal_error(e)),
    }
}

pub async fn delete_mapping(
    payload: web::Json<DeleteMappingRequest>,
    db: web::Data<Db>,
) -> Result<HttpResponse> {
    match db
        .delete_mapping(&payload.recipe_slug, &payload.ingredient_reference_id)
        .await
    {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::success(json!({ "deleted": true })))),
        Err(e) => Ok(internal_error(e)),
    }
}

/// Week view: the canonical Monday-Sunday window, per-day recipe status, a
/// cart preview and the ingredient lines still waiting on a decision.
pub async fn mealplan_week(
    db: web::Data<Db>,
    mealie: web::Data<MealieClient>,
) -> Result<HttpResponse> {
    let today = chrono::Local::now().date_naive();
    let (start, end) = cart::week_range(today);

    let plans = match mealie.get_mealplans(start, end).await {
        Ok(plans) => plans,
        Err(e) => {
            tracing::warn!("failed to fetch meal plans: {}", e);
            return Ok(HttpResponse::BadGateway()
                .json(ApiResponse::<Value>::error(format!("Mealie niet bereikbaar: {e}"))));
        }
    };

    let slugs = cart::planned_slugs(&plans);
    let stats = match db.stats_for_recipes(&slugs).await {
        Ok(stats) => stats,
        Err(e) => return Ok(internal_error(e)),
    };
    let ready_by_slug: HashMap<&str, bool> = stats
        .iter()
        .map(|s| (s.recipe_slug.as_str(), s.ready()))
        .collect();

    let mut days = Vec::with_capacity(7);
    let mut day = start;
    while day <= end {
        let date = day.to_string();
        let recipes: Vec<MealplanDayRecipe> = plans
            .iter()
            .filter(|entry| entry.date == date)
            .filter_map(|entry| {
                let slug = entry.recipe_slug()?;
                let name = entry
                    .recipe
                    .as_ref()
                    .map(|r| r.name.clone())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| slug.clone());
                // A recipe with no mapping rows at all is not ready.
                let ready = ready_by_slug.get(slug.as_str()).copied().unwrap_or(false);
                Some(MealplanDayRecipe { slug, name, ready })
            })
            .collect();
        let status = if recipes.is_empty() {
            "empty"
        } else if recipes.iter().all(|r| r.ready) {
            "ready"
        } else {
            "needs_mapping"
        };
        days.push(MealplanDay {
            date,
            recipes,
            status: status.to_string(),
        });
        day += chrono::Duration::days(1);
    }

    let mapped_rows = match db.mapped_products_for_recipes(&slugs).await {
        Ok(rows) => rows,
        Err(e) => return Ok(internal_error(e)),
    };
    let cart_preview = cart::aggregate(&mapped_rows);

    let all_rows = match db.mappings_for_recipes(&slugs).await {
        Ok(rows) => rows,
        Err(e) => return Ok(internal_error(e)),
    };
    let unmapped: Vec<_> = all_rows
        .into_iter()
        .filter(|row| row.status == MappingStatus::Unmapped.as_str())
        .collect();

    let access = db.get_setting(SETTING_AH_USER_TOKEN).await.unwrap_or_default();
    let refresh = db
        .get_setting(SETTING_AH_REFRESH_TOKEN)
        .await
        .unwrap_or_default();

    let response = ApiResponse::success(MealplanResponse {
        start_date: start.to_string(),
        end_date: end.to_string(),
        days,
        cart_preview,
        unmapped,
        has_token: !access.is_empty() || !refresh.is_empty(),
    });
    Ok(HttpResponse::Ok().json(response))
}

/// Push this week's aggregated cart to AH. Precondition outcomes (nothing
/// planned, nothing mapped, no token) come back as unsuccessful responses
/// with a user-facing message, not as server errors.
pub async fn fill_cart(
    db: web::Data<Db>,
    mealie: web::Data<MealieClient>,
    ah: web::Data<AhClient>,
) -> Result<HttpResponse> {
    let today = chrono::Local::now().date_naive();
    match cart::fill_cart(&db, &mealie, &ah, today).await {
        Ok(outcome) => {
            let message = outcome.user_message();
            let success = outcome.is_success();
            let body = ApiResponse {
                success,
                data: Some(FillCartResponse { outcome, message }),
                error: None,
                meta: Some(Meta::now()),
            };
            Ok(HttpResponse::Ok().json(body))
        }
        Err(e) => {
            tracing::error!("cart fill failed: {:#}", e);
            Ok(HttpResponse::BadGateway().json(ApiResponse::<Value>::error(e.to_string())))
        }
    }
}

/// Import an externally extracted recipe into Mealie: create by name, then
/// patch in the parsed ingredient lines and instructions.
pub async fn import_recipe(
    payload: web::Json<ImportRecipeRequest>,
    mealie: web::Data<MealieClient>,
) -> Result<HttpResponse> {
    let input = payload.into_inner();
    let name = input.name.trim();
    if name.is_empty() {
        return Ok(HttpResponse::BadRequest()
            .json(ApiResponse::<Value>::error("Receptnaam is verplicht")));
    }

    let slug = match mealie.create_recipe(name).await {
        Ok(slug) => slug,
        Err(e) => {
            return Ok(HttpResponse::BadGateway()
                .json(ApiResponse::<Value>::error(format!("Recept aanmaken mislukt: {e}"))));
        }
    };

    let ingredients: Vec<Value> = input
        .ingredients
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| parse_ingredient_line(line))
        .collect();
    let instructions: Vec<Value> = input
        .instructions
        .iter()
        .filter(|step| !step.trim().is_empty())
        .map(|step| json!({ "text": step }))
        .collect();

    let mut data = Map::new();
    data.insert("description".to_string(), json!(input.description));
    if !input.recipe_yield.trim().is_empty() {
        data.insert("recipeYield".to_string(), json!(input.recipe_yield));
    }
    if !input.total_time.trim().is_empty() {
        data.insert("totalTime".to_string(), json!(input.total_time));
    }
    data.insert("recipeIngredient".to_string(), Value::Array(ingredients));
    data.insert("recipeInstructions".to_string(), Value::Array(instructions));

    match mealie.update_recipe(&slug, data).await {
        Ok(_) => Ok(HttpResponse::Ok().json(ApiResponse::success(json!({ "slug": slug })))),
        Err(e) => Ok(HttpResponse::BadGateway()
            .json(ApiResponse::<Value>::error(format!("Recept opslaan mislukt: {e}")))),
    }
}

pub async fn get_settings(
    db: web::Data<Db>,
    mealie: web::Data<MealieClient>,
    ah: web::Data<AhClient>,
) -> Result<HttpResponse> {
    let verbose = db
        .get_setting(SETTING_VERBOSE_LOGGING)
        .await
        .unwrap_or_default()
        == "true";
    let access = db.get_setting(SETTING_AH_USER_TOKEN).await.unwrap_or_default();
    let refresh = db
        .get_setting(SETTING_AH_REFRESH_TOKEN)
        .await
        .unwrap_or_default();
    let mealie_ok = mealie.health_check().await;

    let response = ApiResponse::success(SettingsResponse {
        verbose_logging: verbose,
        ah_token_set: !access.is_empty(),
        ah_refresh_token_set: !refresh.is_empty(),
        mealie_ok,
        ah_login_url: ah.login_url().to_string(),
    });
    Ok(HttpResponse::Ok().json(response))
}

/// Persist and apply the verbose-logging toggle.
pub async fn set_logging(
    payload: web::Json<LoggingRequest>,
    db: web::Data<Db>,
    log_handle: web::Data<LogHandle>,
) -> Result<HttpResponse> {
    let verbose = payload.verbose;
    if let Err(e) = db
        .set_setting(SETTING_VERBOSE_LOGGING, if verbose { "true" } else { "false" })
        .await
    {
        return Ok(internal_error(e));
    }
    log_handle.set_verbose(verbose);
    Ok(HttpResponse::Ok().json(ApiResponse::success(json!({ "verbose_logging": verbose }))))
}

/// Exchange a pasted OAuth callback URL (or bare code) for a user token
/// pair, persist it and install it in the live session.
pub async fn ah_code(
    payload: web::Json<AhCodeRequest>,
    db: web::Data<Db>,
    ah: web::Data<AhClient>,
) -> Result<HttpResponse> {
    let raw = payload.code.trim();
    if raw.is_empty() {
        return Ok(HttpResponse::BadRequest()
            .json(ApiResponse::<Value>::error("Code mag niet leeg zijn")));
    }

    // Users paste either the bare code or the whole appie://login-exit URL.
    let code = match url::Url::parse(raw) {
        Ok(parsed) => parsed
            .query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value.into_owned()),
        Err(_) => None,
    }
    .unwrap_or_else(|| raw.to_string());

    let pair = match ah.exchange_code(&code).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!("AH code exchange failed: {}", e);
            return Ok(HttpResponse::BadGateway()
                .json(ApiResponse::<Value>::error(format!("Code inwisselen mislukt: {e}"))));
        }
    };

    if let Err(e) = db.set_setting(SETTING_AH_USER_TOKEN, &pair.access_token).await {
        return Ok(internal_error(e));
    }
    if let Err(e) = db
        .set_setting(SETTING_AH_REFRESH_TOKEN, &pair.refresh_token)
        .await
    {
        return Ok(internal_error(e));
    }
    ah.set_user_tokens(
        &pair.access_token,
        &pair.refresh_token,
        Some(Arc::new(SettingsTokenSink::new(db.get_ref().clone()))),
    )
    .await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(json!({ "authenticated": true }))))
}
