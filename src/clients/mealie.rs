//! Mealie client: recipe and meal-plan gateway.

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Mealie sometimes wraps list endpoints in an `{"items": [...]}` envelope
/// and sometimes returns a bare array, depending on version and endpoint.
/// Normalized here once, at the gateway boundary.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListEnvelope<T> {
    Envelope { items: Vec<T> },
    Bare(Vec<T>),
}

impl<T> ListEnvelope<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            ListEnvelope::Envelope { items } => items,
            ListEnvelope::Bare(items) => items,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamedEntity {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeIngredient {
    #[serde(default, rename = "referenceId")]
    pub reference_id: String,
    #[serde(default)]
    pub display: String,
    #[serde(default, rename = "originalText")]
    pub original_text: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit: Option<NamedEntity>,
    #[serde(default)]
    pub food: Option<NamedEntity>,
}

impl RecipeIngredient {
    /// Human-readable line for this ingredient. Falls back to compositing
    /// quantity + unit + food + note when the gateway gives no display text.
    pub fn display_text(&self) -> String {
        if !self.display.is_empty() {
            return self.display.clone();
        }
        if let Some(text) = self.original_text.as_deref().filter(|t| !t.is_empty()) {
            return text.to_string();
        }
        if let Some(note) = self.note.as_deref().filter(|n| !n.is_empty()) {
            if self.quantity.is_none() && self.unit.is_none() && self.food.is_none() {
                return note.to_string();
            }
        }

        let mut parts: Vec<String> = Vec::new();
        if let Some(qty) = self.quantity {
            parts.push(format_quantity(qty));
        }
        if let Some(unit) = self.unit.as_ref().filter(|u| !u.name.is_empty()) {
            parts.push(unit.name.clone());
        }
        if let Some(food) = self.food.as_ref().filter(|f| !f.name.is_empty()) {
            parts.push(food.name.clone());
        }
        if let Some(note) = self.note.as_deref().filter(|n| !n.is_empty()) {
            parts.push(note.to_string());
        }
        if parts.is_empty() {
            "(onbekend)".to_string()
        } else {
            parts.join(" ")
        }
    }
}

fn format_quantity(qty: f64) -> String {
    if (qty.fract()).abs() < f64::EPSILON {
        format!("{}", qty as i64)
    } else {
        format!("{qty}")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "recipeIngredient")]
    pub ingredients: Vec<RecipeIngredient>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MealplanRecipe {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MealplanEntry {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub recipe: Option<MealplanRecipe>,
    #[serde(default, rename = "recipeId")]
    pub recipe_id: Option<String>,
}

impl MealplanEntry {
    /// The planned recipe's slug, falling back to the raw recipe id when the
    /// plan entry has no embedded recipe.
    pub fn recipe_slug(&self) -> Option<String> {
        if let Some(recipe) = &self.recipe {
            if !recipe.slug.is_empty() {
                return Some(recipe.slug.clone());
            }
        }
        self.recipe_id.clone().filter(|id| !id.is_empty())
    }
}

/// Fields safe to read back from GET and resend on update; everything else
/// trips Mealie's validation.
const SAFE_UPDATE_FIELDS: &[&str] = &[
    "name",
    "description",
    "recipeYield",
    "totalTime",
    "prepTime",
    "performTime",
    "recipeCategory",
    "tags",
    "tools",
    "nutrition",
    "recipeIngredient",
    "recipeInstructions",
    "settings",
    "notes",
    "orgURL",
    "slug",
];

#[derive(Clone)]
pub struct MealieClient {
    base_url: String,
    api_token: Option<String>,
    http: Client,
}

impl MealieClient {
    pub fn new(base_url: &str, api_token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.filter(|t| !t.trim().is_empty()),
            http,
        })
    }

    pub fn from_env() -> Result<Self> {
        let base_url = crate::util::env::env_opt("MEALIE_URL")
            .unwrap_or_else(|| "http://mealie:9000".to_string());
        Self::new(&base_url, crate::util::env::env_opt("MEALIE_API_TOKEN"))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }
        req
    }

    pub async fn get_recipes(&self, per_page: u32) -> Result<Vec<Value>> {
        debug!(per_page, "fetching recipes");
        let resp = self
            .request(reqwest::Method::GET, "/api/recipes")
            .query(&[("page", "1".to_string()), ("perPage", per_page.to_string())])
            .send()
            .await?
            .error_for_status()?;
        let body: ListEnvelope<Value> = resp.json().await?;
        Ok(body.into_items())
    }

    /// Returns `None` when the slug does not exist upstream.
    pub async fn get_recipe(&self, slug: &str) -> Result<Option<Recipe>> {
        debug!(slug, "fetching recipe");
        let resp = self
            .request(reqwest::Method::GET, &format!("/api/recipes/{slug}"))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let recipe = resp.error_for_status()?.json::<Recipe>().await?;
        Ok(Some(recipe))
    }

    pub async fn get_mealplans(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<MealplanEntry>> {
        debug!(%start_date, %end_date, "fetching meal plans");
        let resp = self
            .request(reqwest::Method::GET, "/api/households/mealplans")
            .query(&[
                ("start_date", start_date.to_string()),
                ("end_date", end_date.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;
        let body: ListEnvelope<MealplanEntry> = resp.json().await?;
        Ok(body.into_items())
    }

    /// Create a new recipe; Mealie returns either a bare slug string or an
    /// object carrying one.
    pub async fn create_recipe(&self, name: &str) -> Result<String> {
        info!(name, "creating recipe in Mealie");
        let resp = self
            .request(reqwest::Method::POST, "/api/recipes")
            .json(&json!({ "name": name }))
            .send()
            .await?
            .error_for_status()?;
        let body: Value = resp.json().await?;
        match &body {
            Value::String(slug) => Ok(slug.clone()),
            _ => body
                .get("slug")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| anyhow!("Mealie create response had no slug")),
        }
    }

    /// Update recipe fields with a GET-merge-PATCH: fetch the recipe, keep
    /// only the safe fields as the base payload, overlay `data`, PATCH, and
    /// fall back to PUT when the PATCH is rejected.
    pub async fn update_recipe(&self, slug: &str, data: Map<String, Value>) -> Result<Value> {
        info!(slug, "fetching recipe before update");
        let mut payload = Map::new();
        let get_resp = self
            .request(reqwest::Method::GET, &format!("/api/recipes/{slug}"))
            .send()
            .await?;
        if get_resp.status().is_success() {
            let full: Value = get_resp.json().await?;
            if let Value::Object(full) = full {
                for (key, value) in full {
                    if SAFE_UPDATE_FIELDS.contains(&key.as_str()) {
                        payload.insert(key, value);
                    }
                }
            }
        } else {
            warn!(
                slug,
                status = %get_resp.status(),
                "could not fetch recipe before update, sending data as-is"
            );
        }
        payload.extend(data);

        info!(slug, "updating recipe in Mealie");
        let resp = self
            .request(reqwest::Method::PATCH, &format!("/api/recipes/{slug}"))
            .json(&payload)
            .send()
            .await?;
        if resp.status().is_success() {
            return Ok(resp.json().await?);
        }

        let status = resp.status();
        let body = truncate(resp.text().await.unwrap_or_default(), 500);
        error!(slug, %status, body, "Mealie PATCH rejected, retrying as PUT");

        let resp = self
            .request(reqwest::Method::PUT, &format!("/api/recipes/{slug}"))
            .json(&payload)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = truncate(resp.text().await.unwrap_or_default(), 500);
            return Err(anyhow!("Mealie update failed (HTTP {status}): {body}"));
        }
        Ok(resp.json().await?)
    }

    pub async fn health_check(&self) -> bool {
        let result = self
            .request(reqwest::Method::GET, "/api/app/about")
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        match result {
            Ok(resp) => resp.status().is_success(),
            Err(_) => {
                warn!("Mealie health check failed");
                false
            }
        }
    }
}

fn truncate(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        s.truncate(max_len);
        s.push('…');
    }
    s
}

/// Parse a free-text ingredient line ("250g kipfilet") into a Mealie
/// ingredient payload with quantity, unit and food split out. Lines that
/// don't match keep the whole text as the food name.
pub fn parse_ingredient_line(line: &str) -> Value {
    static LINE_RE: OnceLock<Regex> = OnceLock::new();
    let re = LINE_RE.get_or_init(|| {
        Regex::new(
            r"(?i)^([\d.,/½¼¾⅓⅔]+)\s*(g|kg|ml|l|cl|dl|el|tl|eetlepels?|theelepels?|stuks?|stuk|blikjes?|zakjes?|potjes?)?\s*(.+)$",
        )
        .expect("ingredient line regex")
    });

    let line = line.trim();
    let reference_id = uuid::Uuid::new_v4().to_string();

    if let Some(caps) = re.captures(line) {
        let quantity = caps
            .get(1)
            .map(|m| m.as_str())
            .map(|raw| {
                raw.replace(',', ".")
                    .replace('½', "0.5")
                    .replace('¼', "0.25")
                    .replace('¾', "0.75")
                    .replace('⅓', "0.33")
                    .replace('⅔', "0.67")
            })
            .and_then(|s| s.parse::<f64>().ok());
        let unit_name = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let food_name = caps
            .get(3)
            .map(|m| m.as_str())
            .unwrap_or("")
            .trim()
            .trim_end_matches([',', '.']);

        json!({
            "referenceId": reference_id,
            "quantity": quantity,
            "unit": if unit_name.is_empty() { Value::Null } else { json!({ "name": unit_name }) },
            "food": { "name": food_name },
            "note": "",
            "originalText": line,
            "display": line,
        })
    } else {
        json!({
            "referenceId": reference_id,
            "quantity": Value::Null,
            "unit": Value::Null,
            "food": { "name": line },
            "note": "",
            "originalText": line,
            "display": line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> MealieClient {
        MealieClient::new(&server.uri(), Some("test-token".to_string())).unwrap()
    }

    #[tokio::test]
    async fn mealplans_accepts_envelope_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/households/mealplans"))
            .and(query_param("start_date", "2026-08-24"))
            .and(query_param("end_date", "2026-08-30"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    { "date": "2026-08-24", "recipe": { "slug": "pasta", "name": "Pasta" } },
                ]
            })))
            .mount(&server)
            .await;

        let mealie = client_for(&server).await;
        let plans = mealie
            .get_mealplans(
                NaiveDate::from_ymd_opt(2026, 8, 24).unwrap(),
                NaiveDate::from_ymd_opt(2026, 8, 30).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].recipe_slug().as_deref(), Some("pasta"));
    }

    #[tokio::test]
    async fn mealplans_accepts_bare_list_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/households/mealplans"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "date": "2026-08-24", "recipeId": "raw-id-1" },
            ])))
            .mount(&server)
            .await;

        let mealie = client_for(&server).await;
        let plans = mealie
            .get_mealplans(
                NaiveDate::from_ymd_opt(2026, 8, 24).unwrap(),
                NaiveDate::from_ymd_opt(2026, 8, 30).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(plans.len(), 1);
        // Slug absent: fall back to the raw recipe id field.
        assert_eq!(plans[0].recipe_slug().as_deref(), Some("raw-id-1"));
    }

    #[tokio::test]
    async fn missing_recipe_is_none_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/recipes/verdwenen"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mealie = client_for(&server).await;
        assert!(mealie.get_recipe("verdwenen").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_falls_back_to_put_when_patch_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/recipes/pasta"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Pasta",
                "slug": "pasta",
                "id": "not-a-safe-field",
                "recipeIngredient": [],
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/recipes/pasta"))
            .respond_with(ResponseTemplate::new(422))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/recipes/pasta"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "slug": "pasta" })))
            .expect(1)
            .mount(&server)
            .await;

        let mealie = client_for(&server).await;
        let mut data = Map::new();
        data.insert("description".to_string(), json!("nieuw"));
        let result = mealie.update_recipe("pasta", data).await.unwrap();
        assert_eq!(result, json!({ "slug": "pasta" }));
    }

    #[test]
    fn display_text_composites_when_no_display_field() {
        let ingredient = RecipeIngredient {
            quantity: Some(250.0),
            unit: Some(NamedEntity { name: "g".into() }),
            food: Some(NamedEntity { name: "kipfilet".into() }),
            note: Some("in blokjes".into()),
            ..Default::default()
        };
        assert_eq!(ingredient.display_text(), "250 g kipfilet in blokjes");

        let empty = RecipeIngredient::default();
        assert_eq!(empty.display_text(), "(onbekend)");

        let with_display = RecipeIngredient {
            display: "2 uien".into(),
            food: Some(NamedEntity { name: "ui".into() }),
            ..Default::default()
        };
        assert_eq!(with_display.display_text(), "2 uien");
    }

    #[test]
    fn ingredient_line_parses_quantity_unit_food() {
        let parsed = parse_ingredient_line("250g kipfilet");
        assert_eq!(parsed["quantity"], json!(250.0));
        assert_eq!(parsed["unit"]["name"], json!("g"));
        assert_eq!(parsed["food"]["name"], json!("kipfilet"));
        assert_eq!(parsed["display"], json!("250g kipfilet"));

        let parsed = parse_ingredient_line("½ el olijfolie");
        assert_eq!(parsed["quantity"], json!(0.5));
        assert_eq!(parsed["unit"]["name"], json!("el"));
        assert_eq!(parsed["food"]["name"], json!("olijfolie"));

        let parsed = parse_ingredient_line("verse basilicum");
        assert_eq!(parsed["quantity"], Value::Null);
        assert_eq!(parsed["unit"], Value::Null);
        assert_eq!(parsed["food"]["name"], json!("verse basilicum"));
    }
}
