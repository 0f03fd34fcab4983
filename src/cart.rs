//! Cart aggregation engine: collect the week's planned recipes, aggregate
//! their mapped products and push them to the AH shopping list.

use crate::clients::ah::{AhClient, AhError, CartItem};
use crate::clients::mealie::MealieClient;
use crate::store::{
    settings::{SETTING_AH_REFRESH_TOKEN, SETTING_AH_USER_TOKEN},
    Db, MappingRow, SettingsTokenSink,
};
use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

/// The canonical planning window: Monday through Sunday of the week holding
/// `today`. A Monday starts its own week.
pub fn week_range(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = today - chrono::Duration::days(today.weekday().num_days_from_monday() as i64);
    (monday, monday + chrono::Duration::days(6))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLine {
    pub product_id: i64,
    pub quantity: i64,
    pub name: String,
}

/// Collapse mapping rows to one line per product, summing quantities. The
/// first row's name stands in for the product.
pub fn aggregate(rows: &[MappingRow]) -> Vec<CartLine> {
    let mut by_product: BTreeMap<i64, CartLine> = BTreeMap::new();
    for row in rows {
        let Some(product_id) = row.ah_product_id else {
            continue;
        };
        by_product
            .entry(product_id)
            .and_modify(|line| line.quantity += row.ah_quantity)
            .or_insert_with(|| CartLine {
                product_id,
                quantity: row.ah_quantity,
                name: row
                    .ah_product_name
                    .clone()
                    .unwrap_or_else(|| row.ingredient_display.clone()),
            });
    }
    by_product.into_values().collect()
}

/// Recoverable outcomes of a cart fill. Only transport and storage failures
/// surface as errors; everything a user can fix themselves is an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FillOutcome {
    Filled { items_added: usize },
    NoRecipesPlanned,
    NoMappedIngredients,
    NotAuthenticated,
    TokenExpired,
}

impl FillOutcome {
    pub fn user_message(&self) -> String {
        match self {
            FillOutcome::Filled { items_added } => {
                format!("{items_added} producten toegevoegd aan je AH boodschappenlijst")
            }
            FillOutcome::NoRecipesPlanned => "Geen recepten in het weekmenu gevonden".to_string(),
            FillOutcome::NoMappedIngredients => {
                "Geen gemapte ingrediënten gevonden voor deze week".to_string()
            }
            FillOutcome::NotAuthenticated => {
                "AH token niet ingesteld. Ga naar Instellingen.".to_string()
            }
            FillOutcome::TokenExpired => {
                "AH token verlopen en refresh mislukt. Voer een nieuw refresh token in via Instellingen."
                    .to_string()
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FillOutcome::Filled { .. })
    }
}

/// Slugs of all recipes planned in the window, deduplicated.
pub fn planned_slugs(plans: &[crate::clients::mealie::MealplanEntry]) -> Vec<String> {
    let slugs: BTreeSet<String> = plans.iter().filter_map(|entry| entry.recipe_slug()).collect();
    slugs.into_iter().collect()
}

/// Fill the AH cart with everything mapped for this week's meal plan.
pub async fn fill_cart(
    db: &Db,
    mealie: &MealieClient,
    ah: &AhClient,
    today: NaiveDate,
) -> Result<FillOutcome> {
    let (start, end) = week_range(today);
    info!(%start, %end, "filling cart for week");

    let plans = mealie.get_mealplans(start, end).await?;
    let slugs = planned_slugs(&plans);
    if slugs.is_empty() {
        info!("no recipes planned this week");
        return Ok(FillOutcome::NoRecipesPlanned);
    }

    let rows = db.mapped_products_for_recipes(&slugs).await?;
    if rows.is_empty() {
        info!(recipes = slugs.len(), "no mapped ingredients for planned recipes");
        return Ok(FillOutcome::NoMappedIngredients);
    }

    let access = db.get_setting(SETTING_AH_USER_TOKEN).await?;
    let refresh = db.get_setting(SETTING_AH_REFRESH_TOKEN).await?;
    if access.is_empty() && refresh.is_empty() {
        return Ok(FillOutcome::NotAuthenticated);
    }
    ah.set_user_tokens(
        &access,
        &refresh,
        Some(Arc::new(SettingsTokenSink::new(db.clone()))),
    )
    .await;

    let lines = aggregate(&rows);
    let items: Vec<CartItem> = lines
        .iter()
        .map(|line| CartItem {
            product_id: line.product_id,
            quantity: line.quantity,
        })
        .collect();

    match ah.add_to_cart(&items).await {
        Ok(_) => {
            info!(items = items.len(), "cart filled");
            Ok(FillOutcome::Filled {
                items_added: items.len(),
            })
        }
        Err(AhError::NotAuthenticated) => Ok(FillOutcome::NotAuthenticated),
        Err(AhError::TokenExpired) => {
            warn!("cart fill aborted, user token expired");
            Ok(FillOutcome::TokenExpired)
        }
        Err(e) => Err(e.into()),
    }
}
