//! Ingredient Mapping Store: one row per (recipe, ingredient-reference) pair
//! recording the chosen AH product or an explicit skip decision.

use super::Db;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use tracing::{debug, info};

/// Mapping decision state. Not a strict progression: user actions may move
/// a row between any two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingStatus {
    Unmapped,
    Mapped,
    Skipped,
}

impl MappingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::Unmapped => "unmapped",
            MappingStatus::Mapped => "mapped",
            MappingStatus::Skipped => "skipped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unmapped" => Some(MappingStatus::Unmapped),
            "mapped" => Some(MappingStatus::Mapped),
            "skipped" => Some(MappingStatus::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MappingRow {
    pub id: i64,
    pub recipe_slug: String,
    pub recipe_name: String,
    pub ingredient_reference_id: String,
    pub ingredient_display: String,
    pub status: String,
    pub ah_product_id: Option<i64>,
    pub ah_product_name: Option<String>,
    pub ah_product_image_url: Option<String>,
    pub ah_product_unit_size: Option<String>,
    pub ah_product_price: Option<String>,
    pub ah_quantity: i64,
}

const MAPPING_COLUMNS: &str = "id, recipe_slug, recipe_name, ingredient_reference_id, \
     ingredient_display, status, ah_product_id, ah_product_name, ah_product_image_url, \
     ah_product_unit_size, ah_product_price, ah_quantity";

/// Input for a save; the product snapshot is only persisted when the status
/// is `mapped`.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveMapping {
    pub recipe_slug: String,
    #[serde(default)]
    pub recipe_name: String,
    pub ingredient_reference_id: String,
    pub ingredient_display: String,
    pub status: MappingStatus,
    pub ah_product_id: Option<i64>,
    pub ah_product_name: Option<String>,
    pub ah_product_image_url: Option<String>,
    pub ah_product_unit_size: Option<String>,
    pub ah_product_price: Option<String>,
    #[serde(default = "default_quantity")]
    pub ah_quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MappingStats {
    pub recipe_slug: String,
    pub total: i64,
    pub mapped: i64,
    pub skipped: i64,
}

impl MappingStats {
    /// Ready for cart: every ingredient line is either mapped or skipped.
    pub fn ready(&self) -> bool {
        self.total - self.mapped - self.skipped == 0
    }
}

impl Db {
    /// Upsert on the (recipe_slug, ingredient_reference_id) key: a second
    /// save for the same ingredient line overwrites all fields in place.
    pub async fn save_mapping(&self, input: &SaveMapping) -> Result<()> {
        // Snapshot columns are only meaningful for mapped rows.
        let (product_id, name, image_url, unit_size, price) =
            if input.status == MappingStatus::Mapped {
                (
                    input.ah_product_id,
                    input.ah_product_name.as_deref(),
                    input.ah_product_image_url.as_deref(),
                    input.ah_product_unit_size.as_deref(),
                    input.ah_product_price.as_deref(),
                )
            } else {
                (None, None, None, None, None)
            };

        info!(
            recipe = %input.recipe_slug,
            ingredient = %input.ingredient_display,
            status = input.status.as_str(),
            "saving mapping"
        );

        sqlx::query(
            "INSERT INTO ingredient_mappings (
                recipe_slug, recipe_name, ingredient_reference_id, ingredient_display,
                status, ah_product_id, ah_product_name, ah_product_image_url,
                ah_product_unit_size, ah_product_price, ah_quantity
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (recipe_slug, ingredient_reference_id) DO UPDATE SET
                recipe_name = excluded.recipe_name,
                ingredient_display = excluded.ingredient_display,
                status = excluded.status,
                ah_product_id = excluded.ah_product_id,
                ah_product_name = excluded.ah_product_name,
                ah_product_image_url = excluded.ah_product_image_url,
                ah_product_unit_size = excluded.ah_product_unit_size,
                ah_product_price = excluded.ah_product_price,
                ah_quantity = excluded.ah_quantity,
                updated_at = datetime('now')",
        )
        .bind(&input.recipe_slug)
        .bind(&input.recipe_name)
        .bind(&input.ingredient_reference_id)
        .bind(&input.ingredient_display)
        .bind(input.status.as_str())
        .bind(product_id)
        .bind(name)
        .bind(image_url)
        .bind(unit_size)
        .bind(price)
        .bind(input.ah_quantity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// No-op (not an error) when the row does not exist.
    pub async fn delete_mapping(&self, recipe_slug: &str, reference_id: &str) -> Result<()> {
        let res = sqlx::query(
            "DELETE FROM ingredient_mappings
             WHERE recipe_slug = ? AND ingredient_reference_id = ?",
        )
        .bind(recipe_slug)
        .bind(reference_id)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() > 0 {
            info!(recipe = %recipe_slug, reference_id, "deleted mapping");
        }
        Ok(())
    }

    pub async fn mappings_for_recipe(&self, recipe_slug: &str) -> Result<Vec<MappingRow>> {
        let rows = sqlx::query_as::<_, MappingRow>(&format!(
            "SELECT {MAPPING_COLUMNS} FROM ingredient_mappings
             WHERE recipe_slug = ? ORDER BY id"
        ))
        .bind(recipe_slug)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn mappings_for_recipes(&self, slugs: &[String]) -> Result<Vec<MappingRow>> {
        if slugs.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {MAPPING_COLUMNS} FROM ingredient_mappings WHERE recipe_slug IN ("
        ));
        let mut sep = qb.separated(", ");
        for slug in slugs {
            sep.push_bind(slug);
        }
        qb.push(") ORDER BY id");
        Ok(qb.build_query_as().fetch_all(&self.pool).await?)
    }

    /// Candidate rows for the suggestion engine: mapped or skipped decisions
    /// from every recipe except the one being edited. Ordered by id so
    /// dedup in the ranking step is deterministic.
    pub async fn mapped_or_skipped_excluding(&self, recipe_slug: &str) -> Result<Vec<MappingRow>> {
        let rows = sqlx::query_as::<_, MappingRow>(&format!(
            "SELECT {MAPPING_COLUMNS} FROM ingredient_mappings
             WHERE recipe_slug != ? AND status IN ('mapped', 'skipped')
             ORDER BY id"
        ))
        .bind(recipe_slug)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Rows that can go in the cart: mapped with a product id, scoped to the
    /// given recipes.
    pub async fn mapped_products_for_recipes(&self, slugs: &[String]) -> Result<Vec<MappingRow>> {
        if slugs.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {MAPPING_COLUMNS} FROM ingredient_mappings
             WHERE status = 'mapped' AND ah_product_id IS NOT NULL AND recipe_slug IN ("
        ));
        let mut sep = qb.separated(", ");
        for slug in slugs {
            sep.push_bind(slug);
        }
        qb.push(") ORDER BY id");
        Ok(qb.build_query_as().fetch_all(&self.pool).await?)
    }

    /// Per-recipe total/mapped/skipped counts. Recipes without rows are
    /// absent from the result.
    pub async fn stats_for_recipes(&self, slugs: &[String]) -> Result<Vec<MappingStats>> {
        if slugs.is_empty() {
            return Ok(Vec::new());
        }
        debug!(recipes = slugs.len(), "computing mapping stats");
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT recipe_slug,
                    COUNT(*) AS total,
                    COALESCE(SUM(CASE WHEN status = 'mapped' THEN 1 ELSE 0 END), 0) AS mapped,
                    COALESCE(SUM(CASE WHEN status = 'skipped' THEN 1 ELSE 0 END), 0) AS skipped
             FROM ingredient_mappings WHERE recipe_slug IN (",
        );
        let mut sep = qb.separated(", ");
        for slug in slugs {
            sep.push_bind(slug);
        }
        qb.push(") GROUP BY recipe_slug");
        Ok(qb.build_query_as().fetch_all(&self.pool).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_db;

    fn mapped(recipe: &str, reference: &str, display: &str, product: i64, qty: i64) -> SaveMapping {
        SaveMapping {
            recipe_slug: recipe.to_string(),
            recipe_name: recipe.to_string(),
            ingredient_reference_id: reference.to_string(),
            ingredient_display: display.to_string(),
            status: MappingStatus::Mapped,
            ah_product_id: Some(product),
            ah_product_name: Some(format!("product {product}")),
            ah_product_image_url: None,
            ah_product_unit_size: Some("500 g".to_string()),
            ah_product_price: Some("2.49".to_string()),
            ah_quantity: qty,
        }
    }

    #[tokio::test]
    async fn save_twice_overwrites_in_place() {
        let db = test_db().await;
        db.save_mapping(&mapped("pasta", "ref-1", "2 uien", 100, 1))
            .await
            .unwrap();
        let mut second = mapped("pasta", "ref-1", "3 uien", 200, 2);
        second.status = MappingStatus::Mapped;
        db.save_mapping(&second).await.unwrap();

        let rows = db.mappings_for_recipe("pasta").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ingredient_display, "3 uien");
        assert_eq!(rows[0].ah_product_id, Some(200));
        assert_eq!(rows[0].ah_quantity, 2);
    }

    #[tokio::test]
    async fn skipped_rows_never_keep_a_product_snapshot() {
        let db = test_db().await;
        let mut input = mapped("pasta", "ref-1", "snufje zout", 100, 1);
        input.status = MappingStatus::Skipped;
        db.save_mapping(&input).await.unwrap();

        let rows = db.mappings_for_recipe("pasta").await.unwrap();
        assert_eq!(rows[0].status, "skipped");
        assert_eq!(rows[0].ah_product_id, None);
        assert_eq!(rows[0].ah_product_name, None);
        assert_eq!(rows[0].ah_product_price, None);
    }

    #[tokio::test]
    async fn delete_missing_row_is_ok() {
        let db = test_db().await;
        db.delete_mapping("nope", "ref-x").await.unwrap();

        db.save_mapping(&mapped("pasta", "ref-1", "2 uien", 100, 1))
            .await
            .unwrap();
        db.delete_mapping("pasta", "ref-1").await.unwrap();
        db.delete_mapping("pasta", "ref-1").await.unwrap();
        assert!(db.mappings_for_recipe("pasta").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stats_count_per_status() {
        let db = test_db().await;
        db.save_mapping(&mapped("pasta", "ref-1", "2 uien", 100, 1))
            .await
            .unwrap();
        let mut skipped = mapped("pasta", "ref-2", "snufje zout", 0, 1);
        skipped.status = MappingStatus::Skipped;
        db.save_mapping(&skipped).await.unwrap();
        let mut unmapped = mapped("pasta", "ref-3", "1 courgette", 0, 1);
        unmapped.status = MappingStatus::Unmapped;
        db.save_mapping(&unmapped).await.unwrap();

        let stats = db
            .stats_for_recipes(&["pasta".to_string()])
            .await
            .unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].total, 3);
        assert_eq!(stats[0].mapped, 1);
        assert_eq!(stats[0].skipped, 1);
        assert!(!stats[0].ready());

        db.delete_mapping("pasta", "ref-3").await.unwrap();
        let stats = db
            .stats_for_recipes(&["pasta".to_string()])
            .await
            .unwrap();
        assert!(stats[0].ready());
    }

    #[tokio::test]
    async fn mapped_products_filter_scope_and_status() {
        let db = test_db().await;
        db.save_mapping(&mapped("pasta", "ref-1", "2 uien", 100, 2))
            .await
            .unwrap();
        db.save_mapping(&mapped("curry", "ref-1", "1 ui", 100, 1))
            .await
            .unwrap();
        let mut skipped = mapped("pasta", "ref-2", "snufje zout", 300, 1);
        skipped.status = MappingStatus::Skipped;
        db.save_mapping(&skipped).await.unwrap();
        db.save_mapping(&mapped("soep", "ref-1", "prei", 400, 1))
            .await
            .unwrap();

        let rows = db
            .mapped_products_for_recipes(&["pasta".to_string(), "curry".to_string()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.status == "mapped"));
        assert!(rows.iter().all(|r| r.recipe_slug != "soep"));
    }

    #[tokio::test]
    async fn excluding_query_skips_own_recipe_and_unmapped() {
        let db = test_db().await;
        db.save_mapping(&mapped("pasta", "ref-1", "2 uien", 100, 1))
            .await
            .unwrap();
        db.save_mapping(&mapped("curry", "ref-1", "1 ui", 200, 1))
            .await
            .unwrap();
        let mut unmapped = mapped("curry", "ref-2", "verse koriander", 0, 1);
        unmapped.status = MappingStatus::Unmapped;
        db.save_mapping(&unmapped).await.unwrap();

        let rows = db.mapped_or_skipped_excluding("pasta").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].recipe_slug, "curry");
        assert_eq!(rows[0].status, "mapped");
    }
}
