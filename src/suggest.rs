//! Ingredient suggestion engine: rank previously saved mappings from other
//! recipes against a new ingredient line by keyword overlap.

use crate::store::{Db, MappingRow, MappingStatus};
use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::OnceLock;

const MIN_SCORE: f64 = 0.5;
const MAX_SUGGESTIONS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub status: MappingStatus,
    pub recipe_name: String,
    pub ingredient_display: String,
    pub ah_product_id: Option<i64>,
    pub ah_product_name: Option<String>,
    pub ah_product_image_url: Option<String>,
    pub ah_product_unit_size: Option<String>,
    pub ah_product_price: Option<String>,
    pub ah_quantity: i64,
    pub score: f64,
}

fn unit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)[\d.,/½¼¾⅓⅔]+\s*(g|kg|ml|l|cl|dl|el|tl|eetlepels?|theelepels?|stuks?|stuk|snuf|snufje|takjes?|tenen?|blaadjes?|plakjes?|schijfjes?|blikjes?|zakjes?|potjes?)\b",
        )
        .expect("unit strip regex")
    })
}

/// Lowercased keywords from an ingredient line, after stripping leading
/// quantity-plus-unit prefixes. Tokens shorter than two characters carry no
/// signal and are dropped.
pub fn extract_keywords(display: &str) -> HashSet<String> {
    let stripped = unit_re().replace_all(display, " ");
    let stripped = stripped
        .trim_matches(|c: char| c.is_whitespace() || c == ',' || c == '.' || c == '-');
    stripped
        .to_lowercase()
        .split_whitespace()
        .filter(|token| token.chars().count() >= 2)
        .map(|token| token.to_string())
        .collect()
}

fn keyword_score(target: &HashSet<String>, candidate_display: &str) -> f64 {
    if target.is_empty() {
        return 0.0;
    }
    let candidate = candidate_display.to_lowercase();
    let hits = target
        .iter()
        .filter(|keyword| candidate.contains(keyword.as_str()))
        .count();
    hits as f64 / target.len() as f64
}

/// Rank candidate rows against the target ingredient text. Deduplicates by
/// product id (skipped rows all share one slot); the slot is claimed only
/// when a candidate is accepted, so rejected rows never shadow a later
/// valid row for the same product.
pub fn rank_candidates(target_display: &str, candidates: &[MappingRow]) -> Vec<Suggestion> {
    let keywords = extract_keywords(target_display);
    if keywords.is_empty() {
        return Vec::new();
    }

    let mut seen: HashSet<Option<i64>> = HashSet::new();
    let mut ranked: Vec<Suggestion> = Vec::new();
    for row in candidates {
        let status = match MappingStatus::parse(&row.status) {
            Some(status) if status != MappingStatus::Unmapped => status,
            _ => continue,
        };
        let dedup_key = match status {
            MappingStatus::Mapped => match row.ah_product_id {
                Some(id) => Some(id),
                None => continue,
            },
            _ => None,
        };
        let score = keyword_score(&keywords, &row.ingredient_display);
        if score == 0.0 {
            continue;
        }
        if seen.contains(&dedup_key) {
            continue;
        }
        if score < MIN_SCORE {
            continue;
        }
        seen.insert(dedup_key);
        ranked.push(Suggestion {
            status,
            recipe_name: row.recipe_name.clone(),
            ingredient_display: row.ingredient_display.clone(),
            ah_product_id: row.ah_product_id,
            ah_product_name: row.ah_product_name.clone(),
            ah_product_image_url: row.ah_product_image_url.clone(),
            ah_product_unit_size: row.ah_product_unit_size.clone(),
            ah_product_price: row.ah_product_price.clone(),
            ah_quantity: row.ah_quantity,
            score,
        });
    }

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let a_mapped = a.status == MappingStatus::Mapped;
                let b_mapped = b.status == MappingStatus::Mapped;
                b_mapped.cmp(&a_mapped)
            })
    });
    ranked.truncate(MAX_SUGGESTIONS);
    ranked
}

/// Suggestions for one ingredient of a recipe, drawn from every mapped or
/// skipped row outside that recipe.
pub async fn suggestions_for(
    db: &Db,
    recipe_slug: &str,
    ingredient_display: &str,
) -> Result<Vec<Suggestion>> {
    let candidates = db.mapped_or_skipped_excluding(recipe_slug).await?;
    Ok(rank_candidates(ingredient_display, &candidates))
}
