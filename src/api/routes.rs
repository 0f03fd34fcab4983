// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check
        .route("/health", web::get().to(handlers::health_check))
        .route("/", web::get().to(handlers::health_check))
        .service(
            web::scope("/api/v1")
                // Recipes
                .route("/recipes", web::get().to(handlers::list_recipes))
                .route("/recipes/import", web::post().to(handlers::import_recipe))
                .route("/recipes/{slug}", web::get().to(handlers::recipe_detail))
                // Product search
                .route("/products/search", web::get().to(handlers::search_products))
                // Mappings
                .route(
                    "/mappings/suggestions",
                    web::get().to(handlers::mapping_suggestions),
                )
                .route("/mappings", web::post().to(handlers::save_mapping))
                .route("/mappings/delete", web::post().to(handlers::delete_mapping))
                // Meal plan and cart
                .route("/mealplan", web::get().to(handlers::mealplan_week))
                .route("/cart/fill", web::post().to(handlers::fill_cart))
                // Settings
                .route("/settings", web::get().to(handlers::get_settings))
                .route("/settings/logging", web::post().to(handlers::set_logging))
                .route("/settings/ah-code", web::post().to(handlers::ah_code)),
        );
}
