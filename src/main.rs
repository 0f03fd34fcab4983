use anyhow::Result;
use mealcart::api::ApiServer;
use mealcart::clients::{AhClient, MealieClient};
use mealcart::store::settings::{
    SETTING_AH_REFRESH_TOKEN, SETTING_AH_USER_TOKEN, SETTING_VERBOSE_LOGGING,
};
use mealcart::store::{Db, SettingsTokenSink};
use mealcart::util::env::{db_url, env_parse, init_env};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<()> {
    // .env first so a RUST_LOG set there reaches the tracing filter.
    init_env();
    let log_handle = mealcart::logging::init_tracing()?;

    let server = ApiServer::from_env()?;
    let db = Db::connect(&db_url(), env_parse("DB_MAX_CONNECTIONS", 5)).await?;

    // Persisted preferences take effect before the first request.
    if db.get_setting(SETTING_VERBOSE_LOGGING).await? == "true" {
        log_handle.set_verbose(true);
    }

    let mealie = MealieClient::from_env()?;
    let ah = AhClient::new(None, None)?;

    let access = db.get_setting(SETTING_AH_USER_TOKEN).await?;
    let refresh = db.get_setting(SETTING_AH_REFRESH_TOKEN).await?;
    if !access.is_empty() || !refresh.is_empty() {
        ah.set_user_tokens(
            &access,
            &refresh,
            Some(Arc::new(SettingsTokenSink::new(db.clone()))),
        )
        .await;
        tracing::info!("installed stored AH tokens");
    }

    server.run(db, mealie, ah, log_handle).await
}
