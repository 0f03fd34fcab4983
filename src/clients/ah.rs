//! Albert Heijn client: anonymous catalog search, user-scoped cart
//! mutation, and the token lifecycle around both.
//!
//! Token expiry is discovered reactively: no expiry timestamps are tracked,
//! a 401 from the API is the only signal. Each 401 triggers at most one
//! token refresh followed by one retry ([`AUTH_RETRIES`]).

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const AH_BASE_URL: &str = "https://api.ah.nl";
const ANONYMOUS_TOKEN_PATH: &str = "/mobile-auth/v1/auth/token/anonymous";
const CODE_EXCHANGE_PATH: &str = "/mobile-auth/v1/auth/token";
const REFRESH_PATH: &str = "/mobile-auth/v1/auth/token/refresh";
const SEARCH_PATH: &str = "/mobile-services/product/search/v2";
const CART_PATH: &str = "/mobile-services/shoppinglist/v2/items";

const AH_LOGIN_URL: &str =
    "https://login.ah.nl/secure/oauth/authorize?client_id=appie&response_type=code&redirect_uri=appie://login-exit";

const CLIENT_ID: &str = "appie";
const SEARCH_PAGE_SIZE: u32 = 10;

/// Bound on reactive recovery: one refresh, one retry, never more.
const AUTH_RETRIES: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum AhError {
    /// No user access token installed; cart mutation is impossible.
    #[error("AH token niet ingesteld. Ga naar Instellingen.")]
    NotAuthenticated,
    /// Access token rejected and refresh unavailable or failed.
    #[error("AH token verlopen en refresh mislukt. Voer een nieuw refresh token in via Instellingen.")]
    TokenExpired,
    #[error("AH API gaf HTTP {0}")]
    Upstream(u16),
    #[error("unexpected AH response shape: missing {0}")]
    Shape(&'static str),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Capability for persisting a rotated token pair; invoked synchronously
/// after every successful refresh, before the retried request.
#[async_trait]
pub trait TokenSink: Send + Sync {
    async fn persist(&self, access: &str, refresh: &str) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AhProduct {
    pub id: i64,
    pub name: String,
    pub unit_size: String,
    /// Textual price as the API returned it; no currency parsing.
    pub price: String,
    pub image_url: String,
    pub brand: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Default)]
struct Session {
    anonymous_token: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    sink: Option<Arc<dyn TokenSink>>,
}

pub struct AhClient {
    base_url: String,
    http: Client,
    session: Mutex<Session>,
}

impl AhClient {
    pub fn new(base_url: Option<&str>, timeout_secs: Option<u64>) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(AH_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-application", HeaderValue::from_static("AHWEBSHOP"));

        let http = Client::builder()
            .user_agent("Appie/8.22.3")
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs.unwrap_or(15)))
            .build()?;

        Ok(Self {
            base_url,
            http,
            session: Mutex::new(Session::default()),
        })
    }

    pub fn login_url(&self) -> &'static str {
        AH_LOGIN_URL
    }

    /// Install user credentials and the persistence sink. Callable at any
    /// time to rotate credentials externally (e.g. after a code exchange).
    /// Empty strings mean "no token".
    pub async fn set_user_tokens(
        &self,
        access: &str,
        refresh: &str,
        sink: Option<Arc<dyn TokenSink>>,
    ) {
        let mut session = self.session.lock().await;
        session.access_token = non_empty(access);
        session.refresh_token = non_empty(refresh);
        session.sink = sink;
    }

    async fn get_anonymous_token(&self) -> Result<String, AhError> {
        {
            let session = self.session.lock().await;
            if let Some(token) = &session.anonymous_token {
                return Ok(token.clone());
            }
        }

        debug!("requesting anonymous AH token");
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, ANONYMOUS_TOKEN_PATH))
            .json(&json!({ "clientId": CLIENT_ID }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AhError::Upstream(resp.status().as_u16()));
        }
        let body: Value = resp.json().await?;
        let token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or(AhError::Shape("access_token"))?
            .to_string();

        info!("obtained anonymous AH token");
        self.session.lock().await.anonymous_token = Some(token.clone());
        Ok(token)
    }

    /// Keyword search against the catalog with the anonymous token. A 401
    /// invalidates the cached token and the request is retried once with a
    /// fresh one; a second 401 propagates.
    pub async fn search(&self, query: &str) -> Result<Vec<AhProduct>, AhError> {
        let mut attempts = 0;
        loop {
            let token = self.get_anonymous_token().await?;
            debug!(query, "searching AH products");
            let resp = self
                .http
                .get(format!("{}{}", self.base_url, SEARCH_PATH))
                .bearer_auth(&token)
                .query(&[
                    ("query", query),
                    ("sortOn", "RELEVANCE"),
                    ("size", &SEARCH_PAGE_SIZE.to_string()),
                ])
                .send()
                .await?;

            if resp.status() == StatusCode::UNAUTHORIZED && attempts < AUTH_RETRIES {
                attempts += 1;
                info!("anonymous token expired, refreshing");
                self.session.lock().await.anonymous_token = None;
                continue;
            }
            if !resp.status().is_success() {
                return Err(AhError::Upstream(resp.status().as_u16()));
            }

            let body: Value = resp.json().await?;
            let products = parse_products(&body);
            debug!(count = products.len(), query, "AH search done");
            return Ok(products);
        }
    }

    /// Batched cart mutation. Fails fast without a configured access token;
    /// a 401 triggers at most one refresh-token exchange (persisted through
    /// the sink) and one retry.
    pub async fn add_to_cart(&self, items: &[CartItem]) -> Result<Value, AhError> {
        let mut token = {
            let session = self.session.lock().await;
            session
                .access_token
                .clone()
                .ok_or(AhError::NotAuthenticated)?
        };

        let cart_items: Vec<Value> = items
            .iter()
            .map(|item| {
                json!({
                    "originCode": "PRD",
                    "productId": item.product_id,
                    "quantity": item.quantity,
                    "type": "SHOPPABLE",
                })
            })
            .collect();
        let payload = json!({ "items": cart_items });

        let mut attempts = 0;
        loop {
            info!(items = items.len(), "adding items to AH cart");
            let resp = self
                .http
                .patch(format!("{}{}", self.base_url, CART_PATH))
                .bearer_auth(&token)
                .json(&payload)
                .send()
                .await?;

            if resp.status() == StatusCode::UNAUTHORIZED && attempts < AUTH_RETRIES {
                attempts += 1;
                info!("AH user token expired, attempting refresh");
                token = self.refresh_user_token(&token).await?;
                continue;
            }
            if !resp.status().is_success() {
                return Err(AhError::Upstream(resp.status().as_u16()));
            }

            info!("successfully added items to AH cart");
            return Ok(resp.json().await.unwrap_or(Value::Null));
        }
    }

    /// Exchange an OAuth callback code for the initial user token pair.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenPair, AhError> {
        info!("exchanging AH authorization code");
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, CODE_EXCHANGE_PATH))
            .json(&json!({ "clientId": CLIENT_ID, "code": code }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AhError::Upstream(resp.status().as_u16()));
        }
        let body: Value = resp.json().await?;
        let access = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or(AhError::Shape("access_token"))?;
        let refresh = body
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .ok_or(AhError::Shape("refresh_token"))?;
        Ok(TokenPair {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        })
    }

    /// Exchange the refresh token for a new pair. The session lock is held
    /// across the exchange, so concurrent 401 handlers coalesce: whoever
    /// waited on the lock finds a token newer than the one rejected and
    /// reuses it instead of spending a second refresh.
    async fn refresh_user_token(&self, rejected: &str) -> Result<String, AhError> {
        let mut session = self.session.lock().await;
        if let Some(current) = session.access_token.as_deref() {
            if current != rejected {
                return Ok(current.to_string());
            }
        }
        let refresh = session
            .refresh_token
            .clone()
            .ok_or(AhError::TokenExpired)?;

        info!("refreshing AH user token");
        let outcome = async {
            let resp = self
                .http
                .post(format!("{}{}", self.base_url, REFRESH_PATH))
                .json(&json!({ "refreshToken": refresh, "clientId": CLIENT_ID }))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(AhError::Upstream(resp.status().as_u16()));
            }
            let body: Value = resp.json().await?;
            let access = body
                .get("access_token")
                .and_then(|v| v.as_str())
                .ok_or(AhError::Shape("access_token"))?
                .to_string();
            let new_refresh = body
                .get("refresh_token")
                .and_then(|v| v.as_str())
                .ok_or(AhError::Shape("refresh_token"))?
                .to_string();
            Ok::<_, AhError>((access, new_refresh))
        }
        .await;

        let (access, new_refresh) = match outcome {
            Ok(pair) => pair,
            Err(e) => {
                warn!("failed to refresh AH user token: {}", e);
                return Err(AhError::TokenExpired);
            }
        };

        session.access_token = Some(access.clone());
        session.refresh_token = Some(new_refresh.clone());
        info!("AH user token refreshed successfully");

        if let Some(sink) = session.sink.clone() {
            if let Err(e) = sink.persist(&access, &new_refresh).await {
                warn!("failed to persist refreshed AH tokens: {}", e);
            }
        }
        Ok(access)
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn parse_products(body: &Value) -> Vec<AhProduct> {
    let mut products = Vec::new();
    let Some(items) = body.get("products").and_then(|v| v.as_array()) else {
        return products;
    };
    for product in items {
        let Some(id) = product.get("webshopId").and_then(|v| v.as_i64()) else {
            continue;
        };
        let price = product
            .get("priceBeforeBonus")
            .or_else(|| product.get("currentPrice"))
            .map(price_text)
            .unwrap_or_default();
        let image_url = product
            .get("images")
            .and_then(|v| v.as_array())
            .and_then(|imgs| imgs.first())
            .and_then(|img| img.get("url"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        products.push(AhProduct {
            id,
            name: text_field(product, "title"),
            unit_size: text_field(product, "salesUnitSize"),
            price,
            image_url,
            brand: text_field(product, "brand"),
        });
    }
    products
}

fn text_field(obj: &Value, key: &str) -> String {
    obj.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string()
}

/// Stringify the price exactly as the retailer sent it (number or string).
fn price_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_db;
    use crate::store::SettingsTokenSink;
    use wiremock::matchers::{any, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> AhClient {
        AhClient::new(Some(&server.uri()), Some(5)).unwrap()
    }

    fn token_response(access: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "access_token": access }))
    }

    #[tokio::test]
    async fn anonymous_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ANONYMOUS_TOKEN_PATH))
            .respond_with(token_response("anon-tok-123"))
            .expect(1)
            .mount(&server)
            .await;

        let ah = client_for(&server).await;
        assert_eq!(ah.get_anonymous_token().await.unwrap(), "anon-tok-123");
        assert_eq!(ah.get_anonymous_token().await.unwrap(), "anon-tok-123");
    }

    #[tokio::test]
    async fn search_maps_product_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ANONYMOUS_TOKEN_PATH))
            .respond_with(token_response("anon-tok"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "products": [
                    {
                        "webshopId": 12345,
                        "title": "AH Kipfilet",
                        "salesUnitSize": "300 g",
                        "currentPrice": 4.99,
                        "brand": "AH",
                        "images": [{ "url": "https://img.ah.nl/12345.jpg" }],
                    },
                    {
                        "webshopId": 67890,
                        "title": "AH Biologisch kipfilet",
                        "salesUnitSize": "250 g",
                        "priceBeforeBonus": 6.49,
                        "currentPrice": 5.49,
                        "brand": "AH Biologisch",
                        "images": [],
                    },
                ]
            })))
            .mount(&server)
            .await;

        let ah = client_for(&server).await;
        let products = ah.search("kipfilet").await.unwrap();

        assert_eq!(products.len(), 2);
        assert_eq!(products[0].id, 12345);
        assert_eq!(products[0].name, "AH Kipfilet");
        assert_eq!(products[0].unit_size, "300 g");
        assert_eq!(products[0].image_url, "https://img.ah.nl/12345.jpg");
        // priceBeforeBonus preferred over currentPrice
        assert_eq!(products[1].price, "6.49");
        assert_eq!(products[1].image_url, "");
    }

    #[tokio::test]
    async fn search_401_recovers_with_exactly_two_fetches_and_two_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ANONYMOUS_TOKEN_PATH))
            .respond_with(token_response("new-tok"))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "products": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let ah = client_for(&server).await;
        let products = ah.search("melk").await.unwrap();
        assert!(products.is_empty());
        assert_eq!(
            ah.session.lock().await.anonymous_token.as_deref(),
            Some("new-tok")
        );
    }

    #[tokio::test]
    async fn search_fails_after_second_401_with_no_third_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ANONYMOUS_TOKEN_PATH))
            .respond_with(token_response("tok"))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let ah = client_for(&server).await;
        let err = ah.search("melk").await.unwrap_err();
        assert!(matches!(err, AhError::Upstream(401)));
    }

    #[tokio::test]
    async fn add_to_cart_sends_shoppable_items() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(CART_PATH))
            .and(body_partial_json(json!({
                "items": [
                    { "originCode": "PRD", "productId": 12345, "quantity": 2, "type": "SHOPPABLE" },
                    { "originCode": "PRD", "productId": 67890, "quantity": 1, "type": "SHOPPABLE" },
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;

        let ah = client_for(&server).await;
        ah.set_user_tokens("user-tok-abc", "", None).await;
        let result = ah
            .add_to_cart(&[
                CartItem { product_id: 12345, quantity: 2 },
                CartItem { product_id: 67890, quantity: 1 },
            ])
            .await
            .unwrap();
        assert_eq!(result, json!({ "success": true }));
    }

    #[tokio::test]
    async fn add_to_cart_without_token_makes_no_http_calls() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let ah = client_for(&server).await;
        let err = ah
            .add_to_cart(&[CartItem { product_id: 1, quantity: 1 }])
            .await
            .unwrap_err();
        assert!(matches!(err, AhError::NotAuthenticated));
    }

    #[tokio::test]
    async fn cart_401_refreshes_once_and_persists_new_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .and(body_partial_json(json!({
                "refreshToken": "valid-refresh",
                "clientId": "appie",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh-access",
                "refresh_token": "fresh-refresh",
                "expires_in": 604798,
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(CART_PATH))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(CART_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;

        let db = test_db().await;
        let sink = Arc::new(SettingsTokenSink::new(db.clone()));
        let ah = client_for(&server).await;
        ah.set_user_tokens("expired-access", "valid-refresh", Some(sink))
            .await;

        let result = ah
            .add_to_cart(&[CartItem { product_id: 1, quantity: 1 }])
            .await
            .unwrap();
        assert_eq!(result, json!({ "success": true }));

        // In-memory state rotated and the sink persisted the same pair.
        {
            let session = ah.session.lock().await;
            assert_eq!(session.access_token.as_deref(), Some("fresh-access"));
            assert_eq!(session.refresh_token.as_deref(), Some("fresh-refresh"));
        }
        assert_eq!(db.get_setting("ah_user_token").await.unwrap(), "fresh-access");
        assert_eq!(
            db.get_setting("ah_refresh_token").await.unwrap(),
            "fresh-refresh"
        );
    }

    #[tokio::test]
    async fn cart_401_without_refresh_token_is_token_expired() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(CART_PATH))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let ah = client_for(&server).await;
        ah.set_user_tokens("expired-access", "", None).await;
        let err = ah
            .add_to_cart(&[CartItem { product_id: 1, quantity: 1 }])
            .await
            .unwrap_err();
        assert!(matches!(err, AhError::TokenExpired));
    }

    #[tokio::test]
    async fn failed_refresh_call_maps_to_token_expired() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(CART_PATH))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let ah = client_for(&server).await;
        ah.set_user_tokens("expired-access", "stale-refresh", None)
            .await;
        let err = ah
            .add_to_cart(&[CartItem { product_id: 1, quantity: 1 }])
            .await
            .unwrap_err();
        assert!(matches!(err, AhError::TokenExpired));
    }

    #[tokio::test]
    async fn exchange_code_returns_token_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CODE_EXCHANGE_PATH))
            .and(body_partial_json(json!({ "clientId": "appie", "code": "abc123" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "first-access",
                "refresh_token": "first-refresh",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ah = client_for(&server).await;
        let pair = ah.exchange_code("abc123").await.unwrap();
        assert_eq!(pair.access_token, "first-access");
        assert_eq!(pair.refresh_token, "first-refresh");
    }
}
