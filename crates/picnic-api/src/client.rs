use crate::error::PicnicError;
use crate::extract::{self, DEFAULT_MAX_ITEMS, RecipeSearchResults, SellingUnitHit};
use md5::{Digest, Md5};
use reqwest::Method;
use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::{Arc, RwLock};

mod consts;

use consts::*;

/// Connection settings for the storefront API.
#[derive(Debug)]
pub struct PicnicConfig {
    country_code: String,
    api_version: String,
    base_url: Option<String>,
    username: Option<String>,
    password: Option<SecretString>,
    auth_token: Option<SecretString>,
}

pub struct PicnicConfigBuilder {
    config: PicnicConfig,
}

impl PicnicConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PicnicConfig::new(),
        }
    }

    pub fn with_country_code(mut self, country_code: &str) -> Self {
        self.config.country_code = country_code.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    pub fn with_credentials(mut self, username: &str, password: SecretString) -> Self {
        self.config.username = Some(username.to_string());
        self.config.password = Some(password);
        self
    }

    pub fn with_auth_token(mut self, auth_token: SecretString) -> Self {
        self.config.auth_token = Some(auth_token);
        self
    }

    pub fn build(self) -> PicnicConfig {
        self.config
    }
}

impl Default for PicnicConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PicnicConfig {
    pub fn new() -> Self {
        Self {
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            base_url: None,
            username: None,
            password: None,
            auth_token: None,
        }
    }

    pub fn builder() -> PicnicConfigBuilder {
        PicnicConfigBuilder::new()
    }

    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.clone(),
            None => DEFAULT_URL
                .replace("{country}", &self.country_code.to_lowercase())
                .replace("{version}", &self.api_version),
        }
    }
}

impl Default for PicnicConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the backend error code carried by a response, if any.
pub fn error_code(response: &Value) -> Option<&str> {
    response
        .get("error")
        .and_then(|error| error.get("code"))
        .and_then(Value::as_str)
}

fn auth_error(response: &Value) -> Option<String> {
    error_code(response)
        .filter(|code| AUTH_ERROR_CODES.contains(code))
        .map(|code| {
            let message = response
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str);
            match message {
                Some(message) => format!("{code}: {message}"),
                None => code.to_string(),
            }
        })
}

fn reject_error_code(response: &Value) -> Result<(), PicnicError> {
    match error_code(response) {
        Some(code) => Err(PicnicError::ErrorCode(code.to_string())),
        None => Ok(()),
    }
}

fn login_secret(password: &str) -> String {
    format!("{:x}", Md5::digest(password.as_bytes()))
}

/// One line of the shopping cart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartLine {
    pub price: i64,
    pub product_name: String,
    pub product_id: String,
}

/// A cart as returned by the cart endpoints.
#[derive(Debug, Clone)]
pub struct Cart {
    raw: Value,
}

impl Cart {
    pub fn from_value(raw: Value) -> Self {
        Self { raw }
    }

    /// The error code the backend reported instead of a cart, if any.
    pub fn error_code(&self) -> Option<&str> {
        error_code(&self.raw)
    }

    fn order_lines(&self) -> impl Iterator<Item = &Value> {
        self.raw
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.as_slice())
            .unwrap_or_default()
            .iter()
    }

    pub fn lines(&self) -> Vec<CartLine> {
        self.order_lines()
            .filter_map(|line| {
                let article = line.get("items")?.get(0)?;
                Some(CartLine {
                    price: line.get("display_price").and_then(Value::as_i64).unwrap_or(0),
                    product_name: article.get("name")?.as_str()?.to_string(),
                    product_id: article.get("id")?.as_str()?.to_string(),
                })
            })
            .collect()
    }

    /// Name of the article with `product_id`, looked up among the first
    /// article of every order line.
    pub fn product_name(&self, product_id: &str) -> Option<&str> {
        self.order_lines().find_map(|line| {
            let article = line.get("items")?.get(0)?;
            if article.get("id")?.as_str()? == product_id {
                article.get("name")?.as_str()
            } else {
                None
            }
        })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

/// HTTP client for the storefront API.
///
/// Owns authentication: a rejected session is renewed with the stored
/// credentials and the request is repeated once.
pub struct PicnicClient {
    http: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<SecretString>,
    auth_token: RwLock<Option<Arc<SecretString>>>,
}

impl PicnicClient {
    pub fn new(config: PicnicConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url(),
            username: config.username,
            password: config.password,
            auth_token: RwLock::new(config.auth_token.map(Arc::new)),
        }
    }

    /// Creates a client and logs in unless a token was supplied.
    pub async fn connect(config: PicnicConfig) -> Result<Self, PicnicError> {
        let client = Self::new(config);
        if !client.logged_in() && client.can_login() {
            client.login().await?;
        }
        Ok(client)
    }

    pub fn logged_in(&self) -> bool {
        self.token().is_some()
    }

    fn can_login(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    fn token(&self) -> Option<Arc<SecretString>> {
        self.auth_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_token(&self, token: SecretString) {
        *self
            .auth_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(token));
    }

    pub async fn login(&self) -> Result<(), PicnicError> {
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            return Err(PicnicError::Auth("no credentials configured".to_string()));
        };

        let body = json!({
            "key": username,
            "secret": login_secret(password.expose_secret()),
            "client_id": CLIENT_ID,
        });
        let response = self
            .http
            .post(format!("{}/user/login", self.base_url))
            .json(&body)
            .send()
            .await?;

        let token = response
            .headers()
            .get(AUTH_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let payload: Value = response.json().await?;
        if let Some(reason) = auth_error(&payload) {
            return Err(PicnicError::Auth(reason));
        }

        let token = token.ok_or(PicnicError::MissingToken)?;
        self.set_token(SecretString::from(token));
        tracing::info!("logged in to picnic as {}", username);
        Ok(())
    }

    async fn execute(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        picnic_headers: bool,
    ) -> Result<Value, PicnicError> {
        let mut request = self
            .http
            .request(method.clone(), format!("{}{}", self.base_url, path))
            .query(query);

        if let Some(token) = self.token() {
            let mut value = HeaderValue::from_str(token.expose_secret())?;
            value.set_sensitive(true);
            request = request.header(AUTH_HEADER, value);
        }
        if picnic_headers {
            request = request
                .header(AGENT_HEADER, AGENT_HEADER_VALUE)
                .header(DEVICE_HEADER, DEVICE_HEADER_VALUE);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!("{} {}", method, path);
        Ok(request.send().await?.json::<Value>().await?)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        picnic_headers: bool,
    ) -> Result<Value, PicnicError> {
        let response = self
            .execute(&method, path, query, body, picnic_headers)
            .await?;
        let Some(reason) = auth_error(&response) else {
            return Ok(response);
        };
        if !self.can_login() {
            return Err(PicnicError::Auth(reason));
        }

        tracing::info!("picnic session rejected ({}), logging in again", reason);
        self.login().await?;
        let response = self
            .execute(&method, path, query, body, picnic_headers)
            .await?;
        match auth_error(&response) {
            Some(reason) => Err(PicnicError::Auth(reason)),
            None => Ok(response),
        }
    }

    /// Product search, reduced to the product tiles of the result page.
    pub async fn search(&self, term: &str) -> Result<Vec<SellingUnitHit>, PicnicError> {
        let raw = self
            .request(
                Method::GET,
                "/pages/search-page-results",
                &[("search_term", term)],
                None,
                true,
            )
            .await?;
        reject_error_code(&raw)?;
        Ok(extract::extract_search_results(&raw, DEFAULT_MAX_ITEMS))
    }

    pub async fn search_recipes(&self, term: &str) -> Result<RecipeSearchResults, PicnicError> {
        let raw = self
            .request(
                Method::GET,
                "/pages/search-page-results",
                &[
                    ("search_term", term),
                    ("is_recipe", "true"),
                    ("selected_sorting", "RELEVANCE"),
                ],
                None,
                true,
            )
            .await?;
        reject_error_code(&raw)?;
        Ok(extract::extract_recipe_results(&raw, DEFAULT_MAX_ITEMS))
    }

    /// Plans a recipe and puts its core ingredients in the cart.
    ///
    /// The returned payload may carry an error code; callers check it with
    /// [`error_code`].
    pub async fn add_recipe_to_cart(&self, recipe_id: &str) -> Result<Value, PicnicError> {
        let page = self
            .request(
                Method::GET,
                "/pages/recipe-details-page",
                &[("recipe_id", recipe_id)],
                None,
                true,
            )
            .await?;

        let portions = page
            .get("body")
            .and_then(|body| body.get("child"))
            .and_then(|child| child.get("state"))
            .and_then(|state| state.get("servingsState"))
            .cloned()
            .unwrap_or(json!(1));
        let core_ingredients = extract::extract_recipe_ingredients(&page);

        let payload = json!({
            "payload": {
                "recipe_id": recipe_id,
                "portions": portions,
                "day_offset": null,
                "core_ingredients": core_ingredients,
            }
        });
        self.request(
            Method::POST,
            "/pages/task/assign-recipe-to-day",
            &[],
            Some(&payload),
            true,
        )
        .await
    }

    pub async fn get_cart(&self) -> Result<Cart, PicnicError> {
        let raw = self.request(Method::GET, "/cart", &[], None, false).await?;
        Ok(Cart::from_value(raw))
    }

    pub async fn add_product(&self, product_id: &str, count: u32) -> Result<Cart, PicnicError> {
        let body = json!({ "product_id": product_id, "count": count });
        let raw = self
            .request(Method::POST, "/cart/add_product", &[], Some(&body), false)
            .await?;
        Ok(Cart::from_value(raw))
    }

    pub async fn remove_product(&self, product_id: &str, count: u32) -> Result<Cart, PicnicError> {
        let body = json!({ "product_id": product_id, "count": count });
        let raw = self
            .request(Method::POST, "/cart/remove_product", &[], Some(&body), false)
            .await?;
        Ok(Cart::from_value(raw))
    }

    pub async fn clear_cart(&self) -> Result<Cart, PicnicError> {
        let raw = self
            .request(Method::POST, "/cart/clear", &[], None, false)
            .await?;
        Ok(Cart::from_value(raw))
    }

    pub async fn get_user(&self) -> Result<Value, PicnicError> {
        self.request(Method::GET, "/user", &[], None, false).await
    }

    /// The store catalog down to `depth` levels.
    pub async fn get_categories(&self, depth: u32) -> Result<Vec<Value>, PicnicError> {
        let depth = depth.to_string();
        let raw = self
            .request(Method::GET, "/my_store", &[("depth", &depth)], None, false)
            .await?;
        reject_error_code(&raw)?;
        Ok(raw
            .get("catalog")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_uses_lowercase_country() {
        let config = PicnicConfig::builder().with_country_code("NL").build();
        assert_eq!(
            config.base_url(),
            "https://storefront-prod.nl.picnicinternational.com/api/15"
        );

        let config = PicnicConfig::builder()
            .with_base_url("http://localhost:8080/api/")
            .build();
        assert_eq!(config.base_url(), "http://localhost:8080/api");
    }

    #[test]
    fn test_login_secret_is_md5_hex() {
        assert_eq!(login_secret("test"), "098f6bcd4621d373cade4e832627b4f6");
    }

    #[test]
    fn test_auth_errors_are_recognised() {
        let expired = json!({ "error": { "code": "AUTH_ERROR" } });
        let invalid = json!({ "error": { "code": "AUTH_INVALID_CRED", "message": "Invalid credentials." } });
        let other = json!({ "error": { "code": "PRODUCT_NOT_FOUND" } });

        assert_eq!(auth_error(&expired).as_deref(), Some("AUTH_ERROR"));
        assert_eq!(
            auth_error(&invalid).as_deref(),
            Some("AUTH_INVALID_CRED: Invalid credentials.")
        );
        assert_eq!(auth_error(&other), None);
        assert_eq!(error_code(&other), Some("PRODUCT_NOT_FOUND"));
        assert_eq!(error_code(&json!({ "items": [] })), None);
        assert!(matches!(
            reject_error_code(&other),
            Err(PicnicError::ErrorCode(code)) if code == "PRODUCT_NOT_FOUND"
        ));
    }

    fn sample_cart() -> Cart {
        Cart::from_value(json!({
            "id": "shopping_cart",
            "items": [
                { "display_price": 899, "items": [{ "id": "s1020400", "name": "Jacobs Krönung" }] },
                { "display_price": 119, "items": [{ "id": "s1001", "name": "Milk" }] },
                { "display_price": 50, "items": [] }
            ]
        }))
    }

    #[test]
    fn test_cart_lines_and_lookup() {
        let cart = sample_cart();

        assert_eq!(cart.error_code(), None);
        assert_eq!(
            cart.lines(),
            vec![
                CartLine { price: 899, product_name: "Jacobs Krönung".into(), product_id: "s1020400".into() },
                CartLine { price: 119, product_name: "Milk".into(), product_id: "s1001".into() },
            ]
        );
        assert_eq!(cart.product_name("s1001"), Some("Milk"));
        assert_eq!(cart.product_name("missing"), None);
    }

    #[test]
    fn test_client_with_token_counts_as_logged_in() {
        let client = PicnicClient::new(
            PicnicConfig::builder()
                .with_auth_token(SecretString::from("token".to_string()))
                .build(),
        );
        assert!(client.logged_in());
        assert!(!client.can_login());
        assert!(!PicnicClient::new(PicnicConfig::new()).logged_in());
    }
}
