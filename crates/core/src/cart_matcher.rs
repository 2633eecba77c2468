use anyhow::{Result, anyhow};
use async_trait::async_trait;
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
#[cfg(test)]
use mockall::automock;
use picnic_api::CartLine;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

pub const GENERATE_CONTENT_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MATCHER_MODEL: &str = "models/gemini-1.5-flash-latest";

/// The cart line a spoken product name was resolved to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedProduct {
    pub price: i64,
    pub product_id: String,
    pub product_name: String,
    /// A shorter name for the product, suitable as a search term.
    pub short_product_name_version: String,
}

/// Resolves a natural-language product name against the cart.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CartMatcher: Send + Sync {
    async fn match_product(&self, query: &str, lines: &[CartLine])
    -> Result<Option<MatchedProduct>>;
}

/// Fuzzy matching over product names.
pub struct FuzzyCartMatcher {
    matcher: SkimMatcherV2,
    threshold: i64,
}

impl FuzzyCartMatcher {
    pub fn new(threshold: i64) -> Self {
        Self {
            matcher: SkimMatcherV2::default(),
            threshold,
        }
    }

    // Either side may be the shorter one: "milk" vs "Frische Vollmilch",
    // or "jacobs kronung coffee" vs "Jacobs Krönung".
    fn score(&self, query: &str, name: &str) -> Option<i64> {
        let forward = self.matcher.fuzzy_match(name, query);
        let backward = self.matcher.fuzzy_match(query, name);
        forward.max(backward)
    }

    pub fn best_match<'a>(&self, query: &str, lines: &'a [CartLine]) -> Option<&'a CartLine> {
        let query = query.trim().to_lowercase();
        lines
            .iter()
            .filter_map(|line| {
                let score = self.score(&query, &line.product_name.to_lowercase())?;
                (score > self.threshold).then_some((score, line))
            })
            .max_by_key(|(score, _)| *score)
            .map(|(_, line)| line)
    }
}

impl Default for FuzzyCartMatcher {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl CartMatcher for FuzzyCartMatcher {
    async fn match_product(
        &self,
        query: &str,
        lines: &[CartLine],
    ) -> Result<Option<MatchedProduct>> {
        Ok(self.best_match(query, lines).map(|line| MatchedProduct {
            price: line.price,
            product_id: line.product_id.clone(),
            product_name: line.product_name.clone(),
            short_product_name_version: query.trim().to_string(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// Asks a Gemini model to pick the cart line.
pub struct LlmCartMatcher {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl LlmCartMatcher {
    pub fn new(api_key: SecretString, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: GENERATE_CONTENT_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

fn match_prompt(query: &str, lines: &[CartLine]) -> Result<String> {
    let cart = serde_json::to_string(lines)?;
    Ok(format!(
        r#"Here is a list of products:
{cart}
Find the product that matches the following search term: {query}

Respond STRICTLY as a JSON object:
{{"price": <integer>, "product_id": "<id>", "product_name": "<name>", "short_product_name_version": "<short name usable as a search term>"}}

If no product matches, respond with {{"product_id": ""}}."#
    ))
}

/// Reads the model's answer, keeping it only if it names a line that exists.
fn parse_match(answer: &str, lines: &[CartLine]) -> Result<Option<MatchedProduct>> {
    let value: serde_json::Value = serde_json::from_str(answer.trim())
        .map_err(|e| anyhow!("Failed to parse LLM response: {e}"))?;
    let product_id = value
        .get("product_id")
        .and_then(|id| id.as_str())
        .unwrap_or_default();
    let Some(line) = lines.iter().find(|line| line.product_id == product_id) else {
        tracing::debug!("matcher answer {} names no cart line", answer);
        return Ok(None);
    };

    let short_name = value
        .get("short_product_name_version")
        .and_then(|name| name.as_str())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(&line.product_name);
    Ok(Some(MatchedProduct {
        price: line.price,
        product_id: line.product_id.clone(),
        product_name: line.product_name.clone(),
        short_product_name_version: short_name.to_string(),
    }))
}

#[async_trait]
impl CartMatcher for LlmCartMatcher {
    async fn match_product(
        &self,
        query: &str,
        lines: &[CartLine],
    ) -> Result<Option<MatchedProduct>> {
        if lines.is_empty() {
            return Ok(None);
        }

        let body = serde_json::json!({
            "contents": [
                { "role": "user", "parts": [{ "text": match_prompt(query, lines)? }] }
            ],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": 0.0
            }
        });

        let resp = self
            .client
            .post(format!("{}/{}:generateContent", self.base_url, self.model))
            .query(&[("key", self.api_key.expose_secret())])
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<GenerateContentResponse>()
            .await?;

        let answer = resp
            .candidates
            .first()
            .and_then(|candidate| candidate.content.parts.iter().find_map(|p| p.text.as_deref()))
            .ok_or_else(|| anyhow!("No response from LLM"))?;
        parse_match(answer, lines)
    }
}
