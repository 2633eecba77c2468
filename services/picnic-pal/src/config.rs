//! Application configuration, loaded from the environment (and `.env`).

use picnic_pal_core::ResponseMode;
use secrecy::SecretString;
use std::env;
use tracing::Level;

pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";
pub const DEFAULT_REGION: &str = "DE";
pub const DEFAULT_VOICE: &str = "en-US-Journey-D";
pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are a shopping assistant called Picnic Pal 3000 for the online grocery store Picnic.";

/// How the storefront session is authenticated.
#[derive(Debug, Clone)]
pub enum PicnicAuth {
    Credentials {
        username: String,
        password: SecretString,
    },
    Token(SecretString),
}

/// Which cart matcher resolves spoken product names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    Fuzzy,
    Llm,
}

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: SecretString,
    pub tts_api_key: SecretString,
    pub picnic_auth: PicnicAuth,
    pub picnic_region: String,
    pub response_mode: ResponseMode,
    pub model: String,
    pub system_instruction: String,
    pub tts_voice: String,
    /// Subset of tools to declare. `None` declares all of them.
    pub tools: Option<Vec<String>>,
    pub cart_matcher: MatcherKind,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `GEMINI_API_KEY`: required.
    // *   `GOOGLE_TTS_API_KEY`: text-to-speech key. Defaults to `GEMINI_API_KEY`.
    // *   `PICNIC_USERNAME` + `PICNIC_PASSWORD`, or `PICNIC_AUTH_TOKEN`.
    // *   `PICNIC_REGION`: storefront country. Defaults to "DE".
    // *   `RESPONSE_MODE`: "text" or "audio". Defaults to "text".
    // *   `GEMINI_MODEL`, `SYSTEM_INSTRUCTION`, `TTS_VOICE`: optional overrides.
    // *   `PICNIC_PAL_TOOLS`: comma-separated subset of tools to declare.
    // *   `CART_MATCHER`: "fuzzy" or "llm". Defaults to "fuzzy".
    // *   `AUDIO_INPUT_DEVICE`, `AUDIO_OUTPUT_DEVICE`: device names.
    // *   `RUST_LOG`: the logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Ignored if there is no .env file.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let required =
            |name: &str| var(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()));

        let gemini_api_key = required("GEMINI_API_KEY")?;
        let tts_api_key = var("GOOGLE_TTS_API_KEY").unwrap_or_else(|| gemini_api_key.clone());

        let picnic_auth = match (
            var("PICNIC_USERNAME"),
            var("PICNIC_PASSWORD"),
            var("PICNIC_AUTH_TOKEN"),
        ) {
            (_, _, Some(token)) => PicnicAuth::Token(token.into()),
            (Some(username), Some(password), None) => PicnicAuth::Credentials {
                username,
                password: password.into(),
            },
            (Some(_), None, None) => {
                return Err(ConfigError::MissingVar("PICNIC_PASSWORD".to_string()));
            }
            _ => {
                return Err(ConfigError::MissingVar(
                    "PICNIC_USERNAME and PICNIC_PASSWORD, or PICNIC_AUTH_TOKEN".to_string(),
                ));
            }
        };

        let response_mode = match var("RESPONSE_MODE").map(|v| v.to_lowercase()).as_deref() {
            None | Some("text") => ResponseMode::TextOnly,
            Some("audio") => ResponseMode::AudioOnly,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "RESPONSE_MODE",
                    value: other.to_string(),
                });
            }
        };

        let cart_matcher = match var("CART_MATCHER").map(|v| v.to_lowercase()).as_deref() {
            None | Some("fuzzy") => MatcherKind::Fuzzy,
            Some("llm") => MatcherKind::Llm,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "CART_MATCHER",
                    value: other.to_string(),
                });
            }
        };

        let tools = var("PICNIC_PAL_TOOLS").map(|list| {
            list.split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect()
        });

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            gemini_api_key: gemini_api_key.into(),
            tts_api_key: tts_api_key.into(),
            picnic_auth,
            picnic_region: var("PICNIC_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            response_mode,
            model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_instruction: var("SYSTEM_INSTRUCTION")
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            tts_voice: var("TTS_VOICE").unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            tools,
            cart_matcher,
            input_device: var("AUDIO_INPUT_DEVICE"),
            output_device: var("AUDIO_OUTPUT_DEVICE"),
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_with_credentials() {
        let config = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "gem"),
            ("PICNIC_USERNAME", "me@example.com"),
            ("PICNIC_PASSWORD", "hunter2"),
        ]))
        .unwrap();

        assert_eq!(config.tts_api_key.expose_secret(), "gem");
        assert!(matches!(
            config.picnic_auth,
            PicnicAuth::Credentials { ref username, .. } if username == "me@example.com"
        ));
        assert_eq!(config.picnic_region, "DE");
        assert_eq!(config.response_mode, ResponseMode::TextOnly);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.tts_voice, DEFAULT_VOICE);
        assert_eq!(config.cart_matcher, MatcherKind::Fuzzy);
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.tools.is_none());
    }

    #[test]
    fn test_token_mode_and_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "gem"),
            ("GOOGLE_TTS_API_KEY", "tts"),
            ("PICNIC_AUTH_TOKEN", "tok"),
            ("RESPONSE_MODE", "Audio"),
            ("PICNIC_PAL_TOOLS", "search_for_products, add_product_to_cart,"),
            ("CART_MATCHER", "llm"),
            ("RUST_LOG", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.tts_api_key.expose_secret(), "tts");
        assert!(matches!(config.picnic_auth, PicnicAuth::Token(_)));
        assert_eq!(config.response_mode, ResponseMode::AudioOnly);
        assert_eq!(
            config.tools,
            Some(vec![
                "search_for_products".to_string(),
                "add_product_to_cart".to_string()
            ])
        );
        assert_eq!(config.cart_matcher, MatcherKind::Llm);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn test_missing_and_invalid_values() {
        let err = Config::from_lookup(lookup(&[("PICNIC_AUTH_TOKEN", "tok")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref v) if v == "GEMINI_API_KEY"));

        let err = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "gem"),
            ("PICNIC_USERNAME", "me@example.com"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref v) if v == "PICNIC_PASSWORD"));

        let err = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "gem"),
            ("PICNIC_AUTH_TOKEN", "tok"),
            ("RESPONSE_MODE", "video"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "RESPONSE_MODE", .. }));

        let err = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "gem"),
            ("PICNIC_AUTH_TOKEN", "tok"),
            ("RUST_LOG", "chatty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel(_)));
    }
}
