use crate::error::AppError;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Connection settings for the generation service. The endpoint is
/// overridable so tests can point at a local mock server.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
}

impl ApiConfig {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Resolves the API key from an explicit value or the GOOGLE_API_KEY
    /// environment variable. Fails before any work starts if neither is set.
    pub fn resolve(api_key: Option<&str>, model: Option<&str>, endpoint: Option<&str>) -> Result<Self, AppError> {
        let key = match api_key {
            Some(key) => key.to_string(),
            None => std::env::var("GOOGLE_API_KEY")
                .map_err(|_| AppError::Config("No API key provided and GOOGLE_API_KEY is not set".to_string()))?,
        };

        if key.is_empty() {
            return Err(AppError::Config("API key is empty".to_string()));
        }

        let mut config = Self::new(&key);
        if let Some(model) = model {
            config.model = model.to_string();
        }
        if let Some(endpoint) = endpoint {
            config.endpoint = endpoint.trim_end_matches('/').to_string();
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_with_explicit_key() {
        let config = ApiConfig::resolve(Some("test-key"), None, None).expect("Should resolve");
        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_resolve_overrides() {
        let config = ApiConfig::resolve(Some("k"), Some("gemini-2.0-flash-001"), Some("http://localhost:1234/"))
            .expect("Should resolve");
        assert_eq!(config.model, "gemini-2.0-flash-001");
        assert_eq!(config.endpoint, "http://localhost:1234");
    }

    #[test]
    fn test_resolve_rejects_empty_key() {
        let result = ApiConfig::resolve(Some(""), None, None);
        assert!(result.is_err(), "Empty key should be rejected");
    }
}
