//! Application configuration
//!
//! Handles environment-specific API base URLs and the worker script path.

use serde::{Deserialize, Serialize};

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Environment {
    /// Local development behind the dev proxy.
    #[default]
    Development,
    /// Deployed build talking to the backend directly.
    Production,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment
    pub environment: Environment,

    /// Origin the app itself is served from
    pub site_origin: String,

    /// Base path the app is deployed under (with trailing slash)
    pub base_path: String,

    /// Backend origin used in production
    pub backend_origin: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            site_origin: "https://carewave.example".to_string(),
            base_path: "/carewave/".to_string(),
            backend_origin: "https://api.carewave.example".to_string(),
        }
    }
}

impl AppConfig {
    /// Create a production configuration.
    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            ..Default::default()
        }
    }

    fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// API base URL: direct backend origin in production, the dev proxy
    /// path otherwise.
    pub fn api_base_url(&self) -> String {
        if self.is_production() {
            self.backend_origin.clone()
        } else {
            "/api".to_string()
        }
    }

    /// Socket URL: backend origin in production, empty in development
    /// (empty means current origin to the socket client).
    pub fn socket_url(&self) -> String {
        if self.is_production() {
            self.backend_origin.clone()
        } else {
            String::new()
        }
    }

    /// Construct a full API URL for an endpoint path.
    pub fn api_url(&self, endpoint: &str) -> String {
        // Strip a leading slash to avoid double slashes
        let clean = endpoint.strip_prefix('/').unwrap_or(endpoint);

        if self.is_production() {
            format!("{}/{}", self.backend_origin, clean)
        } else {
            format!("/api/{clean}")
        }
    }

    /// Construct a full URL for an uploaded asset path.
    pub fn upload_url(&self, path: &str) -> String {
        let clean = path.strip_prefix('/').unwrap_or(path);

        if self.is_production() {
            format!("{}/{}", self.backend_origin, clean)
        } else {
            format!("/{clean}")
        }
    }

    /// Absolute URL of the worker script, relative to the deployed base.
    pub fn sw_script_url(&self) -> String {
        format!("{}{}sw.js", self.site_origin, self.base_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_development() {
        let config = AppConfig::default();
        assert_eq!(config.api_base_url(), "/api");
        assert_eq!(config.api_url("/auth/login"), "/api/auth/login");
        assert_eq!(config.api_url("auth/login"), "/api/auth/login");
        assert_eq!(config.socket_url(), "");
    }

    #[test]
    fn test_api_url_production() {
        let config = AppConfig::production();
        assert_eq!(config.api_base_url(), "https://api.carewave.example");
        assert_eq!(
            config.api_url("/auth/login"),
            "https://api.carewave.example/auth/login"
        );
        assert_eq!(config.socket_url(), "https://api.carewave.example");
    }

    #[test]
    fn test_upload_url() {
        let dev = AppConfig::default();
        assert_eq!(dev.upload_url("/uploads/avatar.jpg"), "/uploads/avatar.jpg");

        let prod = AppConfig::production();
        assert_eq!(
            prod.upload_url("/uploads/avatar.jpg"),
            "https://api.carewave.example/uploads/avatar.jpg"
        );
    }

    #[test]
    fn test_sw_script_url() {
        let config = AppConfig::default();
        assert_eq!(
            config.sw_script_url(),
            "https://carewave.example/carewave/sw.js"
        );
    }
}
