//! Cross-origin allow-list for the relay's HTTP surface.

use axum::http::{header, HeaderValue, Method};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// One entry of the allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPattern {
    /// `*`
    Any,
    /// `http://localhost:8080`
    Exact(String),
    /// `https://*.app.github.dev`: any single or nested subdomain.
    Subdomain { scheme: String, suffix: String },
}

impl OriginPattern {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().trim_end_matches('/');
        if raw == "*" {
            return OriginPattern::Any;
        }
        if let Some((scheme, host)) = raw.split_once("://") {
            if let Some(rest) = host.strip_prefix('*') {
                return OriginPattern::Subdomain {
                    scheme: format!("{scheme}://"),
                    suffix: rest.to_string(),
                };
            }
        }
        OriginPattern::Exact(raw.to_string())
    }

    pub fn matches(&self, origin: &str) -> bool {
        match self {
            OriginPattern::Any => true,
            OriginPattern::Exact(exact) => exact == origin,
            OriginPattern::Subdomain { scheme, suffix } => origin
                .strip_prefix(scheme.as_str())
                .and_then(|host| host.strip_suffix(suffix.as_str()))
                .is_some_and(|label| !label.is_empty() && !label.contains('/')),
        }
    }
}

/// Cross-origin policy. Methods are always limited to GET and POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsConfig {
    pub origins: Vec<OriginPattern>,
    pub credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: vec![OriginPattern::Any],
            credentials: true,
        }
    }
}

impl CorsConfig {
    /// Parse a comma-separated allow-list such as
    /// `https://*.app.github.dev,http://localhost:8080`.
    pub fn parse_origins(list: &str) -> Vec<OriginPattern> {
        list.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(OriginPattern::parse)
            .collect()
    }

    pub fn allows(&self, origin: &str) -> bool {
        self.origins.iter().any(|p| p.matches(origin))
    }

    pub fn layer(&self) -> CorsLayer {
        let wildcard = self.origins.contains(&OriginPattern::Any);
        let allow_origin = match (wildcard, self.credentials) {
            // Browsers refuse a literal `*` together with credentials, so echo the origin back.
            (true, true) => AllowOrigin::mirror_request(),
            (true, false) => AllowOrigin::any(),
            (false, _) => {
                let patterns = Arc::new(self.origins.clone());
                AllowOrigin::predicate(move |origin: &HeaderValue, _| {
                    origin
                        .to_str()
                        .is_ok_and(|o| patterns.iter().any(|p| p.matches(o)))
                })
            }
        };

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(self.credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_patterns() {
        assert_eq!(OriginPattern::parse("*"), OriginPattern::Any);
        assert_eq!(
            OriginPattern::parse("http://localhost:8080/"),
            OriginPattern::Exact("http://localhost:8080".into())
        );
        assert_eq!(
            OriginPattern::parse("https://*.app.github.dev"),
            OriginPattern::Subdomain {
                scheme: "https://".into(),
                suffix: ".app.github.dev".into()
            }
        );
    }

    #[test]
    fn test_subdomain_matching() {
        let pattern = OriginPattern::parse("https://*.app.github.dev");
        assert!(pattern.matches("https://fuzzy-space-8080.app.github.dev"));
        assert!(!pattern.matches("http://fuzzy-space-8080.app.github.dev"));
        assert!(!pattern.matches("https://.app.github.dev"));
        assert!(!pattern.matches("https://evil.com/x.app.github.dev"));
        assert!(!pattern.matches("https://app.github.dev"));
    }

    #[test]
    fn test_allow_list() {
        let config = CorsConfig {
            origins: CorsConfig::parse_origins(
                "https://*.app.github.dev, http://localhost:8080,http://localhost:3001",
            ),
            credentials: true,
        };
        assert_eq!(config.origins.len(), 3);
        assert!(config.allows("http://localhost:3001"));
        assert!(!config.allows("http://localhost:9999"));
    }

    #[test]
    fn test_default_is_wildcard_with_credentials() {
        let config = CorsConfig::default();
        assert!(config.allows("http://anything.example"));
        assert!(config.credentials);
        // Building the layer must not trip the wildcard + credentials guard.
        let _ = config.layer();
    }

    #[test]
    fn test_empty_entries_ignored() {
        assert!(CorsConfig::parse_origins(" , ,").is_empty());
    }
}
