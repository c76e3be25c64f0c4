//! # CORS Policy
//!
//! Builds a [`tower_http::cors::CorsLayer`] that allows: browser
//! extension origins (`chrome-extension://`, `moz-extension://`,
//! `extension://`) are always allowed, `localhost`/`127.0.0.1` origins are
//! allowed only in development, and any origin named in
//! `CORS_ALLOWED_ORIGINS` is always allowed. The teacher reaches for
//! `CorsLayer::permissive()`; a public tunnel endpoint can't afford that, so
//! this builds an explicit `AllowOrigin::predicate`.

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::{Config, Environment};

const EXTENSION_SCHEMES: &[&str] = &["chrome-extension://", "moz-extension://", "extension://"];

fn is_extension_origin(origin: &str) -> bool {
    EXTENSION_SCHEMES.iter().any(|scheme| origin.starts_with(scheme))
}

fn is_local_dev_origin(origin: &str) -> bool {
    origin.starts_with("http://localhost:")
        || origin.starts_with("http://127.0.0.1:")
        || origin == "http://localhost"
        || origin == "http://127.0.0.1"
}

pub fn build(config: &Config) -> CorsLayer {
    let is_development = config.env == Environment::Development;
    let allowed_origins = config.cors_allowed_origins.clone();

    let predicate = move |origin: &HeaderValue, _parts: &axum::http::request::Parts| {
        let Ok(origin_str) = origin.to_str() else {
            return false;
        };
        is_extension_origin(origin_str)
            || (is_development && is_local_dev_origin(origin_str))
            || allowed_origins.iter().any(|allowed| allowed == origin_str)
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(predicate))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
        ])
        .expose_headers([
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-preview-url"),
        ])
        .max_age(std::time::Duration::from_secs(24 * 60 * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_origins_are_recognized() {
        assert!(is_extension_origin("chrome-extension://abcdefg"));
        assert!(is_extension_origin("moz-extension://abcdefg"));
        assert!(!is_extension_origin("https://evil.example.com"));
    }

    #[test]
    fn localhost_variants_are_recognized_as_dev_origins() {
        assert!(is_local_dev_origin("http://localhost:3000"));
        assert!(is_local_dev_origin("http://127.0.0.1:8080"));
        assert!(!is_local_dev_origin("https://wingmanux.com"));
    }
}
