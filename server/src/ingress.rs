//! # Ingress Router
//!
//! Resolves a public HTTP request to a session id, by subdomain first and
//! path prefix second, before any tunnel-specific code runs.
//! A pure function over `Host`/path — no I/O, no registry lookups — so it's
//! trivially unit-testable and composes into an axum middleware.

use tunnel_protocol::is_valid_session_id;

/// Where an inbound request should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingress {
    /// Matched the `<word>-<word>` shape; `path` is rewritten to drop the
    /// `/tunnel/<id>` prefix, if that's how the match happened.
    Tunnel { session_id: String, path: String },
    /// Host looked like a session subdomain but the id doesn't conform to
    /// `^[a-z]+-[a-z]+$`, an invalid/unknown session that should 404, distinct
    /// from a syntactically valid id with no such session (also checked by
    /// the caller against the registry, also 404, but logged differently).
    InvalidSessionShape,
    /// Neither a subdomain nor a path-prefix match: normal HTTP handler.
    PassThrough,
}

/// Strips an explicit `:port` suffix from a `Host` header value.
fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        // Keep IPv6 literals like `[::1]:8080` intact if a bracket shows up
        // after the split point (best-effort; tunnels aren't addressed by IP).
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => host,
    }
}

fn match_subdomain(host: &str, base_domain: &str) -> Option<Ingress> {
    let host = strip_port(host);
    let base_domain = strip_port(base_domain);
    let suffix = format!(".{base_domain}");
    let candidate = host.strip_suffix(&suffix)?;
    if candidate.is_empty() {
        return None;
    }
    Some(if is_valid_session_id(candidate) {
        Ingress::Tunnel {
            session_id: candidate.to_string(),
            path: String::new(), // caller keeps the original path unchanged
        }
    } else {
        Ingress::InvalidSessionShape
    })
}

fn match_path_prefix(path: &str) -> Option<Ingress> {
    let rest = path.strip_prefix("/tunnel/")?;
    let (id, tail) = rest.split_once('/').unwrap_or((rest, ""));
    if id.is_empty() {
        return None;
    }
    Some(if is_valid_session_id(id) {
        Ingress::Tunnel {
            session_id: id.to_string(),
            path: format!("/{tail}"),
        }
    } else {
        Ingress::InvalidSessionShape
    })
}

/// Resolves `host` (the `Host` header, matched case-sensitively)
/// and `path` against `base_domain`. Subdomain match takes precedence
/// over the path-prefix form.
pub fn resolve(host: Option<&str>, path: &str, base_domain: &str) -> Ingress {
    if let Some(host) = host {
        if let Some(m) = match_subdomain(host, base_domain) {
            return m;
        }
    }
    if let Some(m) = match_path_prefix(path) {
        return m;
    }
    Ingress::PassThrough
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "wingmanux.com";

    #[test]
    fn subdomain_match_resolves_to_tunnel() {
        let ingress = resolve(Some("brave-otter.wingmanux.com"), "/", BASE);
        assert_eq!(
            ingress,
            Ingress::Tunnel {
                session_id: "brave-otter".into(),
                path: String::new(),
            }
        );
    }

    #[test]
    fn subdomain_match_strips_explicit_port() {
        let ingress = resolve(Some("brave-otter.localhost:8787"), "/", "localhost:8787");
        assert_eq!(
            ingress,
            Ingress::Tunnel {
                session_id: "brave-otter".into(),
                path: String::new(),
            }
        );
    }

    #[test]
    fn malformed_subdomain_shape_is_rejected() {
        let ingress = resolve(Some("fakesessionid.wingmanux.com"), "/", BASE);
        assert_eq!(ingress, Ingress::InvalidSessionShape);
    }

    #[test]
    fn uppercase_ids_are_rejected_case_sensitively() {
        let ingress = resolve(Some("Brave-Otter.wingmanux.com"), "/", BASE);
        assert_eq!(ingress, Ingress::InvalidSessionShape);
    }

    #[test]
    fn path_prefix_match_rewrites_path() {
        let ingress = resolve(Some("api.other.com"), "/tunnel/brave-otter/foo/bar", BASE);
        assert_eq!(
            ingress,
            Ingress::Tunnel {
                session_id: "brave-otter".into(),
                path: "/foo/bar".into(),
            }
        );
    }

    #[test]
    fn path_prefix_with_no_rest_rewrites_to_root() {
        let ingress = resolve(None, "/tunnel/brave-otter", BASE);
        assert_eq!(
            ingress,
            Ingress::Tunnel {
                session_id: "brave-otter".into(),
                path: "/".into(),
            }
        );
    }

    #[test]
    fn unrelated_requests_pass_through() {
        let ingress = resolve(Some("api.wingmanux.com"), "/health", BASE);
        assert_eq!(ingress, Ingress::PassThrough);
    }
}
