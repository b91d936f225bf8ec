//! Session identity for rate limiting.
//!
//! The per-identity rate tiers key on a session token carried in a
//! short-lived, same-site-strict cookie. When no cookie is present a fresh
//! identifier is generated for the request and handed back via
//! `Set-Cookie`, so cooperating clients converge on a stable identity
//! while cookie-less clients fall through to the global tiers.

use axum::http::{header, HeaderMap};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "palisade_session";

/// Cookie lifetime: 24 hours, matching the longest rate window.
pub const SESSION_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Length of generated session tokens.
const TOKEN_LEN: usize = 32;

/// Upper bound on accepted client-supplied tokens.
const MAX_TOKEN_LEN: usize = 128;

/// The identity resolved for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    /// The identity key used for rate accounting.
    pub id: String,
    /// True when the identity was freshly generated and should be set as
    /// a cookie on the response.
    pub issued: bool,
}

/// Resolves the request identity from the `Cookie` header, generating a
/// fresh token when none is present or the value is unusable.
pub fn identity_from_headers(headers: &HeaderMap) -> RequestIdentity {
    for value in headers.get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            let pair = pair.trim();
            if let Some(token) = pair.strip_prefix(SESSION_COOKIE) {
                if let Some(token) = token.strip_prefix('=') {
                    if is_acceptable_token(token) {
                        return RequestIdentity {
                            id: token.to_string(),
                            issued: false,
                        };
                    }
                }
            }
        }
    }

    RequestIdentity {
        id: generate_token(),
        issued: true,
    }
}

/// Formats the `Set-Cookie` value for a freshly issued identity.
pub fn set_cookie_value(id: &str) -> String {
    format!(
        "{SESSION_COOKIE}={id}; Max-Age={SESSION_MAX_AGE_SECS}; Path=/; HttpOnly; SameSite=Strict"
    )
}

fn is_acceptable_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}
