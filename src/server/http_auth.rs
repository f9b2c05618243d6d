use crate::domain::UserIdentity;
use axum::http::{header, header::HeaderMap};

pub(super) const USER_ID_HEADER: &str = "x-auth-user-id";
pub(super) const USER_EMAIL_HEADER: &str = "x-auth-user-email";
pub(super) const USER_NAME_HEADER: &str = "x-auth-user-name";

pub(super) fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

pub(super) fn is_admin_authorized(headers: &HeaderMap, expected_token: Option<&str>) -> bool {
    match expected_token {
        Some(token) if !token.is_empty() => extract_bearer_token(headers) == Some(token),
        _ => false,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Identity forwarded by the authenticating gateway.
///
/// With a gateway token configured, the identity headers count only when the
/// request also carries that token as its bearer credential.
pub(super) fn identity_from_headers(
    headers: &HeaderMap,
    gateway_token: Option<&str>,
) -> Option<UserIdentity> {
    if let Some(token) = gateway_token.filter(|t| !t.is_empty()) {
        if extract_bearer_token(headers) != Some(token) {
            return None;
        }
    }

    let mut identity = UserIdentity::new(header_str(headers, USER_ID_HEADER)?);
    if let Some(email) = header_str(headers, USER_EMAIL_HEADER) {
        identity = identity.with_email(email);
    }
    if let Some(name) = header_str(headers, USER_NAME_HEADER) {
        identity = identity.with_name(name);
    }
    Some(identity)
}
