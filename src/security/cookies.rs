// ABOUTME: Cookie parsing and Set-Cookie construction for session credentials
// ABOUTME: Builds the session-scoped guest token cookie and its expiry form
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

use http::HeaderMap;

/// Name of the guest session cookie
pub const GUEST_COOKIE: &str = "guest_token";

/// Name of the identity provider's session token cookie
pub const AUTH_COOKIE: &str = "auth_token";

/// Extract a cookie value from the request `Cookie` header
#[must_use]
pub fn get_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie_header = headers.get(http::header::COOKIE)?.to_str().ok()?;

    cookie_header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_owned())
    })
}

/// Build the `Set-Cookie` value for a freshly issued guest session token.
///
/// Session-scoped (no `Max-Age`), `HttpOnly`, `SameSite=Lax`; `Secure` is
/// added in production deployments only.
#[must_use]
pub fn guest_cookie(token: &str, secure: bool) -> String {
    if secure {
        format!("{GUEST_COOKIE}={token}; Path=/; SameSite=Lax; Secure; HttpOnly")
    } else {
        format!("{GUEST_COOKIE}={token}; Path=/; SameSite=Lax; HttpOnly")
    }
}

/// Build the `Set-Cookie` value that expires the guest session cookie
#[must_use]
pub fn expired_guest_cookie(secure: bool) -> String {
    if secure {
        format!("{GUEST_COOKIE}=; Path=/; Max-Age=0; SameSite=Lax; Secure; HttpOnly")
    } else {
        format!("{GUEST_COOKIE}=; Path=/; Max-Age=0; SameSite=Lax; HttpOnly")
    }
}
