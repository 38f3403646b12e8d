//! Cookie service: set/clear httpOnly auth cookies.
//!
//! Lifetimes mirror the server-side token TTLs so a browser never holds a
//! cookie longer than the token inside it stays valid.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

use lease_core::models::auth::TokenPair;

/// Cookie name for the access token.
pub const ACCESS_COOKIE: &str = "lease_access";
/// Cookie name for the refresh token.
pub const REFRESH_COOKIE: &str = "lease_refresh";

fn build(name: &str, value: &str, max_age: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((name.to_string(), value.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(max_age)
        .build()
}

/// Build a httpOnly cookie for the access token.
pub fn access_cookie(token: &str, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    build(ACCESS_COOKIE, token, Duration::seconds(max_age_secs), secure)
}

/// Build a httpOnly cookie for the refresh token.
pub fn refresh_cookie(token: &str, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    build(REFRESH_COOKIE, token, Duration::seconds(max_age_secs), secure)
}

/// Add both auth cookies for a freshly minted pair.
pub fn with_token_cookies(jar: CookieJar, tokens: &TokenPair, secure: bool) -> CookieJar {
    let refresh_secs = (tokens.refresh_expires_at - chrono::Utc::now())
        .num_seconds()
        .max(0);
    jar.add(access_cookie(&tokens.access_token, tokens.expires_in, secure))
        .add(refresh_cookie(&tokens.refresh_token, refresh_secs, secure))
}

/// Expire both auth cookies.
pub fn clear_token_cookies(jar: CookieJar, secure: bool) -> CookieJar {
    jar.add(build(ACCESS_COOKIE, "", Duration::ZERO, secure))
        .add(build(REFRESH_COOKIE, "", Duration::ZERO, secure))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_cookie_is_http_only_with_ttl() {
        let cookie = access_cookie("tok", 900, false);
        assert_eq!(cookie.name(), ACCESS_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.max_age(), Some(Duration::seconds(900)));
    }

    #[test]
    fn cleared_cookies_expire_immediately() {
        let jar = clear_token_cookies(CookieJar::new(), true);
        let refresh = jar.get(REFRESH_COOKIE).unwrap();
        assert_eq!(refresh.value(), "");
        assert_eq!(refresh.max_age(), Some(Duration::ZERO));
        assert_eq!(refresh.secure(), Some(true));
    }
}
