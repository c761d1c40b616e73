//! `Set-Cookie` construction for the session and state cookies.

use cookie::{Cookie, SameSite};
use time::Duration;

/// Suffix appended to the session cookie name for the PKCE state cookie.
pub const STATE_COOKIE_SUFFIX: &str = "_STATE";

/// Lifetime of the PKCE state cookie.
pub const STATE_COOKIE_MAX_AGE: Duration = Duration::seconds(300);

/// Attributes shared by the gate's cookies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSettings {
    /// Session cookie name.
    pub name: String,
    /// `Secure` attribute.
    pub secure: bool,
    /// `Domain` attribute, the redirect URI host.
    pub domain: Option<String>,
    /// Session cookie lifetime.
    pub max_age: Duration,
}

impl CookieSettings {
    /// Name of the PKCE state cookie.
    #[must_use]
    pub fn state_cookie_name(&self) -> String {
        format!("{}{}", self.name, STATE_COOKIE_SUFFIX)
    }

    /// Session cookie carrying `value`. An empty value clears the cookie.
    #[must_use]
    pub fn session_cookie(&self, value: String) -> Cookie<'static> {
        let max_age = if value.is_empty() {
            Duration::ZERO
        } else {
            self.max_age
        };
        self.build(self.name.clone(), value, max_age, SameSite::Strict)
    }

    /// Expired session cookie.
    #[must_use]
    pub fn clear_session_cookie(&self) -> Cookie<'static> {
        self.session_cookie(String::new())
    }

    /// State cookie carrying `value`. An empty value clears the cookie.
    ///
    /// The state cookie is `SameSite=Lax`: it must be sent on the top-level
    /// navigation back from the provider, which is a cross-site request.
    #[must_use]
    pub fn state_cookie(&self, value: String) -> Cookie<'static> {
        let max_age = if value.is_empty() {
            Duration::ZERO
        } else {
            STATE_COOKIE_MAX_AGE
        };
        self.build(self.state_cookie_name(), value, max_age, SameSite::Lax)
    }

    /// Expired state cookie.
    #[must_use]
    pub fn clear_state_cookie(&self) -> Cookie<'static> {
        self.state_cookie(String::new())
    }

    fn build(
        &self,
        name: String,
        value: String,
        max_age: Duration,
        same_site: SameSite,
    ) -> Cookie<'static> {
        let mut builder = Cookie::build((name, value))
            .http_only(true)
            .secure(self.secure)
            .path("/")
            .same_site(same_site)
            .max_age(max_age);
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }
}
