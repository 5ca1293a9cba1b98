//! Purchase API session material.
//!
//! Tokens and cookies stay in memory only and are zeroized when dropped.

use std::fmt;

use zeroize::{Zeroize, Zeroizing};

/// Authenticated session of one account.
///
/// This struct should:
/// - Never be logged (the `Debug` impl redacts it)
/// - Be zeroized when dropped
#[derive(Clone)]
pub struct Session {
    /// Bearer token sent as the access-token header
    pub access_token: Option<Zeroizing<String>>,
    /// Cookie header value
    pub cookies: Zeroizing<String>,
}

impl Session {
    /// Create a session.
    pub fn new(access_token: Option<String>, cookies: impl Into<String>) -> Self {
        Self {
            access_token: access_token.map(Zeroizing::new),
            cookies: Zeroizing::new(cookies.into()),
        }
    }

    /// Session without any material (requests go out unauthenticated).
    pub fn anonymous() -> Self {
        Self::new(None, String::new())
    }

    /// Bearer token, if any.
    pub fn token(&self) -> Option<&str> {
        self.access_token.as_deref().map(String::as_str)
    }

    /// Whether a bearer token is present.
    pub fn has_token(&self) -> bool {
        self.access_token.is_some()
    }
}

impl Zeroize for Session {
    fn zeroize(&mut self) {
        if let Some(token) = self.access_token.as_mut() {
            token.zeroize();
        }
        self.cookies.zeroize();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("cookies", &"<redacted>")
            .finish()
    }
}
