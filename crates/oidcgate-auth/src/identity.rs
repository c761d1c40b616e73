//! User id extraction strategies.
//!
//! The strategy decides which claim becomes the canonical user id forwarded
//! to the application. It is chosen by name at configuration time and stored
//! inside every session cookie, so a decoded session always extracts its id
//! the same way it did when it was issued.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::claims::Identity;

/// Closed set of supported id extraction strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IdentityStrategy {
    /// The `email` claim.
    #[default]
    Email,
    /// The `sub` claim.
    Sub,
    /// Google accounts: the `email` claim, or `sub` when no email was granted.
    Google,
}

/// Lookup table from configured name to strategy.
const STRATEGIES: &[(&str, IdentityStrategy)] = &[
    ("email", IdentityStrategy::Email),
    ("sub", IdentityStrategy::Sub),
    ("google", IdentityStrategy::Google),
];

impl IdentityStrategy {
    /// Resolves a strategy by its configured name, ignoring ASCII case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        STRATEGIES
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, strategy)| *strategy)
    }

    /// All accepted strategy names.
    #[must_use]
    pub fn names() -> Vec<&'static str> {
        STRATEGIES.iter().map(|(key, _)| *key).collect()
    }

    /// The configured name of this strategy.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sub => "sub",
            Self::Google => "google",
        }
    }

    /// Extracts the user id. An empty string means no usable id.
    #[must_use]
    pub fn extract_id(&self, identity: &Identity) -> String {
        match self {
            Self::Email => identity.email.clone(),
            Self::Sub => identity.sub.clone(),
            Self::Google => {
                if identity.email.is_empty() {
                    identity.sub.clone()
                } else {
                    identity.email.clone()
                }
            }
        }
    }
}

impl fmt::Display for IdentityStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
