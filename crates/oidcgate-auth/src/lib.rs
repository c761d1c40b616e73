//! # oidcgate-auth
//!
//! OpenID Connect login for axum applications, with the session held entirely
//! in encrypted browser cookies.
//!
//! This crate provides:
//! - Provider discovery from `.well-known/openid-configuration`
//! - Authorization Code flow with optional PKCE (S256)
//! - Token exchange and refresh against the provider's token endpoint
//! - Identity extraction from tokens, either decoded locally or verified
//!   against the provider's JWKS
//! - Compressed, AES-256-GCM encrypted session cookies
//! - An axum middleware that drives the whole login state machine
//!
//! ## Modules
//!
//! - [`config`] - Raw settings and the validated client configuration
//! - [`discovery`] - Provider metadata discovery
//! - [`pkce`] - PKCE state generation, validation and policy
//! - [`session`] - Session and state cookie codecs
//! - [`token`] - Token endpoint client
//! - [`claims`] - Identity claims resolution and JWKS caching
//! - [`identity`] - User id extraction strategies
//! - [`groups`] - Identity to groups cache
//! - [`gate`] - The per-request authentication decision
//! - [`middleware`] - axum integration

pub mod claims;
pub mod config;
pub mod discovery;
pub mod error;
pub mod gate;
pub mod groups;
pub mod identity;
pub mod middleware;
pub mod pkce;
pub mod session;
pub mod token;

pub use claims::{ClaimsError, ClaimsResolver, Identity};
pub use config::{AuthSettings, ClientConfig, ConfigError};
pub use discovery::{DiscoveryError, OidcDiscoveryClient, ProviderMetadata};
pub use error::{AuthError, StartupError};
pub use gate::{OidcGate, Outcome, RequestContext, escape_html};
pub use groups::{GroupCache, InMemoryGroupCache};
pub use identity::IdentityStrategy;
pub use middleware::{AuthenticatedUser, oidc_auth_middleware};
pub use pkce::{AuthState, PkceMode};
pub use session::{CipherError, PersistedSession, SessionCodec};
pub use token::{RawToken, TokenClient, TokenError};

/// Type alias for request-scoped authentication results.
pub type AuthResult<T> = Result<T, AuthError>;
