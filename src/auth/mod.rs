//! The `auth` module validates the JWTs publishers and subscribers present
//! and turns their `mercure` claim into topic scopes.

pub mod claims;
pub mod jwt;

pub use claims::{AuthorizationClaims, MercureClaim, Role, Scope};
pub use jwt::{AuthError, JwtAuthorizer, SigningKey, VerificationKey, authorize_topics};
