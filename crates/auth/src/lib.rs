//! `branchstock-auth`: authentication/authorization boundary.
//!
//! Decoupled from HTTP and from the ledger: the API layer turns a bearer token
//! into [`JwtClaims`], resolves a [`Principal`] and checks [`Permission`]s
//! before calling any stock operation.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod roles;

pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::Permission;
pub use roles::Role;
