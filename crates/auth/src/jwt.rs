//! Bearer token decoding.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

/// Turns a raw bearer token into validated claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// HS256 shared-secret validator.
///
/// Expiry lives in the `issued_at`/`expires_at` claims rather than the
/// registered `exp`, so the library's own time checks are disabled and
/// [`validate_claims`] runs after the signature is verified.
#[derive(Clone)]
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;

        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl core::fmt::Debug for Hs256JwtValidator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256JwtValidator").field("key", &"[hidden]").finish()
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = decode::<JwtClaims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => TokenValidationError::BadSignature,
            _ => TokenValidationError::Malformed(e.to_string()),
        })?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchstock_core::UserId;
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header, encode};

    use crate::Role;

    fn mint(secret: &str, claims: &JwtClaims) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn claims(now: DateTime<Utc>) -> JwtClaims {
        JwtClaims {
            sub: UserId::new(),
            roles: vec![Role::MANAGER],
            issued_at: now,
            expires_at: now + Duration::minutes(5),
        }
    }

    #[test]
    fn accepts_token_signed_with_same_secret() {
        let now = Utc::now();
        let c = claims(now);
        let v = Hs256JwtValidator::new("s3cret");
        assert_eq!(v.validate(&mint("s3cret", &c), now).unwrap(), c);
    }

    #[test]
    fn rejects_foreign_signature() {
        let now = Utc::now();
        let v = Hs256JwtValidator::new("s3cret");
        assert_eq!(
            v.validate(&mint("other", &claims(now)), now),
            Err(TokenValidationError::BadSignature)
        );
    }

    #[test]
    fn rejects_expired_token() {
        let now = Utc::now();
        let v = Hs256JwtValidator::new("s3cret");
        let token = mint("s3cret", &claims(now));
        assert_eq!(
            v.validate(&token, now + Duration::minutes(6)),
            Err(TokenValidationError::Expired)
        );
    }

    #[test]
    fn rejects_garbage() {
        let v = Hs256JwtValidator::new("s3cret");
        assert!(matches!(v.validate("not.a.jwt", Utc::now()), Err(TokenValidationError::Malformed(_))));
    }
}
