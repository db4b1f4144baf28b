//! Identity and token verification.
//!
//! The identity service issues bearer tokens; this engine only verifies
//! them. Verification covers signature + issuer + expiry (HS256 via
//! `jsonwebtoken`), a revocation check against a short-TTL cache, and a
//! principal-directory lookup with brief caching.

use dashmap::{DashMap, DashSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::db::Database;

/// Global role hierarchy, ordered by numeric level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalRole {
    Guest,
    User,
    Premium,
    Moderator,
    Admin,
    Superadmin,
}

impl GlobalRole {
    /// Numeric permission level.
    pub fn level(&self) -> u8 {
        match self {
            GlobalRole::Guest => 0,
            GlobalRole::User => 10,
            GlobalRole::Premium => 20,
            GlobalRole::Moderator => 50,
            GlobalRole::Admin => 80,
            GlobalRole::Superadmin => 100,
        }
    }

    /// Stable string form, matching the persisted column values.
    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalRole::Guest => "guest",
            GlobalRole::User => "user",
            GlobalRole::Premium => "premium",
            GlobalRole::Moderator => "moderator",
            GlobalRole::Admin => "admin",
            GlobalRole::Superadmin => "superadmin",
        }
    }

    /// Parse the persisted column value.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "guest" => GlobalRole::Guest,
            "user" => GlobalRole::User,
            "premium" => GlobalRole::Premium,
            "moderator" => GlobalRole::Moderator,
            "admin" => GlobalRole::Admin,
            "superadmin" => GlobalRole::Superadmin,
            _ => return None,
        })
    }

    /// Whether this role bypasses rate limiting and sees flagged content.
    pub fn is_staff(&self) -> bool {
        self.level() >= GlobalRole::Moderator.level()
    }
}

/// Account standing of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalStatus {
    Active,
    Suspended,
    Banned,
}

impl PrincipalStatus {
    /// Parse the persisted column value.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "active" => PrincipalStatus::Active,
            "suspended" => PrincipalStatus::Suspended,
            "banned" => PrincipalStatus::Banned,
            _ => return None,
        })
    }

    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalStatus::Active => "active",
            PrincipalStatus::Suspended => "suspended",
            PrincipalStatus::Banned => "banned",
        }
    }
}

/// An authenticated identity, resolved from the principal directory.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: i64,
    pub display_name: String,
    pub role: GlobalRole,
    pub status: PrincipalStatus,
    pub email_verified: bool,
}

impl Principal {
    /// Whether the principal may hold an open connection at all.
    pub fn may_connect(&self) -> bool {
        self.status == PrincipalStatus::Active
    }
}

/// Token verification failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,

    #[error("expired token")]
    ExpiredToken,

    #[error("revoked token")]
    RevokedToken,

    #[error("principal not found")]
    PrincipalNotFound,

    #[error("principal suspended or banned")]
    PrincipalSuspended,
}

impl AuthError {
    /// Static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid_token",
            Self::ExpiredToken => "expired_token",
            Self::RevokedToken => "revoked_token",
            Self::PrincipalNotFound => "principal_not_found",
            Self::PrincipalSuspended => "principal_suspended",
        }
    }
}

/// JWT claims the identity service puts in its bearer tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id.
    pub sub: i64,
    /// Issuer; must match the configured value.
    pub iss: String,
    /// Expiry (unix seconds); validated by the decoder.
    pub exp: i64,
    /// Token id, consulted against the revocation cache.
    #[serde(default)]
    pub jti: Option<String>,
}

struct CachedPrincipal {
    principal: Principal,
    fetched: Instant,
}

/// Verifies bearer tokens and resolves principals.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    db: Database,
    /// Token ids revoked by the identity service; refreshed periodically.
    revoked: DashSet<String>,
    /// Brief principal cache; the directory is read-mostly.
    cache: DashMap<i64, CachedPrincipal>,
    cache_ttl: Duration,
}

impl TokenVerifier {
    /// Create a verifier for the given signing key and issuer.
    pub fn new(signing_key: &str, issuer: &str, cache_ttl: Duration, db: Database) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Self {
            decoding_key: DecodingKey::from_secret(signing_key.as_bytes()),
            validation,
            db,
            revoked: DashSet::new(),
            cache: DashMap::new(),
            cache_ttl,
        }
    }

    /// Verify a bearer token and resolve its principal.
    pub async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken,
            })?
            .claims;

        if let Some(jti) = &claims.jti {
            if self.revoked.contains(jti) {
                debug!(principal = claims.sub, "revoked token presented");
                return Err(AuthError::RevokedToken);
            }
        }

        let principal = self.resolve_principal(claims.sub).await?;
        if !principal.may_connect() {
            return Err(AuthError::PrincipalSuspended);
        }
        Ok(principal)
    }

    /// Resolve a principal by id, serving from the brief cache when fresh.
    pub async fn resolve_principal(&self, id: i64) -> Result<Principal, AuthError> {
        if let Some(entry) = self.cache.get(&id) {
            if entry.fetched.elapsed() < self.cache_ttl {
                return Ok(entry.principal.clone());
            }
        }

        let principal = self
            .db
            .principals()
            .fetch(id)
            .await
            .map_err(|_| AuthError::PrincipalNotFound)?
            .ok_or(AuthError::PrincipalNotFound)?;

        self.cache.insert(
            id,
            CachedPrincipal {
                principal: principal.clone(),
                fetched: Instant::now(),
            },
        );
        Ok(principal)
    }

    /// Drop a principal from the cache (e.g. after a status sweep).
    pub fn invalidate(&self, id: i64) {
        self.cache.remove(&id);
    }

    /// Reload the revocation cache from the database.
    pub async fn refresh_revocations(&self) {
        match self.db.principals().active_revocations().await {
            Ok(jtis) => {
                self.revoked.clear();
                for jti in jtis {
                    self.revoked.insert(jti);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to refresh revocation cache");
            }
        }
    }

    /// Mark a token id revoked in-process (admin surface).
    #[allow(dead_code)] // Wired up by the platform's admin tooling
    pub fn revoke(&self, jti: impl Into<String>) {
        self.revoked.insert(jti.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_levels_are_ordered() {
        assert!(GlobalRole::Guest.level() < GlobalRole::User.level());
        assert!(GlobalRole::User.level() < GlobalRole::Premium.level());
        assert!(GlobalRole::Premium.level() < GlobalRole::Moderator.level());
        assert!(GlobalRole::Moderator.level() < GlobalRole::Admin.level());
        assert!(GlobalRole::Admin.level() < GlobalRole::Superadmin.level());
    }

    #[test]
    fn role_parse_roundtrip() {
        for role in [
            GlobalRole::Guest,
            GlobalRole::User,
            GlobalRole::Premium,
            GlobalRole::Moderator,
            GlobalRole::Admin,
            GlobalRole::Superadmin,
        ] {
            assert_eq!(GlobalRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(GlobalRole::parse("root"), None);
    }

    #[test]
    fn staff_starts_at_moderator() {
        assert!(!GlobalRole::Premium.is_staff());
        assert!(GlobalRole::Moderator.is_staff());
        assert!(GlobalRole::Superadmin.is_staff());
    }

    #[test]
    fn suspended_principal_may_not_connect() {
        let p = Principal {
            id: 1,
            display_name: "x".into(),
            role: GlobalRole::User,
            status: PrincipalStatus::Suspended,
            email_verified: true,
        };
        assert!(!p.may_connect());
    }
}
