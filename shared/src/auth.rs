//! Password hashing, signed tokens and the ownership predicate.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{ShopError, ShopResult};

pub const MIN_SECRET_LEN: usize = 32;
pub const MIN_PASSWORD_LEN: usize = 4;
pub const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=20;

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: i32,
    pub username: String,
    pub is_superuser: bool,
}

pub fn is_owner_or_admin(principal: &Principal, owner_id: i32) -> bool {
    principal.id == owner_id || principal.is_superuser
}

pub fn ensure_owner_or_admin(principal: &Principal, owner_id: i32, what: &str) -> ShopResult<()> {
    if is_owner_or_admin(principal, owner_id) {
        Ok(())
    } else {
        Err(ShopError::forbidden(format!("no access to this {what}")))
    }
}

pub fn ensure_admin(principal: &Principal) -> ShopResult<()> {
    if principal.is_superuser {
        Ok(())
    } else {
        Err(ShopError::forbidden("insufficient permissions"))
    }
}

/// Hash with Argon2id and a fresh random salt. CPU heavy; call it off the
/// async executor.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    use argon2::password_hash::rand_core::OsRng;
    use argon2::password_hash::SaltString;
    use argon2::{Argon2, PasswordHasher};

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub fn validate_username(username: &str) -> ShopResult<()> {
    let len = username.chars().count();
    if !USERNAME_LEN.contains(&len) || username.trim() != username {
        return Err(ShopError::validation(format!(
            "username must be {} to {} characters without surrounding spaces",
            USERNAME_LEN.start(),
            USERNAME_LEN.end()
        )));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> ShopResult<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(ShopError::validation(format!("'{email}' is not a valid email address")));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> ShopResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ShopError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => f.write_str("access"),
            TokenKind::Refresh => f.write_str("refresh"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> ShopResult<i32> {
        self.sub
            .parse()
            .map_err(|_| ShopError::InvalidToken("subject is not a user id".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub secret: String,
    pub algorithm: Algorithm,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl TokenSettings {
    pub fn validate(&self) -> ShopResult<()> {
        if self.secret.len() < MIN_SECRET_LEN {
            return Err(ShopError::validation(format!(
                "JWT secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if !matches!(self.algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(ShopError::validation("only HMAC signing algorithms are supported"));
        }
        if self.access_ttl <= Duration::zero() || self.refresh_ttl <= Duration::zero() {
            return Err(ShopError::validation("token lifetimes must be positive"));
        }
        Ok(())
    }
}

/// Issues and checks HMAC-signed access and refresh tokens.
#[derive(Clone)]
pub struct TokenService {
    settings: TokenSettings,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &self.settings.algorithm)
            .field("access_ttl", &self.settings.access_ttl)
            .field("refresh_ttl", &self.settings.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(settings: TokenSettings) -> ShopResult<Self> {
        settings.validate()?;
        let encoding_key = EncodingKey::from_secret(settings.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(settings.secret.as_bytes());
        Ok(Self {
            settings,
            encoding_key,
            decoding_key,
        })
    }

    pub fn access_ttl_seconds(&self) -> i64 {
        self.settings.access_ttl.num_seconds()
    }

    pub fn issue_access(
        &self,
        user_id: i32,
        username: &str,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_at(user_id, Some(username), TokenKind::Access, Utc::now())
    }

    pub fn issue_refresh(&self, user_id: i32) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_at(user_id, None, TokenKind::Refresh, Utc::now())
    }

    pub fn issue_pair(
        &self,
        user_id: i32,
        username: &str,
    ) -> Result<TokenPair, jsonwebtoken::errors::Error> {
        Ok(TokenPair {
            access_token: self.issue_access(user_id, username)?,
            refresh_token: self.issue_refresh(user_id)?,
            token_type: "bearer".to_string(),
        })
    }

    fn issue_at(
        &self,
        user_id: i32,
        username: Option<&str>,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let ttl = match kind {
            TokenKind::Access => self.settings.access_ttl,
            TokenKind::Refresh => self.settings.refresh_ttl,
        };
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.map(str::to_string),
            kind,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(self.settings.algorithm), &claims, &self.encoding_key)
    }

    /// Verify signature and expiry, then insist on the expected token kind.
    pub fn decode(&self, token: &str, expected: TokenKind) -> ShopResult<Claims> {
        let mut validation = Validation::new(self.settings.algorithm);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            tracing::debug!(error = %e, "token rejected");
            match e.kind() {
                ErrorKind::ExpiredSignature => ShopError::TokenExpired,
                ErrorKind::InvalidSignature => ShopError::InvalidToken("signature mismatch".to_string()),
                _ => ShopError::InvalidToken("malformed token".to_string()),
            }
        })?;

        if data.claims.kind != expected {
            return Err(ShopError::WrongTokenType {
                expected,
                found: data.claims.kind,
            });
        }
        Ok(data.claims)
    }

    /// Strip the `Bearer ` scheme from an Authorization header value.
    pub fn extract_from_header(header: &str) -> Option<&str> {
        header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}
