use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::{config::Config, entities::users};

const RESET_TOKEN_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
    Reset,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub kind: TokenKind,
    /// `users.password_version` at issue time.
    pub pwv: i32,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token signing failed: {0}")]
    Sign(jsonwebtoken::errors::Error),
    #[error("token is invalid or expired")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("expected a {expected:?} token")]
    WrongKind { expected: TokenKind },
}

/// Issues and verifies the three token kinds. Access and reset tokens share
/// the access secret; refresh tokens use their own.
pub struct TokenService {
    access_secret: String,
    refresh_secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(config: &Config) -> Self {
        Self {
            access_secret: config.jwt_access_secret.clone(),
            refresh_secret: config.jwt_refresh_secret.clone(),
            access_ttl: config.jwt_access_ttl,
            refresh_ttl: config.jwt_refresh_ttl,
        }
    }

    fn secret(&self, kind: TokenKind) -> &[u8] {
        match kind {
            TokenKind::Access | TokenKind::Reset => self.access_secret.as_bytes(),
            TokenKind::Refresh => self.refresh_secret.as_bytes(),
        }
    }

    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
            TokenKind::Reset => RESET_TOKEN_TTL,
        }
    }

    pub fn issue(&self, kind: TokenKind, user: &users::Model) -> Result<String, TokenError> {
        let iat = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl(kind).as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: user.uid.to_string(),
            email: user.email.clone(),
            role: user.role.clone(),
            kind,
            pwv: user.password_version,
            iat,
            exp: iat.saturating_add(ttl),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret(kind)),
        )
        .map_err(TokenError::Sign)
    }

    pub fn verify(&self, kind: TokenKind, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret(kind)),
            &Validation::default(),
        )?;
        if data.claims.kind != kind {
            return Err(TokenError::WrongKind { expected: kind });
        }
        Ok(data.claims)
    }
}

/// Tokens minted before the last password change or reset no longer count.
pub fn issued_before_password_change(claims: &Claims, user: &users::Model) -> bool {
    claims.pwv != user.password_version
}
