//! JWT issuance and validation for the bearer-token surface.

use crate::auth::models::Claims;
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

pub struct JwtHandler {
    secret: String,
    expiration_days: i64,
}

impl JwtHandler {
    pub fn new(secret: String, expiration_days: i64) -> Self {
        Self {
            secret,
            expiration_days,
        }
    }

    /// Binds `subject` (the accepted username) as the JWT `sub` claim.
    pub fn generate_token(&self, subject: &str) -> Result<(String, usize)> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(chrono::Duration::days(self.expiration_days))
            .context("invalid expiration timestamp")?
            .timestamp() as usize;
        let expires_in = (self.expiration_days * 86_400) as usize;

        let claims = Claims {
            sub: subject.to_string(),
            exp: expiration,
        };

        debug!(subject, expires_in, "generating bearer token");

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("failed to sign JWT")?;

        Ok((token, expires_in))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .context("invalid or expired token")?;

        debug!(subject = %decoded.claims.sub, "validated bearer token");
        Ok(decoded.claims)
    }
}
