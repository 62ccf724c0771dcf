//! Auth wire types.
//!
//! `Authenticate` is stateless: it accepts any non-empty username/password
//! pair and binds the username as the JWT subject. There's no account
//! database — user account management is out of scope, and nothing
//! downstream reads a role, so the claims stay minimal.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: usize,
}
