//! Authentication: password hashing and opaque tokens.
//!
//! Passwords are stored as Argon2id PHC strings. Access and refresh tokens
//! are random strings handed to the client once; only their SHA-256 digest
//! is persisted.

mod passwords;
mod tokens;

pub use passwords::{hash_password, verify_password};
pub use tokens::{
    generate_access_token, generate_refresh_token, hash_token, revoke_user_tokens, IssuedToken,
    Session, TokenStore, ValidatedToken, ACCESS_TOKEN_PREFIX, REFRESH_TOKEN_LIFETIME_DAYS,
    REFRESH_TOKEN_PREFIX,
};

use std::sync::LazyLock;

use thiserror::Error;

use crate::db::{DbError, User, UserStore};

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown username or wrong password. The two are deliberately not
    /// distinguished.
    #[error("incorrect username or password")]
    InvalidCredentials,

    #[error("invalid or unknown token")]
    InvalidToken,

    #[error("token has expired")]
    TokenExpired,

    #[error("token has been revoked")]
    TokenRevoked,

    #[error("account is disabled")]
    AccountDisabled,

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(DbError::Query(err))
    }
}

/// Hash checked for unknown usernames, so both failure paths pay the same
/// Argon2 cost.
static UNKNOWN_USER_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("unknown-user-placeholder").ok());

/// Check a username/password pair. Returns the user when the password
/// verifies; disabled accounts are returned too and rejected by the caller.
pub async fn authenticate(
    users: &UserStore,
    username: &str,
    password: &str,
) -> Result<User, AuthError> {
    let Some(user) = users.get_by_username(username).await? else {
        if let Some(hash) = UNKNOWN_USER_HASH.as_deref() {
            let _ = verify_password(password, hash);
        }
        return Err(AuthError::InvalidCredentials);
    };

    if !verify_password(password, &user.hashed_password) {
        return Err(AuthError::InvalidCredentials);
    }

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_user_hash_is_a_real_hash() {
        let hash = UNKNOWN_USER_HASH.as_deref().unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(!verify_password("admin", hash));
        assert!(!verify_password("", hash));
    }
}
