//! Token generation, hashing and validation.
//!
//! Token format:
//! - Access token: `smat_<32 random bytes, base64url without padding>`
//! - Refresh token: `smrt_<32 random bytes, base64url without padding>`
//!
//! Both are stored as SHA-256 digests. Refresh tokens are single use: every
//! exchange revokes the presented token, along with the access tokens issued
//! from it, and hands out a fresh pair.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use sm_id::UserId;
use sqlx::postgres::{PgConnection, PgPool, PgRow};
use sqlx::Row;

use super::AuthError;

pub const ACCESS_TOKEN_PREFIX: &str = "smat_";
pub const REFRESH_TOKEN_PREFIX: &str = "smrt_";

pub const REFRESH_TOKEN_LIFETIME_DAYS: i64 = 30;

/// Token bytes (32 bytes = 256 bits of entropy).
const TOKEN_BYTES: usize = 32;

fn generate_token_with_prefix(prefix: &str) -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    format!("{}{}", prefix, URL_SAFE_NO_PAD.encode(bytes))
}

/// Generate a new access token.
pub fn generate_access_token() -> String {
    generate_token_with_prefix(ACCESS_TOKEN_PREFIX)
}

/// Generate a new refresh token.
pub fn generate_refresh_token() -> String {
    generate_token_with_prefix(REFRESH_TOKEN_PREFIX)
}

/// Hash a token for storage using SHA-256, as lowercase hex.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{:x}", digest)
}

/// A freshly issued token. `token` is only ever available here.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// An access token together with the refresh token it can be renewed with.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// A token that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    pub token_id: String,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
struct TokenRow {
    token_id: String,
    user_id: i64,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for TokenRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            token_id: row.try_get("token_id")?,
            user_id: row.try_get("user_id")?,
            expires_at: row.try_get("expires_at")?,
            revoked_at: row.try_get("revoked_at")?,
        })
    }
}

impl TokenRow {
    fn check(&self) -> Result<(), AuthError> {
        if self.revoked_at.is_some() {
            return Err(AuthError::TokenRevoked);
        }
        if self.expires_at < Utc::now() {
            return Err(AuthError::TokenExpired);
        }
        Ok(())
    }
}

/// Store for access and refresh tokens.
#[derive(Clone)]
pub struct TokenStore {
    pool: PgPool,
}

impl TokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Issue a token for `user_id` valid for `lifetime`.
    pub async fn create(&self, user_id: UserId, lifetime: Duration) -> Result<IssuedToken, AuthError> {
        let mut conn = self.pool.acquire().await?;
        let issued = insert_access_token(&mut conn, user_id, lifetime, None).await?;
        Ok(issued)
    }

    /// Issue an access token and a refresh token for a fresh login.
    pub async fn create_session(
        &self,
        user_id: UserId,
        access_lifetime: Duration,
    ) -> Result<Session, AuthError> {
        let mut tx = self.pool.begin().await?;
        let refresh = insert_refresh_token(&mut tx, user_id, None).await?;
        let access =
            insert_access_token(&mut tx, user_id, access_lifetime, Some(&refresh.token_id)).await?;
        tx.commit().await?;

        Ok(Session {
            user_id,
            access,
            refresh,
        })
    }

    /// Look up and validate a presented access token.
    pub async fn validate(&self, token: &str) -> Result<ValidatedToken, AuthError> {
        if !token.starts_with(ACCESS_TOKEN_PREFIX) {
            return Err(AuthError::InvalidToken);
        }

        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT token_id, user_id, expires_at, revoked_at
            FROM access_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(AuthError::InvalidToken);
        };
        row.check()?;

        Ok(ValidatedToken {
            token_id: row.token_id,
            user_id: UserId::new(row.user_id),
            expires_at: row.expires_at,
        })
    }

    /// Exchange a refresh token for a new session.
    ///
    /// The presented token and the access tokens issued from it are revoked
    /// in the same transaction that creates the replacements. Disabled
    /// accounts cannot refresh.
    pub async fn rotate(&self, token: &str, access_lifetime: Duration) -> Result<Session, AuthError> {
        if !token.starts_with(REFRESH_TOKEN_PREFIX) {
            return Err(AuthError::InvalidToken);
        }

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT token_id, user_id, expires_at, revoked_at
            FROM refresh_tokens
            WHERE token_hash = $1
            FOR UPDATE
            "#,
        )
        .bind(hash_token(token))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(AuthError::InvalidToken);
        };
        row.check()?;

        let disabled: Option<(bool,)> = sqlx::query_as("SELECT disabled FROM users WHERE id = $1")
            .bind(row.user_id)
            .fetch_optional(&mut *tx)
            .await?;
        match disabled {
            None => return Err(AuthError::InvalidToken),
            Some((true,)) => return Err(AuthError::AccountDisabled),
            Some((false,)) => {}
        }

        revoke_refresh_family(&mut tx, &row.token_id).await?;

        let user_id = UserId::new(row.user_id);
        let refresh = insert_refresh_token(&mut tx, user_id, Some(&row.token_id)).await?;
        let access =
            insert_access_token(&mut tx, user_id, access_lifetime, Some(&refresh.token_id)).await?;
        tx.commit().await?;

        Ok(Session {
            user_id,
            access,
            refresh,
        })
    }

    /// Revoke an access token. Returns `false` when it was unknown or already revoked.
    pub async fn revoke(&self, token: &str) -> Result<bool, AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE access_tokens
            SET revoked_at = now()
            WHERE token_hash = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(hash_token(token))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Revoke a refresh token and the access tokens issued from it.
    pub async fn revoke_refresh(&self, token: &str) -> Result<bool, AuthError> {
        let mut tx = self.pool.begin().await?;

        let token_id: Option<(String,)> =
            sqlx::query_as("SELECT token_id FROM refresh_tokens WHERE token_hash = $1")
                .bind(hash_token(token))
                .fetch_optional(&mut *tx)
                .await?;
        let Some((token_id,)) = token_id else {
            return Ok(false);
        };

        let revoked = revoke_refresh_family(&mut tx, &token_id).await?;
        tx.commit().await?;
        Ok(revoked)
    }
}

async fn insert_access_token(
    conn: &mut PgConnection,
    user_id: UserId,
    lifetime: Duration,
    refresh_token_id: Option<&str>,
) -> Result<IssuedToken, sqlx::Error> {
    let token = generate_access_token();
    let token_id = format!("at_{}", sm_id::Ulid::new());
    let expires_at = Utc::now() + lifetime;

    sqlx::query(
        r#"
        INSERT INTO access_tokens (token_id, token_hash, user_id, expires_at, refresh_token_id)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&token_id)
    .bind(hash_token(&token))
    .bind(user_id.value())
    .bind(expires_at)
    .bind(refresh_token_id)
    .execute(&mut *conn)
    .await?;

    Ok(IssuedToken {
        token,
        token_id,
        expires_at,
    })
}

async fn insert_refresh_token(
    conn: &mut PgConnection,
    user_id: UserId,
    previous_token_id: Option<&str>,
) -> Result<IssuedToken, sqlx::Error> {
    let token = generate_refresh_token();
    let token_id = format!("rt_{}", sm_id::Ulid::new());
    let expires_at = Utc::now() + Duration::days(REFRESH_TOKEN_LIFETIME_DAYS);

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (token_id, token_hash, user_id, previous_token_id, expires_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&token_id)
    .bind(hash_token(&token))
    .bind(user_id.value())
    .bind(previous_token_id)
    .bind(expires_at)
    .execute(&mut *conn)
    .await?;

    Ok(IssuedToken {
        token,
        token_id,
        expires_at,
    })
}

/// Revoke a refresh token by id and every access token issued from it.
/// Returns `false` when the refresh token was already revoked.
async fn revoke_refresh_family(conn: &mut PgConnection, token_id: &str) -> Result<bool, sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE access_tokens
        SET revoked_at = now()
        WHERE refresh_token_id = $1 AND revoked_at IS NULL
        "#,
    )
    .bind(token_id)
    .execute(&mut *conn)
    .await?;

    let result = sqlx::query(
        r#"
        UPDATE refresh_tokens
        SET revoked_at = now()
        WHERE token_id = $1 AND revoked_at IS NULL
        "#,
    )
    .bind(token_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Revoke every live access and refresh token of a user on `conn`, so the
/// caller can fold it into a larger transaction. Returns the number of
/// access tokens revoked.
pub async fn revoke_user_tokens(conn: &mut PgConnection, user_id: UserId) -> Result<u64, sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE refresh_tokens
        SET revoked_at = now()
        WHERE user_id = $1 AND revoked_at IS NULL
        "#,
    )
    .bind(user_id.value())
    .execute(&mut *conn)
    .await?;

    let result = sqlx::query(
        r#"
        UPDATE access_tokens
        SET revoked_at = now()
        WHERE user_id = $1 AND revoked_at IS NULL
        "#,
    )
    .bind(user_id.value())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_token_format() {
        let token = generate_access_token();
        assert!(token.starts_with(ACCESS_TOKEN_PREFIX));
        // base64url of 32 bytes without padding is 43 characters
        assert_eq!(token.len(), ACCESS_TOKEN_PREFIX.len() + 43);
        assert!(!token.contains('='));
    }

    #[test]
    fn test_refresh_token_format() {
        let token = generate_refresh_token();
        assert!(token.starts_with(REFRESH_TOKEN_PREFIX));
        assert_eq!(token.len(), REFRESH_TOKEN_PREFIX.len() + 43);
        assert!(!token.starts_with(ACCESS_TOKEN_PREFIX));
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(generate_access_token(), generate_access_token());
        assert_ne!(generate_refresh_token(), generate_refresh_token());
    }

    #[test]
    fn test_hash_token_is_hex_sha256() {
        let hash = hash_token("smat_example");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_token("smat_example"));
        assert_ne!(hash, hash_token("smat_other"));
    }

    #[test]
    fn test_expired_and_revoked_rows_fail_check() {
        let live = TokenRow {
            token_id: "rt_1".into(),
            user_id: 1,
            expires_at: Utc::now() + Duration::minutes(5),
            revoked_at: None,
        };
        assert!(live.check().is_ok());

        let expired = TokenRow {
            expires_at: Utc::now() - Duration::seconds(1),
            ..live
        };
        assert!(matches!(expired.check(), Err(AuthError::TokenExpired)));

        let revoked = TokenRow {
            revoked_at: Some(Utc::now()),
            ..expired
        };
        assert!(matches!(revoked.check(), Err(AuthError::TokenRevoked)));
    }
}
