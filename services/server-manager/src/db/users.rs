//! User account storage.

use std::collections::BTreeMap;

use serde::Serialize;
use sm_id::UserId;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use super::DbError;
use crate::auth::revoke_user_tokens;

const USER_COLUMNS: &str = "id, username, disabled, admin, hashed_password";

/// Id reserved for the bootstrap admin account.
pub const BOOTSTRAP_ADMIN_ID: UserId = UserId::new(1);

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub disabled: bool,
    pub admin: bool,
    #[serde(skip_serializing)]
    pub hashed_password: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: UserId::new(row.try_get("id")?),
            username: row.try_get("username")?,
            disabled: row.try_get("disabled")?,
            admin: row.try_get("admin")?,
            hashed_password: row.try_get("hashed_password")?,
        })
    }
}

/// Changes to an existing account. Absent fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub disabled: Option<bool>,
    pub admin: Option<bool>,
    /// Argon2 PHC string replacing the current password.
    pub hashed_password: Option<String>,
}

impl AccountUpdate {
    pub fn revokes_tokens(&self) -> bool {
        self.hashed_password.is_some() || self.disabled == Some(true)
    }
}

/// Result of [`UserStore::update_account`].
#[derive(Debug, Clone)]
pub struct UpdatedAccount {
    pub user: User,
    /// Access tokens revoked by the update, when it revoked any.
    pub revoked_tokens: Option<u64>,
}

/// Store for user accounts.
#[derive(Clone)]
pub struct UserStore {
    pool: PgPool,
}

impl UserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create an account. New accounts are never admins; promotion is a
    /// separate admin action.
    pub async fn create(
        &self,
        username: &str,
        hashed_password: &str,
        disabled: bool,
    ) -> Result<User, DbError> {
        let sql = format!(
            r#"
            INSERT INTO users (username, disabled, admin, hashed_password)
            VALUES ($1, $2, FALSE, $3)
            RETURNING {USER_COLUMNS}
            "#
        );

        sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .bind(disabled)
            .bind(hashed_password)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DbError::from_write(e, "Username already registered"))
    }

    pub async fn get(&self, id: UserId) -> Result<Option<User>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Resolve a username to its id.
    pub async fn lookup_username(&self, username: &str) -> Result<Option<UserId>, DbError> {
        let id: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id.map(|(id,)| UserId::new(id)))
    }

    pub async fn list(&self) -> Result<Vec<User>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
        let users = sqlx::query_as::<_, User>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    /// Usernames mapped to their ids.
    pub async fn list_names(&self) -> Result<BTreeMap<String, UserId>, DbError> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT username, id FROM users")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(name, id)| (name, UserId::new(id)))
            .collect())
    }

    /// Apply flag and password changes in one transaction.
    ///
    /// Setting a password or disabling the account revokes every access and
    /// refresh token of the user before the transaction commits.
    pub async fn update_account(
        &self,
        id: UserId,
        update: AccountUpdate,
    ) -> Result<UpdatedAccount, DbError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE users SET
                disabled = COALESCE($2, disabled),
                admin = COALESCE($3, admin),
                hashed_password = COALESCE($4, hashed_password)
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id.value())
            .bind(update.disabled)
            .bind(update.admin)
            .bind(update.hashed_password.as_deref())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("user", id))?;

        let revoked_tokens = if update.revokes_tokens() {
            Some(revoke_user_tokens(&mut tx, id).await?)
        } else {
            None
        };

        tx.commit().await?;
        Ok(UpdatedAccount {
            user,
            revoked_tokens,
        })
    }

    /// Delete an account. Links and tokens cascade.
    pub async fn delete(&self, id: UserId) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.value())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("user", id));
        }
        Ok(())
    }

    /// Make sure the bootstrap admin exists with id 1.
    ///
    /// Returns `true` when the account was created by this call. An existing
    /// row (id 1 or the same username) is left untouched.
    pub async fn ensure_admin(
        &self,
        username: &str,
        hashed_password: &str,
    ) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await?;

        let created: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO users (id, username, disabled, admin, hashed_password)
            VALUES ($1, $2, FALSE, TRUE, $3)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(BOOTSTRAP_ADMIN_ID.value())
        .bind(username)
        .bind(hashed_password)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            "SELECT setval(pg_get_serial_sequence('users', 'id'), GREATEST((SELECT MAX(id) FROM users), 1))",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_is_never_serialized() {
        let user = User {
            id: UserId::new(2),
            username: "alice".into(),
            disabled: false,
            admin: false,
            hashed_password: "$argon2id$v=19$...".into(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["username"], "alice");
        assert_eq!(json["id"], 2);
        assert!(json.get("hashed_password").is_none());
    }

    #[test]
    fn test_only_password_or_disable_revokes_tokens() {
        assert!(!AccountUpdate::default().revokes_tokens());
        assert!(!AccountUpdate {
            disabled: Some(false),
            admin: Some(true),
            ..Default::default()
        }
        .revokes_tokens());
        assert!(AccountUpdate {
            disabled: Some(true),
            ..Default::default()
        }
        .revokes_tokens());
        assert!(AccountUpdate {
            hashed_password: Some("$argon2id$...".into()),
            ..Default::default()
        }
        .revokes_tokens());
    }

    #[test]
    fn test_bootstrap_admin_id() {
        assert_eq!(BOOTSTRAP_ADMIN_ID.value(), 1);
    }
}
