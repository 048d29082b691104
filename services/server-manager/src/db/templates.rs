//! Template storage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sm_id::TemplateId;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;

use super::capacity::TemplateMinimums;
use super::error::is_foreign_key_violation;
use super::DbError;

const TEMPLATE_COLUMNS: &str = r#"
    id, name, image, description, tags, default_env, user_env,
    exposed_port, exposed_volume,
    resource_min_cpu, resource_min_disk, resource_min_mem
"#;

/// A deployable game-server definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub image: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub default_env: BTreeMap<String, String>,
    pub user_env: BTreeMap<String, String>,
    pub exposed_port: Vec<i32>,
    pub exposed_volume: Vec<String>,
    pub resource_min_cpu: Option<i32>,
    pub resource_min_disk: Option<i32>,
    pub resource_min_mem: Option<i32>,
}

impl Template {
    pub fn minimums(&self) -> TemplateMinimums {
        TemplateMinimums {
            cpu: self.resource_min_cpu,
            disk: self.resource_min_disk,
            memory: self.resource_min_mem,
        }
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Template {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let tags: Json<Vec<String>> = row.try_get("tags")?;
        let default_env: Json<BTreeMap<String, String>> = row.try_get("default_env")?;
        let user_env: Json<BTreeMap<String, String>> = row.try_get("user_env")?;
        let exposed_port: Json<Vec<i32>> = row.try_get("exposed_port")?;
        let exposed_volume: Json<Vec<String>> = row.try_get("exposed_volume")?;

        Ok(Self {
            id: TemplateId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            image: row.try_get("image")?,
            description: row.try_get("description")?,
            tags: tags.0,
            default_env: default_env.0,
            user_env: user_env.0,
            exposed_port: exposed_port.0,
            exposed_volume: exposed_volume.0,
            resource_min_cpu: row.try_get("resource_min_cpu")?,
            resource_min_disk: row.try_get("resource_min_disk")?,
            resource_min_mem: row.try_get("resource_min_mem")?,
        })
    }
}

/// Input for creating a template.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub default_env: BTreeMap<String, String>,
    #[serde(default)]
    pub user_env: BTreeMap<String, String>,
    #[serde(default)]
    pub exposed_port: Vec<i32>,
    #[serde(default)]
    pub exposed_volume: Vec<String>,
    #[serde(default)]
    pub resource_min_cpu: Option<i32>,
    #[serde(default)]
    pub resource_min_disk: Option<i32>,
    #[serde(default)]
    pub resource_min_mem: Option<i32>,
}

/// Partial template update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateUpdate {
    pub name: Option<String>,
    pub image: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub default_env: Option<BTreeMap<String, String>>,
    pub user_env: Option<BTreeMap<String, String>>,
    pub exposed_port: Option<Vec<i32>>,
    pub exposed_volume: Option<Vec<String>>,
    pub resource_min_cpu: Option<i32>,
    pub resource_min_disk: Option<i32>,
    pub resource_min_mem: Option<i32>,
}

/// Store for templates.
#[derive(Clone)]
pub struct TemplateStore {
    pool: PgPool,
}

impl TemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, input: NewTemplate) -> Result<Template, DbError> {
        let sql = format!(
            r#"
            INSERT INTO templates (
                name, image, description, tags, default_env, user_env,
                exposed_port, exposed_volume,
                resource_min_cpu, resource_min_disk, resource_min_mem
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {TEMPLATE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Template>(&sql)
            .bind(&input.name)
            .bind(&input.image)
            .bind(&input.description)
            .bind(Json(&input.tags))
            .bind(Json(&input.default_env))
            .bind(Json(&input.user_env))
            .bind(Json(&input.exposed_port))
            .bind(Json(&input.exposed_volume))
            .bind(input.resource_min_cpu)
            .bind(input.resource_min_disk)
            .bind(input.resource_min_mem)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DbError::from_write(e, "Template with that name already exists"))
    }

    pub async fn get(&self, id: TemplateId) -> Result<Option<Template>, DbError> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = $1");
        let template = sqlx::query_as::<_, Template>(&sql)
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await?;
        Ok(template)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Template>, DbError> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE name = $1");
        let template = sqlx::query_as::<_, Template>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(template)
    }

    pub async fn list(&self) -> Result<Vec<Template>, DbError> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM templates ORDER BY id");
        let templates = sqlx::query_as::<_, Template>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(templates)
    }

    /// Template names mapped to their ids.
    pub async fn list_names(&self) -> Result<BTreeMap<String, TemplateId>, DbError> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT name, id FROM templates")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(name, id)| (name, TemplateId::new(id)))
            .collect())
    }

    /// Apply a partial update.
    ///
    /// The row is locked first so no server can be placed against the old
    /// minimums mid-update. Raising a minimum above what an existing server
    /// reserves is a `Conflict`.
    pub async fn update(
        &self,
        id: TemplateId,
        update: TemplateUpdate,
    ) -> Result<Template, DbError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = $1 FOR UPDATE");
        let current = sqlx::query_as::<_, Template>(&sql)
            .bind(id.value())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("template", id))?;

        let minimums = TemplateMinimums {
            cpu: update.resource_min_cpu.or(current.resource_min_cpu),
            disk: update.resource_min_disk.or(current.resource_min_disk),
            memory: update.resource_min_mem.or(current.resource_min_mem),
        };
        let below: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT name
            FROM servers
            WHERE template_id = $1
              AND (cpu < $2 OR disk < $3 OR memory < $4)
            ORDER BY id
            "#,
        )
        .bind(id.value())
        .bind(minimums.cpu)
        .bind(minimums.disk)
        .bind(minimums.memory)
        .fetch_all(&mut *tx)
        .await?;
        if !below.is_empty() {
            let names: Vec<String> = below.into_iter().map(|(name,)| name).collect();
            return Err(DbError::Conflict(format!(
                "Servers reserve less than the new template minimums: {}",
                names.join(", ")
            )));
        }

        let sql = format!(
            r#"
            UPDATE templates SET
                name = COALESCE($2, name),
                image = COALESCE($3, image),
                description = COALESCE($4, description),
                tags = COALESCE($5, tags),
                default_env = COALESCE($6, default_env),
                user_env = COALESCE($7, user_env),
                exposed_port = COALESCE($8, exposed_port),
                exposed_volume = COALESCE($9, exposed_volume),
                resource_min_cpu = $10,
                resource_min_disk = $11,
                resource_min_mem = $12
            WHERE id = $1
            RETURNING {TEMPLATE_COLUMNS}
            "#
        );

        let template = sqlx::query_as::<_, Template>(&sql)
            .bind(id.value())
            .bind(update.name)
            .bind(update.image)
            .bind(update.description)
            .bind(update.tags.map(Json))
            .bind(update.default_env.map(Json))
            .bind(update.user_env.map(Json))
            .bind(update.exposed_port.map(Json))
            .bind(update.exposed_volume.map(Json))
            .bind(minimums.cpu)
            .bind(minimums.disk)
            .bind(minimums.memory)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| DbError::from_write(e, "Template with that name already exists"))?;

        tx.commit().await?;
        Ok(template)
    }

    /// Delete a template. Fails with `Conflict` while servers still use it.
    pub async fn delete(&self, id: TemplateId) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM templates WHERE id = $1")
            .bind(id.value())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    DbError::Conflict("Template is used by existing servers".to_string())
                } else {
                    DbError::Query(e)
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("template", id));
        }
        Ok(())
    }
}
