//! Server storage.
//!
//! Server writes that touch resources or ports run in one transaction:
//! the node's advisory lock is taken before reading its reservations, and
//! the global port lock is taken before reading used ports. Two placements
//! on the same node therefore cannot both pass the capacity check, and two
//! creations can never be handed the same external port. The template row
//! is read `FOR SHARE`, so its minimums cannot change under a placement.

use std::collections::BTreeMap;

use serde::Serialize;
use sm_id::{NodeId, ServerId, TemplateId, UserId};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::debug;

use super::capacity::{self, check_fit, check_template_minimums, Resources, TemplateMinimums};
use super::error::{is_foreign_key_violation, violated_constraint};
use super::ports::{self, first_free_ports, PortRange};
use super::users::User;
use super::DbError;

const SERVER_COLUMNS: &str =
    "id, name, container_name, template_id, env, cpu, disk, memory, port, node_id";

const DUPLICATE_NAME: &str = "Server with that name already exists";
const DUPLICATE_CONTAINER_NAME: &str = "Server with that container name already exists";

/// A game-server instance placed on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Server {
    pub id: ServerId,
    pub name: String,
    pub container_name: String,
    pub template_id: TemplateId,
    pub env: Option<BTreeMap<String, String>>,
    pub cpu: i32,
    pub disk: i32,
    pub memory: i32,
    /// Internal container port (as a string) to external port.
    pub port: BTreeMap<String, i32>,
    pub node_id: NodeId,
}

impl Server {
    pub fn resources(&self) -> Resources {
        Resources::new(self.cpu, self.disk, self.memory)
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Server {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let env: Option<Json<BTreeMap<String, String>>> = row.try_get("env")?;
        let port: Json<BTreeMap<String, i32>> = row.try_get("port")?;

        Ok(Self {
            id: ServerId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            container_name: row.try_get("container_name")?,
            template_id: TemplateId::new(row.try_get("template_id")?),
            env: env.map(|e| e.0),
            cpu: row.try_get("cpu")?,
            disk: row.try_get("disk")?,
            memory: row.try_get("memory")?,
            port: port.0,
            node_id: NodeId::new(row.try_get("node_id")?),
        })
    }
}

/// Input for creating a server.
#[derive(Debug, Clone)]
pub struct NewServer {
    pub name: String,
    pub container_name: String,
    pub template_id: TemplateId,
    pub node_id: NodeId,
    pub env: Option<BTreeMap<String, String>>,
    pub cpu: i32,
    pub disk: i32,
    pub memory: i32,
    /// User linked to the server on creation.
    pub creator: Option<UserId>,
}

impl NewServer {
    fn resources(&self) -> Resources {
        Resources::new(self.cpu, self.disk, self.memory)
    }
}

/// Partial server update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ServerUpdate {
    pub env: Option<BTreeMap<String, String>>,
    pub cpu: Option<i32>,
    pub disk: Option<i32>,
    pub memory: Option<i32>,
}

impl ServerUpdate {
    pub fn changes_resources(&self) -> bool {
        self.cpu.is_some() || self.disk.is_some() || self.memory.is_some()
    }

    /// Resources after applying this update to `server`.
    pub fn resources_for(&self, server: &Server) -> Resources {
        Resources::new(
            self.cpu.unwrap_or(server.cpu),
            self.disk.unwrap_or(server.disk),
            self.memory.unwrap_or(server.memory),
        )
    }
}

/// Store for servers and their user links.
#[derive(Clone)]
pub struct ServerStore {
    pool: PgPool,
    port_range: PortRange,
}

impl ServerStore {
    pub fn new(pool: PgPool, port_range: PortRange) -> Self {
        Self { pool, port_range }
    }

    /// Create a server, reserve its resources and allocate its ports.
    ///
    /// One external port is allocated per distinct template `exposed_port`.
    pub async fn create(&self, input: NewServer) -> Result<Server, DbError> {
        let mut tx = self.pool.begin().await?;

        let template: Option<(Json<Vec<i32>>, Option<i32>, Option<i32>, Option<i32>)> =
            sqlx::query_as(
                r#"
                SELECT exposed_port, resource_min_cpu, resource_min_disk, resource_min_mem
                FROM templates
                WHERE id = $1
                FOR SHARE
                "#,
            )
            .bind(input.template_id.value())
            .fetch_optional(&mut *tx)
            .await?;
        let Some((Json(exposed), cpu, disk, memory)) = template else {
            return Err(DbError::not_found("template", input.template_id));
        };
        let violations =
            check_template_minimums(&TemplateMinimums { cpu, disk, memory }, input.resources());
        if !violations.is_empty() {
            return Err(DbError::BelowTemplateMinimum(violations));
        }

        lock_node(&mut tx, input.node_id).await?;
        let capacity = capacity::node_capacity(&mut *tx, input.node_id)
            .await?
            .ok_or_else(|| DbError::not_found("node", input.node_id))?;
        let reserved = capacity::reserved_on_node(&mut *tx, input.node_id, None).await?;
        if let Some(exceeded) = check_fit(input.node_id, capacity, reserved, input.resources()) {
            return Err(DbError::CapacityExceeded(exceeded));
        }

        let mut internal = Vec::new();
        for port in exposed {
            if !internal.contains(&port) {
                internal.push(port);
            }
        }

        ports::lock_allocation(&mut *tx).await?;
        let used = ports::used_ports(&mut *tx).await?;
        let external = first_free_ports(self.port_range, &used, internal.len())?;
        let port_map: BTreeMap<String, i32> = internal
            .iter()
            .zip(external)
            .map(|(internal, external)| (internal.to_string(), i32::from(external)))
            .collect();

        let sql = format!(
            r#"
            INSERT INTO servers (name, container_name, template_id, env, cpu, disk, memory, port, node_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {SERVER_COLUMNS}
            "#
        );
        let server = sqlx::query_as::<_, Server>(&sql)
            .bind(&input.name)
            .bind(&input.container_name)
            .bind(input.template_id.value())
            .bind(input.env.as_ref().map(Json))
            .bind(input.cpu)
            .bind(input.disk)
            .bind(input.memory)
            .bind(Json(&port_map))
            .bind(input.node_id.value())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| insert_error(e, &input))?;

        if let Some(creator) = input.creator {
            sqlx::query("INSERT INTO serveruserlink (server_id, user_id) VALUES ($1, $2)")
                .bind(server.id.value())
                .bind(creator.value())
                .execute(&mut *tx)
                .await
                .map_err(|e| DbError::from_write(e, "Creator account no longer exists"))?;
        }

        tx.commit().await?;

        debug!(
            server_id = %server.id,
            node_id = %server.node_id,
            ports = ?server.port,
            "Server created"
        );
        Ok(server)
    }

    pub async fn get(&self, id: ServerId) -> Result<Option<Server>, DbError> {
        let sql = format!("SELECT {SERVER_COLUMNS} FROM servers WHERE id = $1");
        let server = sqlx::query_as::<_, Server>(&sql)
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await?;
        Ok(server)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Server>, DbError> {
        let sql = format!("SELECT {SERVER_COLUMNS} FROM servers WHERE name = $1");
        let server = sqlx::query_as::<_, Server>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(server)
    }

    pub async fn list_all(&self) -> Result<Vec<Server>, DbError> {
        let sql = format!("SELECT {SERVER_COLUMNS} FROM servers ORDER BY id");
        let servers = sqlx::query_as::<_, Server>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(servers)
    }

    /// Servers the user is linked to.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Server>, DbError> {
        let sql = format!(
            r#"
            SELECT {SERVER_COLUMNS}
            FROM servers
            WHERE id IN (SELECT server_id FROM serveruserlink WHERE user_id = $1)
            ORDER BY id
            "#
        );
        let servers = sqlx::query_as::<_, Server>(&sql)
            .bind(user_id.value())
            .fetch_all(&self.pool)
            .await?;
        Ok(servers)
    }

    /// Server names mapped to ids, optionally limited to one user's links.
    pub async fn list_names(
        &self,
        linked_to: Option<UserId>,
    ) -> Result<BTreeMap<String, ServerId>, DbError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT name, id
            FROM servers
            WHERE $1::BIGINT IS NULL
               OR id IN (SELECT server_id FROM serveruserlink WHERE user_id = $1)
            "#,
        )
        .bind(linked_to.map(|id| id.value()))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, id)| (name, ServerId::new(id)))
            .collect())
    }

    /// Update env and/or resources. Resource changes are re-checked against
    /// the node's capacity, not counting the server's current reservation.
    pub async fn update(&self, id: ServerId, update: ServerUpdate) -> Result<Server, DbError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {SERVER_COLUMNS} FROM servers WHERE id = $1 FOR UPDATE");
        let current = sqlx::query_as::<_, Server>(&sql)
            .bind(id.value())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("server", id))?;

        if update.changes_resources() {
            let requested = update.resources_for(&current);
            let minimums = template_minimums(&mut tx, current.template_id).await?;
            let violations = check_template_minimums(&minimums, requested);
            if !violations.is_empty() {
                return Err(DbError::BelowTemplateMinimum(violations));
            }

            lock_node(&mut tx, current.node_id).await?;
            let capacity = capacity::node_capacity(&mut *tx, current.node_id)
                .await?
                .ok_or_else(|| DbError::not_found("node", current.node_id))?;
            let reserved =
                capacity::reserved_on_node(&mut *tx, current.node_id, Some(id)).await?;
            if let Some(exceeded) = check_fit(current.node_id, capacity, reserved, requested) {
                return Err(DbError::CapacityExceeded(exceeded));
            }
        }

        let sql = format!(
            r#"
            UPDATE servers SET
                env = COALESCE($2, env),
                cpu = COALESCE($3, cpu),
                disk = COALESCE($4, disk),
                memory = COALESCE($5, memory)
            WHERE id = $1
            RETURNING {SERVER_COLUMNS}
            "#
        );
        let server = sqlx::query_as::<_, Server>(&sql)
            .bind(id.value())
            .bind(update.env.map(Json))
            .bind(update.cpu)
            .bind(update.disk)
            .bind(update.memory)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(server)
    }

    /// Delete a server. Its links cascade; its ports become free.
    pub async fn delete(&self, id: ServerId) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM servers WHERE id = $1")
            .bind(id.value())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("server", id));
        }
        Ok(())
    }

    /// Grant a user access to a server. Granting twice is a no-op.
    pub async fn add_user(&self, server_id: ServerId, user_id: UserId) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO serveruserlink (server_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(server_id.value())
        .bind(user_id.value())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_foreign_key_violation(&e) => {
                if self.get(server_id).await?.is_none() {
                    Err(DbError::not_found("server", server_id))
                } else {
                    Err(DbError::not_found("user", user_id))
                }
            }
            Err(e) => Err(DbError::Query(e)),
        }
    }

    /// Revoke a user's access. Returns `false` when no link existed.
    pub async fn remove_user(&self, server_id: ServerId, user_id: UserId) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM serveruserlink WHERE server_id = $1 AND user_id = $2")
            .bind(server_id.value())
            .bind(user_id.value())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Users linked to a server.
    pub async fn list_users(&self, server_id: ServerId) -> Result<Vec<User>, DbError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.username, u.disabled, u.admin, u.hashed_password
            FROM users u
            JOIN serveruserlink l ON l.user_id = u.id
            WHERE l.server_id = $1
            ORDER BY u.id
            "#,
        )
        .bind(server_id.value())
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    pub async fn user_has_access(&self, server_id: ServerId, user_id: UserId) -> Result<bool, DbError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM serveruserlink WHERE server_id = $1 AND user_id = $2)",
        )
        .bind(server_id.value())
        .bind(user_id.value())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// The `count` lowest external ports not mapped by any server.
    pub async fn unused_ports(&self, count: usize) -> Result<Vec<u16>, DbError> {
        let used = ports::used_ports(&self.pool).await?;
        first_free_ports(self.port_range, &used, count)
    }

    pub fn port_range(&self) -> PortRange {
        self.port_range
    }
}

/// Map a failed server INSERT to the constraint that rejected it.
fn insert_error(err: sqlx::Error, input: &NewServer) -> DbError {
    match violated_constraint(&err) {
        Some("servers_name_key") => DbError::Conflict(DUPLICATE_NAME.to_string()),
        Some("servers_container_name_key") => {
            DbError::Conflict(DUPLICATE_CONTAINER_NAME.to_string())
        }
        Some("servers_node_id_fkey") => DbError::not_found("node", input.node_id),
        Some("servers_template_id_fkey") => DbError::not_found("template", input.template_id),
        _ => DbError::from_write(err, "Server conflicts with an existing row"),
    }
}

async fn template_minimums(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    template_id: TemplateId,
) -> Result<TemplateMinimums, DbError> {
    let row: Option<(Option<i32>, Option<i32>, Option<i32>)> = sqlx::query_as(
        r#"
        SELECT resource_min_cpu, resource_min_disk, resource_min_mem
        FROM templates
        WHERE id = $1
        FOR SHARE
        "#,
    )
    .bind(template_id.value())
    .fetch_optional(&mut **tx)
    .await?;

    let (cpu, disk, memory) = row.ok_or_else(|| DbError::not_found("template", template_id))?;
    Ok(TemplateMinimums { cpu, disk, memory })
}

async fn lock_node(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    node_id: NodeId,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(node_id.value())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> Server {
        Server {
            id: ServerId::new(1),
            name: "survival".into(),
            container_name: "sm-survival".into(),
            template_id: TemplateId::new(1),
            env: None,
            cpu: 2,
            disk: 20,
            memory: 4096,
            port: BTreeMap::from([("25565".to_string(), 30000)]),
            node_id: NodeId::new(1),
        }
    }

    #[test]
    fn test_update_without_resources() {
        let update = ServerUpdate {
            env: Some(BTreeMap::from([("MOTD".into(), "hi".into())])),
            ..Default::default()
        };
        assert!(!update.changes_resources());
        assert_eq!(update.resources_for(&server()), server().resources());
    }

    #[test]
    fn test_update_resources_merge_with_current() {
        let update = ServerUpdate {
            memory: Some(8192),
            ..Default::default()
        };
        assert!(update.changes_resources());
        assert_eq!(update.resources_for(&server()), Resources::new(2, 20, 8192));
    }

    #[test]
    fn test_server_serializes_port_map_and_null_env() {
        let json = serde_json::to_value(server()).unwrap();
        assert_eq!(json["port"]["25565"], 30000);
        assert!(json["env"].is_null());
        assert_eq!(json["template_id"], 1);
    }
}
