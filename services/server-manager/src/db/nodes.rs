//! Node storage and usage accounting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sm_id::NodeId;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use super::capacity::{self, Resources};
use super::error::is_foreign_key_violation;
use super::DbError;

const NODE_COLUMNS: &str = "id, name, cpus, disk, memory, cpu_name, max_hz, arch";

/// A host with fixed hardware capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub cpus: i32,
    pub disk: i32,
    pub memory: i32,
    pub cpu_name: String,
    pub max_hz: i32,
    pub arch: String,
}

impl Node {
    pub fn capacity(&self) -> Resources {
        Resources::new(self.cpus, self.disk, self.memory)
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Node {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: NodeId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            cpus: row.try_get("cpus")?,
            disk: row.try_get("disk")?,
            memory: row.try_get("memory")?,
            cpu_name: row.try_get("cpu_name")?,
            max_hz: row.try_get("max_hz")?,
            arch: row.try_get("arch")?,
        })
    }
}

/// Input for registering a node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewNode {
    pub name: String,
    pub cpus: i32,
    pub disk: i32,
    pub memory: i32,
    #[serde(default)]
    pub cpu_name: String,
    #[serde(default)]
    pub max_hz: i32,
    #[serde(default)]
    pub arch: String,
}

/// Reserved versus available resources on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeUsage {
    pub node_id: NodeId,
    pub servers: i64,
    pub capacity: Resources,
    pub reserved: Resources,
    pub free: Resources,
}

/// Store for nodes.
#[derive(Clone)]
pub struct NodeStore {
    pool: PgPool,
}

impl NodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, input: NewNode) -> Result<Node, DbError> {
        let sql = format!(
            r#"
            INSERT INTO nodes (name, cpus, disk, memory, cpu_name, max_hz, arch)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {NODE_COLUMNS}
            "#
        );

        let node = sqlx::query_as::<_, Node>(&sql)
            .bind(&input.name)
            .bind(input.cpus)
            .bind(input.disk)
            .bind(input.memory)
            .bind(&input.cpu_name)
            .bind(input.max_hz)
            .bind(&input.arch)
            .fetch_one(&self.pool)
            .await?;
        Ok(node)
    }

    pub async fn get(&self, id: NodeId) -> Result<Option<Node>, DbError> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = $1");
        let node = sqlx::query_as::<_, Node>(&sql)
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await?;
        Ok(node)
    }

    pub async fn list(&self) -> Result<Vec<Node>, DbError> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY id");
        let nodes = sqlx::query_as::<_, Node>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(nodes)
    }

    /// Node names mapped to their ids. Node names are not unique; the highest
    /// id wins for duplicates.
    pub async fn list_names(&self) -> Result<BTreeMap<String, NodeId>, DbError> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT name, id FROM nodes ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(name, id)| (name, NodeId::new(id)))
            .collect())
    }

    /// Delete a node. Fails with `Conflict` while servers are placed on it.
    pub async fn delete(&self, id: NodeId) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM nodes WHERE id = $1")
            .bind(id.value())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    DbError::Conflict("Node still hosts servers".to_string())
                } else {
                    DbError::Query(e)
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("node", id));
        }
        Ok(())
    }

    pub async fn usage(&self, id: NodeId) -> Result<NodeUsage, DbError> {
        let node = self
            .get(id)
            .await?
            .ok_or_else(|| DbError::not_found("node", id))?;

        let reserved = capacity::reserved_on_node(&self.pool, id, None).await?;
        let (servers,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM servers WHERE node_id = $1")
            .bind(id.value())
            .fetch_one(&self.pool)
            .await?;

        let capacity = node.capacity();
        Ok(NodeUsage {
            node_id: id,
            servers,
            capacity,
            reserved,
            free: capacity.saturating_sub(&reserved),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_optional_hardware_fields() {
        let input: NewNode =
            serde_json::from_str(r#"{"name": "n1", "cpus": 4, "disk": 10, "memory": 2048}"#)
                .unwrap();
        assert_eq!(input.cpu_name, "");
        assert_eq!(input.max_hz, 0);
        assert_eq!(input.arch, "");
    }

    #[test]
    fn test_capacity_from_columns() {
        let node = Node {
            id: NodeId::new(3),
            name: "n".into(),
            cpus: 4,
            disk: 64,
            memory: 8192,
            cpu_name: String::new(),
            max_hz: 0,
            arch: "aarch64".into(),
        };
        assert_eq!(node.capacity(), Resources::new(4, 64, 8192));
    }
}
