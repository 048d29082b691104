//! External port allocation.
//!
//! Servers map each internal container port to one external port drawn from
//! a configured inclusive range. External ports are unique across servers.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use super::DbError;

/// Advisory lock key serialising port allocation. Node placement locks use
/// the (always positive) node id, so a negative key cannot collide.
pub(crate) const PORT_ALLOCATION_LOCK: i64 = -1;

/// Inclusive external port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    /// Number of ports in the range.
    pub fn size(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 30000,
            end: 30100,
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// The `count` lowest ports in `range` that are not in `used`.
pub fn first_free_ports(
    range: PortRange,
    used: &BTreeSet<u16>,
    count: usize,
) -> Result<Vec<u16>, DbError> {
    let free: Vec<u16> = (range.start..=range.end)
        .filter(|port| !used.contains(port))
        .take(count)
        .collect();

    if free.len() < count {
        return Err(DbError::PortsExhausted {
            requested: count,
            available: free.len(),
            start: range.start,
            end: range.end,
        });
    }

    Ok(free)
}

/// Every external port currently mapped by any server.
///
/// Values outside `u16` cannot be produced by allocation and are skipped.
pub async fn used_ports<'e, E>(executor: E) -> Result<BTreeSet<u16>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows: Vec<(i32,)> = sqlx::query_as(
        r#"
        SELECT (mapping.value)::INT
        FROM servers
        CROSS JOIN LATERAL jsonb_each_text(servers.port) AS mapping
        "#,
    )
    .fetch_all(executor)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(port,)| u16::try_from(port).ok())
        .collect())
}

/// Take the global port allocation lock for the current transaction.
pub(crate) async fn lock_allocation(conn: &mut sqlx::PgConnection) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(PORT_ALLOCATION_LOCK)
        .execute(conn)
        .await?;
    Ok(())
}
