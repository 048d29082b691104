//! Resource accounting for server placement.
//!
//! A node's capacity is fixed (`cpus`, `disk`, `memory`). Every server on the
//! node reserves `cpu`, `disk` and `memory` against it. The sum of the
//! reservations may never exceed the capacity in any dimension. Templates may
//! additionally declare minimum resources that each server must meet.

use std::fmt;

use serde::Serialize;
use sm_id::{NodeId, ServerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceDimension {
    Cpu,
    Disk,
    Memory,
}

impl ResourceDimension {
    pub const ALL: [ResourceDimension; 3] = [Self::Cpu, Self::Disk, Self::Memory];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Disk => "disk",
            Self::Memory => "memory",
        }
    }
}

/// An amount of each resource. Sums are kept in `i64` so that adding up many
/// `INTEGER` reservations cannot overflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Resources {
    pub cpu: i64,
    pub disk: i64,
    pub memory: i64,
}

impl Resources {
    pub fn new(cpu: i32, disk: i32, memory: i32) -> Self {
        Self {
            cpu: i64::from(cpu),
            disk: i64::from(disk),
            memory: i64::from(memory),
        }
    }

    pub fn get(&self, dimension: ResourceDimension) -> i64 {
        match dimension {
            ResourceDimension::Cpu => self.cpu,
            ResourceDimension::Disk => self.disk,
            ResourceDimension::Memory => self.memory,
        }
    }

    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            cpu: (self.cpu - other.cpu).max(0),
            disk: (self.disk - other.disk).max(0),
            memory: (self.memory - other.memory).max(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityExceeded {
    pub node_id: NodeId,
    pub dimension: ResourceDimension,
    pub capacity: i64,
    pub reserved: i64,
    pub requested: i64,
}

impl fmt::Display for CapacityExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node {} {}: capacity={}, reserved={}, requested={}",
            self.node_id,
            self.dimension.as_str(),
            self.capacity,
            self.reserved,
            self.requested
        )
    }
}

/// Template-declared minimums. `None` means no minimum for that dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemplateMinimums {
    pub cpu: Option<i32>,
    pub disk: Option<i32>,
    pub memory: Option<i32>,
}

impl TemplateMinimums {
    fn get(&self, dimension: ResourceDimension) -> Option<i64> {
        match dimension {
            ResourceDimension::Cpu => self.cpu,
            ResourceDimension::Disk => self.disk,
            ResourceDimension::Memory => self.memory,
        }
        .map(i64::from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MinimumViolation {
    pub dimension: ResourceDimension,
    pub minimum: i64,
    pub requested: i64,
}

/// Check whether `requested` fits next to `reserved` on a node with
/// `capacity`. Returns the first dimension that would overflow.
pub fn check_fit(
    node_id: NodeId,
    capacity: Resources,
    reserved: Resources,
    requested: Resources,
) -> Option<CapacityExceeded> {
    ResourceDimension::ALL.into_iter().find_map(|dimension| {
        let capacity = capacity.get(dimension);
        let reserved = reserved.get(dimension);
        let requested = requested.get(dimension);
        if reserved + requested > capacity {
            Some(CapacityExceeded {
                node_id,
                dimension,
                capacity,
                reserved,
                requested,
            })
        } else {
            None
        }
    })
}

/// Every dimension in which `requested` is below the template minimum.
pub fn check_template_minimums(
    minimums: &TemplateMinimums,
    requested: Resources,
) -> Vec<MinimumViolation> {
    ResourceDimension::ALL
        .into_iter()
        .filter_map(|dimension| {
            let minimum = minimums.get(dimension)?;
            let requested = requested.get(dimension);
            (requested < minimum).then_some(MinimumViolation {
                dimension,
                minimum,
                requested,
            })
        })
        .collect()
}

/// Capacity of a node, or `None` when the node does not exist.
pub async fn node_capacity<'e, E>(executor: E, node_id: NodeId) -> Result<Option<Resources>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let row: Option<(i32, i32, i32)> =
        sqlx::query_as("SELECT cpus, disk, memory FROM nodes WHERE id = $1")
            .bind(node_id.value())
            .fetch_optional(executor)
            .await?;

    Ok(row.map(|(cpu, disk, memory)| Resources::new(cpu, disk, memory)))
}

/// Total reservations on a node, optionally ignoring one server (used when
/// resizing that server).
pub async fn reserved_on_node<'e, E>(
    executor: E,
    node_id: NodeId,
    exclude: Option<ServerId>,
) -> Result<Resources, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let (cpu, disk, memory): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(cpu), 0)::BIGINT,
               COALESCE(SUM(disk), 0)::BIGINT,
               COALESCE(SUM(memory), 0)::BIGINT
        FROM servers
        WHERE node_id = $1 AND ($2::BIGINT IS NULL OR id <> $2)
        "#,
    )
    .bind(node_id.value())
    .bind(exclude.map(|id| id.value()))
    .fetch_one(executor)
    .await?;

    Ok(Resources { cpu, disk, memory })
}
