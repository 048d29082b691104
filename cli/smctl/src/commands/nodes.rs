//! Node commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use sm_id::NodeId;
use tabled::Tabled;

use crate::output::{print_list, print_single, print_success, OutputFormat};
use crate::resolve;

use super::CommandContext;

#[derive(Debug, Args)]
pub struct NodesCommand {
    #[command(subcommand)]
    command: NodesSubcommand,
}

#[derive(Debug, Subcommand)]
enum NodesSubcommand {
    /// List nodes.
    List,

    /// Show one node.
    Get {
        /// Node ID or name.
        node: String,
    },

    /// Register a node (admin).
    Create(CreateNodeArgs),

    /// Delete a node that hosts no servers (admin).
    Delete {
        /// Node ID or name.
        node: String,
    },

    /// Show reserved and free resources on a node.
    Usage {
        /// Node ID or name.
        node: String,
    },
}

#[derive(Debug, Args, Serialize)]
struct CreateNodeArgs {
    #[arg(long)]
    name: String,

    #[arg(long)]
    cpus: i32,

    /// Disk capacity.
    #[arg(long)]
    disk: i32,

    /// Memory capacity.
    #[arg(long)]
    memory: i32,

    #[arg(long, default_value = "")]
    cpu_name: String,

    #[arg(long, default_value_t = 0)]
    max_hz: i32,

    #[arg(long, default_value = "")]
    arch: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Node {
    id: NodeId,
    name: String,
    cpus: i32,
    disk: i32,
    memory: i32,
    cpu_name: String,
    max_hz: i32,
    arch: String,
}

#[derive(Debug, Deserialize)]
struct ListNodesResponse {
    items: Vec<Node>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Resources {
    cpu: i64,
    disk: i64,
    memory: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeUsage {
    node_id: NodeId,
    servers: i64,
    capacity: Resources,
    reserved: Resources,
    free: Resources,
}

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "ID")]
    id: NodeId,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "CPUs")]
    cpus: i32,
    #[tabled(rename = "Disk")]
    disk: i32,
    #[tabled(rename = "Memory")]
    memory: i32,
    #[tabled(rename = "Arch")]
    arch: String,
}

fn node_row(n: &Node) -> NodeRow {
    NodeRow {
        id: n.id,
        name: n.name.clone(),
        cpus: n.cpus,
        disk: n.disk,
        memory: n.memory,
        arch: if n.arch.is_empty() {
            "-".to_string()
        } else {
            n.arch.clone()
        },
    }
}

#[derive(Tabled)]
struct UsageRow {
    #[tabled(rename = "Resource")]
    resource: &'static str,
    #[tabled(rename = "Capacity")]
    capacity: i64,
    #[tabled(rename = "Reserved")]
    reserved: i64,
    #[tabled(rename = "Free")]
    free: i64,
}

impl NodesCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            NodesSubcommand::List => list(ctx).await,
            NodesSubcommand::Get { node } => get(ctx, &node).await,
            NodesSubcommand::Create(args) => create(ctx, args).await,
            NodesSubcommand::Delete { node } => delete(ctx, &node).await,
            NodesSubcommand::Usage { node } => usage(ctx, &node).await,
        }
    }
}

async fn list(ctx: CommandContext) -> Result<()> {
    let response: ListNodesResponse = ctx.client()?.get("/v1/nodes").await?;
    print_list(&response.items, ctx.format, node_row);
    Ok(())
}

async fn get(ctx: CommandContext, ident: &str) -> Result<()> {
    let client = ctx.client()?;
    let id = resolve::node_id(&client, ident).await?;
    let node: Node = client.get(&format!("/v1/nodes/{id}")).await?;
    print_single(&node);
    Ok(())
}

async fn create(ctx: CommandContext, args: CreateNodeArgs) -> Result<()> {
    let node: Node = ctx.client()?.post("/v1/nodes", &args).await?;
    match ctx.format {
        OutputFormat::Json => print_single(&node),
        OutputFormat::Table => {
            print_success(&format!("Registered node {} (id {}).", node.name, node.id))
        }
    }
    Ok(())
}

async fn delete(ctx: CommandContext, ident: &str) -> Result<()> {
    let client = ctx.client()?;
    let id = resolve::node_id(&client, ident).await?;
    client.delete(&format!("/v1/nodes/{id}")).await?;
    print_success(&format!("Deleted node {ident}."));
    Ok(())
}

async fn usage(ctx: CommandContext, ident: &str) -> Result<()> {
    let client = ctx.client()?;
    let id = resolve::node_id(&client, ident).await?;
    let usage: NodeUsage = client.get(&format!("/v1/nodes/{id}/usage")).await?;

    match ctx.format {
        OutputFormat::Json => print_single(&usage),
        OutputFormat::Table => {
            println!("Node {} hosts {} server(s)", usage.node_id, usage.servers);
            let rows = [
                ("cpu", usage.capacity.cpu, usage.reserved.cpu, usage.free.cpu),
                ("disk", usage.capacity.disk, usage.reserved.disk, usage.free.disk),
                ("memory", usage.capacity.memory, usage.reserved.memory, usage.free.memory),
            ]
            .map(|(resource, capacity, reserved, free)| UsageRow {
                resource,
                capacity,
                reserved,
                free,
            });
            println!("{}", tabled::Table::new(rows));
        }
    }
    Ok(())
}
