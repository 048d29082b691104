//! Server commands.

use std::collections::BTreeMap;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use sm_id::{NodeId, ServerId, TemplateId, UserId};
use tabled::Tabled;

use crate::output::{join_or_dash, print_list, print_single, print_success, OutputFormat};
use crate::resolve;

use super::{parse_key_values, CommandContext};

#[derive(Debug, Args)]
pub struct ServersCommand {
    #[command(subcommand)]
    command: ServersSubcommand,
}

#[derive(Debug, Subcommand)]
enum ServersSubcommand {
    /// List servers visible to you.
    List,

    /// Show one server.
    Get {
        /// Server ID or name.
        server: String,
    },

    /// Create a server on a node from a template.
    Create(CreateServerArgs),

    /// Delete a server and release its ports.
    Delete {
        /// Server ID or name.
        server: String,
    },

    /// Show free external ports.
    Ports {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },

    /// Give a user access to a server.
    Grant {
        /// Server ID or name.
        server: String,
        /// User ID or username.
        user: String,
    },

    /// Take a user's access to a server away.
    Revoke {
        /// Server ID or name.
        server: String,
        /// User ID or username.
        user: String,
    },
}

#[derive(Debug, Args)]
struct CreateServerArgs {
    #[arg(long)]
    name: String,

    /// Template ID or name.
    #[arg(long)]
    template: String,

    /// Node ID or name.
    #[arg(long)]
    node: String,

    #[arg(long)]
    cpu: i32,

    #[arg(long)]
    disk: i32,

    #[arg(long)]
    memory: i32,

    /// Defaults to `sm-<name>` on the server.
    #[arg(long)]
    container_name: Option<String>,

    /// Environment overrides, as KEY=VALUE. Repeatable.
    #[arg(long = "env")]
    env: Vec<String>,
}

#[derive(Debug, Serialize)]
struct NewServer {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    container_name: Option<String>,
    template_id: TemplateId,
    node_id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    env: Option<BTreeMap<String, String>>,
    cpu: i32,
    disk: i32,
    memory: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Server {
    id: ServerId,
    name: String,
    container_name: String,
    template_id: TemplateId,
    #[serde(default)]
    env: Option<BTreeMap<String, String>>,
    cpu: i32,
    disk: i32,
    memory: i32,
    port: BTreeMap<String, i32>,
    node_id: NodeId,
}

#[derive(Debug, Deserialize)]
struct ListServersResponse {
    items: Vec<Server>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PortsResponse {
    items: Vec<u16>,
}

#[derive(Debug, Serialize)]
struct GrantRequest {
    user_id: UserId,
}

#[derive(Tabled)]
struct ServerRow {
    #[tabled(rename = "ID")]
    id: ServerId,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Node")]
    node_id: NodeId,
    #[tabled(rename = "Template")]
    template_id: TemplateId,
    #[tabled(rename = "CPU/Disk/Mem")]
    resources: String,
    #[tabled(rename = "Ports")]
    ports: String,
}

fn server_row(s: &Server) -> ServerRow {
    ServerRow {
        id: s.id,
        name: s.name.clone(),
        node_id: s.node_id,
        template_id: s.template_id,
        resources: format!("{}/{}/{}", s.cpu, s.disk, s.memory),
        ports: join_or_dash(port_mappings(&s.port)),
    }
}

/// `external->internal` pairs, ordered by external port.
fn port_mappings(port: &BTreeMap<String, i32>) -> Vec<String> {
    let mut pairs: Vec<(i32, &str)> = port
        .iter()
        .map(|(internal, external)| (*external, internal.as_str()))
        .collect();
    pairs.sort_unstable();
    pairs
        .into_iter()
        .map(|(external, internal)| format!("{external}->{internal}"))
        .collect()
}

impl ServersCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            ServersSubcommand::List => list(ctx).await,
            ServersSubcommand::Get { server } => get(ctx, &server).await,
            ServersSubcommand::Create(args) => create(ctx, args).await,
            ServersSubcommand::Delete { server } => delete(ctx, &server).await,
            ServersSubcommand::Ports { count } => ports(ctx, count).await,
            ServersSubcommand::Grant { server, user } => grant(ctx, &server, &user).await,
            ServersSubcommand::Revoke { server, user } => revoke(ctx, &server, &user).await,
        }
    }
}

async fn list(ctx: CommandContext) -> Result<()> {
    let response: ListServersResponse = ctx.client()?.get("/v1/servers").await?;
    print_list(&response.items, ctx.format, server_row);
    Ok(())
}

async fn get(ctx: CommandContext, ident: &str) -> Result<()> {
    let client = ctx.client()?;
    let id = resolve::server_id(&client, ident).await?;
    let server: Server = client.get(&format!("/v1/servers/{id}")).await?;
    print_single(&server);
    Ok(())
}

async fn create(ctx: CommandContext, args: CreateServerArgs) -> Result<()> {
    let client = ctx.client()?;
    let env = parse_key_values(&args.env)?;
    let body = NewServer {
        template_id: resolve::template_id(&client, &args.template).await?,
        node_id: resolve::node_id(&client, &args.node).await?,
        name: args.name,
        container_name: args.container_name,
        env: (!env.is_empty()).then_some(env),
        cpu: args.cpu,
        disk: args.disk,
        memory: args.memory,
    };

    let server: Server = client.post("/v1/servers", &body).await?;
    match ctx.format {
        OutputFormat::Json => print_single(&server),
        OutputFormat::Table => {
            print_success(&format!("Created server {} (id {}).", server.name, server.id));
            println!("  Ports: {}", join_or_dash(port_mappings(&server.port)));
        }
    }
    Ok(())
}

async fn delete(ctx: CommandContext, ident: &str) -> Result<()> {
    let client = ctx.client()?;
    let id = resolve::server_id(&client, ident).await?;
    client.delete(&format!("/v1/servers/{id}")).await?;
    print_success(&format!("Deleted server {ident}."));
    Ok(())
}

async fn ports(ctx: CommandContext, count: usize) -> Result<()> {
    let response: PortsResponse = ctx
        .client()?
        .get(&format!("/v1/servers/ports/available?count={count}"))
        .await?;
    match ctx.format {
        OutputFormat::Json => print_single(&response),
        OutputFormat::Table => println!("{}", join_or_dash(&response.items)),
    }
    Ok(())
}

async fn grant(ctx: CommandContext, server: &str, user: &str) -> Result<()> {
    let client = ctx.client()?;
    let server_id = resolve::server_id(&client, server).await?;
    let user_id = resolve::user_id(&client, user).await?;
    client
        .post_no_content(
            &format!("/v1/servers/{server_id}/users"),
            &GrantRequest { user_id },
        )
        .await?;
    print_success(&format!("Granted {user} access to {server}."));
    Ok(())
}

async fn revoke(ctx: CommandContext, server: &str, user: &str) -> Result<()> {
    let client = ctx.client()?;
    let server_id = resolve::server_id(&client, server).await?;
    let user_id = resolve::user_id(&client, user).await?;
    client
        .delete(&format!("/v1/servers/{server_id}/users/{user_id}"))
        .await?;
    print_success(&format!("Revoked {user}'s access to {server}."));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_mappings_sorted_by_external() {
        let port = BTreeMap::from([
            ("2457".to_string(), 30002),
            ("2456".to_string(), 30001),
        ]);
        assert_eq!(port_mappings(&port), vec!["30001->2456", "30002->2457"]);
    }

    #[test]
    fn test_new_server_omits_empty_options() {
        let body = NewServer {
            name: "survival".into(),
            container_name: None,
            template_id: TemplateId::new(1),
            node_id: NodeId::new(2),
            env: None,
            cpu: 2,
            disk: 10,
            memory: 2048,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "survival",
                "template_id": 1,
                "node_id": 2,
                "cpu": 2,
                "disk": 10,
                "memory": 2048
            })
        );
    }
}
