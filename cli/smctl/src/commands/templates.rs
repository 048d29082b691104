//! Template commands.

use std::collections::BTreeMap;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use sm_id::TemplateId;
use tabled::Tabled;

use crate::output::{join_or_dash, print_list, print_single, print_success, OutputFormat};
use crate::resolve;

use super::{parse_key_values, CommandContext};

#[derive(Debug, Args)]
pub struct TemplatesCommand {
    #[command(subcommand)]
    command: TemplatesSubcommand,
}

#[derive(Debug, Subcommand)]
enum TemplatesSubcommand {
    /// List templates.
    List,

    /// Show one template.
    Get {
        /// Template ID or name.
        template: String,
    },

    /// Create a template (admin).
    Create(CreateTemplateArgs),

    /// Delete a template no server uses (admin).
    Delete {
        /// Template ID or name.
        template: String,
    },
}

#[derive(Debug, Args)]
struct CreateTemplateArgs {
    #[arg(long)]
    name: String,

    /// Container image reference.
    #[arg(long)]
    image: String,

    #[arg(long)]
    description: Option<String>,

    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Default environment, as KEY=VALUE. Repeatable.
    #[arg(long = "env")]
    default_env: Vec<String>,

    /// User-editable environment, as KEY=VALUE. Repeatable.
    #[arg(long = "user-env")]
    user_env: Vec<String>,

    /// Container port to expose. Repeatable.
    #[arg(long = "port")]
    exposed_port: Vec<u16>,

    /// Container path to persist. Repeatable.
    #[arg(long = "volume")]
    exposed_volume: Vec<String>,

    #[arg(long)]
    min_cpu: Option<i32>,

    #[arg(long)]
    min_disk: Option<i32>,

    #[arg(long)]
    min_mem: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Template {
    id: TemplateId,
    name: String,
    image: String,
    #[serde(default)]
    description: Option<String>,
    tags: Vec<String>,
    default_env: BTreeMap<String, String>,
    user_env: BTreeMap<String, String>,
    exposed_port: Vec<i32>,
    exposed_volume: Vec<String>,
    resource_min_cpu: Option<i32>,
    resource_min_disk: Option<i32>,
    resource_min_mem: Option<i32>,
}

#[derive(Debug, Serialize)]
struct NewTemplate {
    name: String,
    image: String,
    description: Option<String>,
    tags: Vec<String>,
    default_env: BTreeMap<String, String>,
    user_env: BTreeMap<String, String>,
    exposed_port: Vec<u16>,
    exposed_volume: Vec<String>,
    resource_min_cpu: Option<i32>,
    resource_min_disk: Option<i32>,
    resource_min_mem: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ListTemplatesResponse {
    items: Vec<Template>,
}

#[derive(Tabled)]
struct TemplateRow {
    #[tabled(rename = "ID")]
    id: TemplateId,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Ports")]
    ports: String,
    #[tabled(rename = "Min CPU/Disk/Mem")]
    minimums: String,
}

fn template_row(t: &Template) -> TemplateRow {
    let min = |v: Option<i32>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
    TemplateRow {
        id: t.id,
        name: t.name.clone(),
        image: t.image.clone(),
        ports: join_or_dash(&t.exposed_port),
        minimums: format!(
            "{}/{}/{}",
            min(t.resource_min_cpu),
            min(t.resource_min_disk),
            min(t.resource_min_mem)
        ),
    }
}

impl TemplatesCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            TemplatesSubcommand::List => list(ctx).await,
            TemplatesSubcommand::Get { template } => get(ctx, &template).await,
            TemplatesSubcommand::Create(args) => create(ctx, args).await,
            TemplatesSubcommand::Delete { template } => delete(ctx, &template).await,
        }
    }
}

async fn list(ctx: CommandContext) -> Result<()> {
    let response: ListTemplatesResponse = ctx.client()?.get("/v1/templates").await?;
    print_list(&response.items, ctx.format, template_row);
    Ok(())
}

async fn get(ctx: CommandContext, ident: &str) -> Result<()> {
    let client = ctx.client()?;
    let id = resolve::template_id(&client, ident).await?;
    let template: Template = client.get(&format!("/v1/templates/{id}")).await?;
    print_single(&template);
    Ok(())
}

async fn create(ctx: CommandContext, args: CreateTemplateArgs) -> Result<()> {
    let body = NewTemplate {
        name: args.name,
        image: args.image,
        description: args.description,
        tags: args.tags,
        default_env: parse_key_values(&args.default_env)?,
        user_env: parse_key_values(&args.user_env)?,
        exposed_port: args.exposed_port,
        exposed_volume: args.exposed_volume,
        resource_min_cpu: args.min_cpu,
        resource_min_disk: args.min_disk,
        resource_min_mem: args.min_mem,
    };

    let template: Template = ctx.client()?.post("/v1/templates", &body).await?;
    match ctx.format {
        OutputFormat::Json => print_single(&template),
        OutputFormat::Table => print_success(&format!(
            "Created template {} (id {}).",
            template.name, template.id
        )),
    }
    Ok(())
}

async fn delete(ctx: CommandContext, ident: &str) -> Result<()> {
    let client = ctx.client()?;
    let id = resolve::template_id(&client, ident).await?;
    client.delete(&format!("/v1/templates/{id}")).await?;
    print_success(&format!("Deleted template {ident}."));
    Ok(())
}
