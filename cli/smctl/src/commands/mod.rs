//! CLI commands.

mod auth;
mod nodes;
mod servers;
mod templates;
mod users;

use std::collections::BTreeMap;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::client::ApiClient;
use crate::config::{Config, Credentials};
use crate::output::OutputFormat;

/// smctl - Manage game servers, nodes and templates on server-manager.
#[derive(Debug, Parser)]
#[command(name = "smctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// server-manager API URL. Overrides the saved config.
    #[arg(long, global = true, env = "SM_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Log in, log out and inspect the current session.
    Auth(auth::AuthCommand),

    /// Manage container templates.
    Templates(templates::TemplatesCommand),

    /// Manage hosting nodes.
    Nodes(nodes::NodesCommand),

    /// Manage game servers.
    Servers(servers::ServersCommand),

    /// Manage user accounts (admin).
    Users(users::UsersCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = Config::load()?;
        let credentials = Credentials::load()?;

        let api_url = self
            .api_url
            .clone()
            .or_else(|| credentials.as_ref().and_then(|c| c.api_url.clone()))
            .unwrap_or_else(|| config.api_url.clone());

        let ctx = CommandContext {
            api_url,
            credentials,
            format: self.format,
        };

        match self.command {
            Commands::Auth(cmd) => cmd.run(ctx).await,
            Commands::Templates(cmd) => cmd.run(ctx).await,
            Commands::Nodes(cmd) => cmd.run(ctx).await,
            Commands::Servers(cmd) => cmd.run(ctx).await,
            Commands::Users(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("smctl {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub api_url: String,
    pub credentials: Option<Credentials>,
    pub format: OutputFormat,
}

impl CommandContext {
    /// API client carrying the saved token, if any.
    pub fn client(&self) -> Result<ApiClient> {
        ApiClient::new(&self.api_url, self.credentials.as_ref())
    }
}

/// Parse `KEY=VALUE` arguments into a map. A missing `=` gives an empty
/// value; later duplicates win.
pub fn parse_key_values(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').unwrap_or((pair.as_str(), ""));
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("Invalid KEY=VALUE argument '{pair}': key is empty");
        }
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parse_key_values() {
        let map = parse_key_values(&strings(&["EULA=TRUE", "MOTD=a=b", "FLAG", "EULA=FALSE"])).unwrap();
        assert_eq!(map["EULA"], "FALSE");
        assert_eq!(map["MOTD"], "a=b");
        assert_eq!(map["FLAG"], "");
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_parse_key_values_rejects_empty_key() {
        assert!(parse_key_values(&strings(&["=oops"])).is_err());
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from([
            "smctl",
            "--format",
            "json",
            "servers",
            "create",
            "--name",
            "survival",
            "--template",
            "minecraft",
            "--node",
            "1",
            "--cpu",
            "2",
            "--disk",
            "10",
            "--memory",
            "2048",
            "--env",
            "MOTD=hi",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
    }
}
