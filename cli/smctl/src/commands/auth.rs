//! Authentication commands.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use sm_id::UserId;

use crate::client::ApiClient;
use crate::config::Credentials;
use crate::output::{print_info, print_single, print_success, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct AuthCommand {
    #[command(subcommand)]
    command: AuthSubcommand,
}

#[derive(Debug, Subcommand)]
enum AuthSubcommand {
    /// Log in with a username and password.
    Login(LoginArgs),

    /// Revoke the saved token and forget it.
    Logout,

    /// Show the saved session.
    Status,

    /// Show the account the saved token belongs to.
    Whoami,
}

#[derive(Debug, Args)]
struct LoginArgs {
    #[arg(long, short)]
    username: String,

    /// Read from stdin when omitted.
    #[arg(long, env = "SM_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Seconds until expiry.
    expire_time: i64,
}

#[derive(Debug, Deserialize, Serialize)]
struct Me {
    id: UserId,
    username: String,
    disabled: bool,
    admin: bool,
}

impl AuthCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            AuthSubcommand::Login(args) => login(ctx, args).await,
            AuthSubcommand::Logout => logout(ctx).await,
            AuthSubcommand::Status => status(ctx),
            AuthSubcommand::Whoami => whoami(ctx).await,
        }
    }
}

async fn login(ctx: CommandContext, args: LoginArgs) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => prompt_password()?,
    };

    let client = ApiClient::new(&ctx.api_url, None)?;
    let token: TokenResponse = client
        .post(
            "/v1/system/token",
            &LoginRequest {
                username: &args.username,
                password: &password,
            },
        )
        .await?;

    let creds = Credentials {
        expires_at: Some(chrono::Utc::now() + chrono::Duration::seconds(token.expire_time)),
        username: Some(args.username.clone()),
        api_url: Some(ctx.api_url.clone()),
        ..Credentials::new(token.access_token)
    };
    creds.save()?;

    print_success(&format!("Logged in as {}.", args.username));
    Ok(())
}

fn prompt_password() -> Result<String> {
    print!("Password: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn logout(ctx: CommandContext) -> Result<()> {
    if ctx.credentials.is_some() {
        // The token may already be expired or revoked server-side.
        let client = ctx.client()?;
        if let Err(e) = client
            .post::<serde_json::Value, _>("/v1/system/revoke", &serde_json::json!({}))
            .await
        {
            print_info(&format!("Server did not revoke the token: {e}"));
        }
    }

    Credentials::delete()?;
    print_success("Logged out successfully.");
    Ok(())
}

fn status(ctx: CommandContext) -> Result<()> {
    match ctx.credentials {
        Some(creds) => {
            println!("{} Authenticated", "Status:".green().bold());

            if let Some(username) = &creds.username {
                println!("  Username: {}", username);
            }
            println!("  API: {}", ctx.api_url);

            if creds.is_expired() {
                println!(
                    "  {} Token has expired. Run `smctl auth login`.",
                    "Warning:".yellow()
                );
            } else if let Some(expires_at) = creds.expires_at {
                println!("  Expires: {}", expires_at);
            }
        }
        None => {
            println!("{} Not authenticated", "Status:".red().bold());
            println!("\nRun {} to log in.", "smctl auth login".cyan());
        }
    }

    Ok(())
}

async fn whoami(ctx: CommandContext) -> Result<()> {
    let client = ctx.client()?;
    let me: Me = client.get("/v1/system/me").await?;

    match ctx.format {
        OutputFormat::Json => print_single(&me),
        OutputFormat::Table => {
            let role = if me.admin { "admin" } else { "user" };
            println!("{} (id {}, {})", me.username, me.id, role);
        }
    }

    Ok(())
}
