//! User administration commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use sm_id::UserId;
use tabled::Tabled;

use crate::output::{print_list, print_single, print_success, OutputFormat};
use crate::resolve;

use super::CommandContext;

#[derive(Debug, Args)]
pub struct UsersCommand {
    #[command(subcommand)]
    command: UsersSubcommand,
}

#[derive(Debug, Subcommand)]
enum UsersSubcommand {
    /// List accounts.
    List,

    /// Allow an account to log in.
    Enable { user: String },

    /// Block an account and revoke its tokens.
    Disable { user: String },

    /// Grant admin rights.
    Promote { user: String },

    /// Remove admin rights.
    Demote { user: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct User {
    id: UserId,
    username: String,
    disabled: bool,
    admin: bool,
}

#[derive(Debug, Deserialize)]
struct ListUsersResponse {
    items: Vec<User>,
}

#[derive(Debug, Default, Serialize)]
struct UserFlags {
    #[serde(skip_serializing_if = "Option::is_none")]
    disabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    admin: Option<bool>,
}

#[derive(Tabled)]
struct UserRow {
    #[tabled(rename = "ID")]
    id: UserId,
    #[tabled(rename = "Username")]
    username: String,
    #[tabled(rename = "Disabled")]
    disabled: bool,
    #[tabled(rename = "Admin")]
    admin: bool,
}

fn user_row(u: &User) -> UserRow {
    UserRow {
        id: u.id,
        username: u.username.clone(),
        disabled: u.disabled,
        admin: u.admin,
    }
}

impl UsersCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            UsersSubcommand::List => list(ctx).await,
            UsersSubcommand::Enable { user } => {
                let flags = UserFlags {
                    disabled: Some(false),
                    ..Default::default()
                };
                update(ctx, &user, flags, "enabled").await
            }
            UsersSubcommand::Disable { user } => {
                let flags = UserFlags {
                    disabled: Some(true),
                    ..Default::default()
                };
                update(ctx, &user, flags, "disabled").await
            }
            UsersSubcommand::Promote { user } => {
                let flags = UserFlags {
                    admin: Some(true),
                    ..Default::default()
                };
                update(ctx, &user, flags, "promoted to admin").await
            }
            UsersSubcommand::Demote { user } => {
                let flags = UserFlags {
                    admin: Some(false),
                    ..Default::default()
                };
                update(ctx, &user, flags, "demoted").await
            }
        }
    }
}

async fn list(ctx: CommandContext) -> Result<()> {
    let response: ListUsersResponse = ctx.client()?.get("/v1/users").await?;
    print_list(&response.items, ctx.format, user_row);
    Ok(())
}

async fn update(ctx: CommandContext, ident: &str, flags: UserFlags, verb: &str) -> Result<()> {
    let client = ctx.client()?;
    let id = resolve::user_id(&client, ident).await?;
    let user: User = client.patch(&format!("/v1/users/{id}"), &flags).await?;

    match ctx.format {
        OutputFormat::Json => print_single(&user),
        OutputFormat::Table => print_success(&format!("User {} {verb}.", user.username)),
    }
    Ok(())
}
