//! Error handling and display for the CLI.

use colored::Colorize;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Not authenticated. Run `smctl auth login` to authenticate.")]
    NotAuthenticated,

    #[error("API error: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
        fields: Vec<(String, String)>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn api(
        status: u16,
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: Option<String>,
    ) -> Self {
        Self::Api {
            status,
            code: code.into(),
            message: message.into(),
            request_id,
            fields: Vec::new(),
        }
    }

    pub fn with_fields(mut self, details: Vec<(String, String)>) -> Self {
        if let Self::Api { fields, .. } = &mut self {
            *fields = details;
        }
        self
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    let Some(cli_err) = err.downcast_ref::<CliError>() else {
        return;
    };

    match cli_err {
        CliError::NotAuthenticated => {
            eprintln!(
                "\n{}",
                "Hint: Your session may have expired. Run `smctl auth login`.".yellow()
            );
        }
        CliError::Api {
            status,
            request_id,
            fields,
            ..
        } => {
            for (field, message) in fields {
                eprintln!("  {}: {}", field.bold(), message);
            }
            match *status {
                403 => eprintln!(
                    "\n{}",
                    "Hint: This operation requires an admin account.".yellow()
                ),
                400 if cli_err.to_string().contains("Disabled account") => eprintln!(
                    "\n{}",
                    "Hint: Ask an admin to enable your account.".yellow()
                ),
                _ => {}
            }
            if let Some(request_id) = request_id {
                eprintln!("\nRequest ID: {}", request_id);
            }
        }
        CliError::Network(_) => {
            eprintln!(
                "\n{}",
                "Hint: Check that server-manager is running and --api-url is correct.".yellow()
            );
        }
        _ => {}
    }
}
