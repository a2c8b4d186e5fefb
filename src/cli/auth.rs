//! Auth command implementation

use super::{Cli, CliError, OutputFormat};
use crate::auth::{CredentialProvider, Credentials, TokenCredentialProvider};
use clap::{Args, Subcommand};
use serde_json::json;

/// Auth command arguments
#[derive(Args, Debug, Clone)]
pub struct AuthCommand {
    /// Auth subcommand
    #[command(subcommand)]
    pub command: AuthSubcommand,
}

/// Auth subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum AuthSubcommand {
    /// Perform the authentication handshake and print the session
    Check,
}

impl AuthCommand {
    /// Execute the auth command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        match self.command {
            AuthSubcommand::Check => check(cli).await,
        }
    }
}

async fn check(cli: &Cli) -> Result<(), CliError> {
    let credentials = Credentials::load(cli.credentials.as_deref())?;
    let provider = TokenCredentialProvider::new(credentials);
    let session = provider.acquire().await?;

    match cli.output_format {
        OutputFormat::Json => {
            let value = json!({
                "base_url": session.base_url(),
                "account": session.account(),
                "expires_at": session.expires_at().to_rfc3339(),
            });
            let text = serde_json::to_string_pretty(&value)
                .map_err(|e| CliError::SerializationError(e.to_string()))?;
            println!("{}", text);
        }
        OutputFormat::Human => {
            println!("Authenticated against {}", session.base_url());
            println!("  Account:  {}", session.account().unwrap_or("(unknown)"));
            println!("  Expires:  {}", session.expires_at().format("%Y-%m-%d %H:%M:%S UTC"));
        }
    }
    Ok(())
}
