pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "stagecraft-admin")]
#[command(about = "Maintenance tasks for a stagecraft database")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Apply pending database migrations")]
    Migrate,

    #[command(about = "Set the bearer token of data sets matched by data group and/or data type name")]
    SetToken {
        #[arg(help = "New bearer token")]
        token: String,

        #[arg(long = "data-group-name", help = "Data group name to match")]
        data_group: Option<String>,

        #[arg(long = "data-type-name", help = "Data type name to match")]
        data_type: Option<String>,
    },

    #[command(about = "Forget every cached signon token for a user")]
    PurgeUser {
        #[arg(help = "Signon uid")]
        uid: String,
    },

    #[command(about = "List data sets with their group and type")]
    ListDataSets,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Migrate => commands::database::migrate(output_format).await,
        Commands::SetToken { token, data_group, data_type } => {
            commands::data_sets::set_token(&token, data_group.as_deref(), data_type.as_deref(), output_format).await
        }
        Commands::PurgeUser { uid } => commands::users::purge_user(&uid, output_format).await,
        Commands::ListDataSets => commands::data_sets::list(output_format).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_token_takes_group_and_type_names() {
        let cli = Cli::parse_from([
            "stagecraft-admin",
            "--json",
            "set-token",
            "abc123",
            "--data-group-name",
            "lpa",
        ]);
        assert!(matches!(OutputFormat::from_cli(&cli), OutputFormat::Json));
        match cli.command {
            Commands::SetToken { token, data_group, data_type } => {
                assert_eq!(token, "abc123");
                assert_eq!(data_group.as_deref(), Some("lpa"));
                assert_eq!(data_type, None);
            }
            _ => panic!("expected set-token"),
        }
    }

    #[test]
    fn purge_user_needs_a_uid() {
        assert!(Cli::try_parse_from(["stagecraft-admin", "purge-user"]).is_err());
    }
}
