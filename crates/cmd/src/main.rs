use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod common;

use common::Target;

#[derive(Parser)]
#[command(author, version, long_about = None)]
#[command(name = "crowd")]
#[command(about = "Upload session photos and browse the smart crowd counter table")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: $CROWDCOUNT_CONFIG or ./crowdcount.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database that holds the stage (default: the configured one)
    #[arg(long, global = true)]
    database: Option<String>,

    /// Existing schema that holds the stage
    #[arg(long, global = true, conflicts_with = "new_schema")]
    schema: Option<String>,

    /// Name of a new schema to create for the stage
    #[arg(long, global = true)]
    new_schema: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an example configuration file
    Init,
    /// Create the schema and the stage if they do not exist
    Setup,
    /// List databases
    Databases,
    /// List schemas of the selected database
    Schemas,
    /// Print the crowd counter table
    Show,
    /// Upload JPG/PNG images and refresh the table
    Upload {
        /// Image files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Refresh the stage directory and reload the table
    Refresh,
    /// Show image, file details and analytics for one row
    Detail {
        /// Row number as shown in the table
        row: usize,
    },
    /// Print the attendee / raised hands chart for one row
    Chart {
        /// Row number as shown in the table
        row: usize,
        /// Emit a Vega-Lite spec instead of text bars
        #[arg(long)]
        vega: bool,
    },
    /// Interactive session
    Session,
}

impl Cli {
    fn target(&self) -> Target {
        Target {
            config: self.config.clone(),
            database: self.database.clone(),
            schema: self.schema.clone(),
            new_schema: self.new_schema.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    diagnostics::init_diagnostics();

    let cli = Cli::parse();
    let target = cli.target();

    match &cli.command {
        Commands::Init => {
            commands::init_command(&crowdcount::config_path(cli.config.as_deref())).await
        }
        Commands::Setup => commands::setup_command(&target).await,
        Commands::Databases => commands::databases_command(&target).await,
        Commands::Schemas => commands::schemas_command(&target).await,
        Commands::Show => commands::show_command(&target).await,
        Commands::Upload { files } => commands::upload_command(&target, files).await,
        Commands::Refresh => commands::refresh_command(&target).await,
        Commands::Detail { row } => commands::detail_command(&target, *row).await,
        Commands::Chart { row, vega } => commands::chart_command(&target, *row, *vega).await,
        Commands::Session => commands::session_command(&target).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_upload_with_new_schema() {
        let cli = Cli::try_parse_from(["crowd", "upload", "a.jpg", "b.png", "--new-schema", "SUMMIT"])
            .expect("parses");
        assert!(matches!(&cli.command, Commands::Upload { files } if files.len() == 2));
        assert_eq!(cli.target().new_schema.as_deref(), Some("SUMMIT"));
    }

    #[test]
    fn test_parse_database_flag() {
        let cli =
            Cli::try_parse_from(["crowd", "--database", "SUMMIT_DB", "schemas"]).expect("parses");
        assert!(matches!(cli.command, Commands::Schemas));
        assert_eq!(cli.target().database.as_deref(), Some("SUMMIT_DB"));

        let cli = Cli::try_parse_from(["crowd", "upload", "a.jpg", "--database", "SUMMIT_DB"])
            .expect("global flag after the subcommand");
        assert_eq!(cli.target().database.as_deref(), Some("SUMMIT_DB"));
    }

    #[test]
    fn test_schema_flags_conflict() {
        assert!(Cli::try_parse_from(["crowd", "show", "--schema", "A", "--new-schema", "B"]).is_err());
        assert!(Cli::try_parse_from(["crowd", "upload"]).is_err());
    }

    #[test]
    fn test_parse_chart() {
        let cli = Cli::try_parse_from(["crowd", "chart", "2", "--vega"]).expect("parses");
        assert!(matches!(cli.command, Commands::Chart { row: 2, vega: true }));
    }
}
