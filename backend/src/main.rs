//! Postcheck CLI - rules-matrix service and tooling
//!
//! # Main Commands
//!
//! ```bash
//! postcheck serve                   # Load the active matrix and start HTTP server (port 4000)
//! postcheck rules active            # Show active/latest version and recent uploads
//! postcheck rules upload m.csv      # Validate and activate a new matrix version
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! postcheck parse matrix.csv        # Parse a matrix CSV and print it as JSON
//! postcheck evaluate matrix.csv --country FR --activity installation \
//!     --role technician --start 2025-01-01 --end 2025-01-03
//! ```

use clap::{Parser, Subcommand};
use postcheck::{
    evaluate, load_matrix_from_path, server::{start_server, AppState},
    Config, EvaluationRequest, MatrixLoader, MatrixStore, RulesRegistry, RulesUpload,
    UploadWorkflow,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "postcheck")]
#[command(about = "Posting notification rules: matrix upload, versioning and evaluation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP server
    Serve {
        /// Port to listen on (default: $PORT or 4000)
        #[arg(short, long)]
        port: Option<u16>,

        /// Rules storage root (default: $RULES_DIR or data/rules)
        #[arg(long)]
        rules_dir: Option<PathBuf>,

        /// Default matrix CSV (default: $MATRIX_CSV or data/matrix.csv)
        #[arg(long)]
        matrix_csv: Option<PathBuf>,

        /// Directory scanned for a CSV as last resort (default: $DATA_DIR or data)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Parse a matrix CSV and output JSON
    Parse {
        /// Input CSV file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Evaluate one assignment against a matrix CSV
    Evaluate {
        /// Matrix CSV file
        input: PathBuf,

        /// Country key (header cell)
        #[arg(short, long)]
        country: String,

        /// Type of activity
        #[arg(short, long, default_value = "other")]
        activity: String,

        /// Traveller role
        #[arg(short, long, default_value = "employee")]
        role: String,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: String,

        /// Traveller only works remotely at the destination
        #[arg(long)]
        mobile_only: bool,
    },

    /// Manage the versioned rules registry
    Rules {
        /// Rules storage root (default: $RULES_DIR or data/rules)
        #[arg(long, global = true)]
        rules_dir: Option<PathBuf>,

        #[command(subcommand)]
        action: RulesAction,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    /// Show active version and recent uploads
    Active,

    /// Validate a CSV and activate it as a new version
    Upload {
        /// Matrix CSV file
        file: PathBuf,

        /// MIME type recorded in history
        #[arg(long, default_value = "text/csv")]
        mime_type: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            port,
            rules_dir,
            matrix_csv,
            data_dir,
        } => cmd_serve(port, rules_dir, matrix_csv, data_dir).await,

        Commands::Parse { input, output } => cmd_parse(&input, output.as_deref()),

        Commands::Evaluate {
            input,
            country,
            activity,
            role,
            start,
            end,
            mobile_only,
        } => cmd_evaluate(
            &input,
            EvaluationRequest {
                country_key: country,
                type_of_activity: activity,
                traveller_role: role,
                start_date: start,
                end_date: end,
                is_mobile_only: mobile_only,
            },
        ),

        Commands::Rules { rules_dir, action } => cmd_rules(rules_dir, action),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn cmd_serve(
    port: Option<u16>,
    rules_dir: Option<PathBuf>,
    matrix_csv: Option<PathBuf>,
    data_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::from_env()?;
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(dir) = rules_dir {
        config.rules_dir = dir;
    }
    if let Some(csv) = matrix_csv {
        config.matrix_csv = csv;
    }
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }

    let registry = RulesRegistry::new(&config.rules_dir).with_history_limit(config.history_limit);
    let store = MatrixStore::new();

    // No matrix, no service.
    MatrixLoader::new(&config.matrix_csv, &config.data_dir).load(&registry, &store)?;

    let uploads = UploadWorkflow::new(registry, store.clone());
    start_server(config, AppState::new(store, uploads)).await
}

fn cmd_parse(input: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let matrix = load_matrix_from_path(input)?;
    eprintln!(
        "Parsed {}: {} countries, {} categories",
        input.display(),
        matrix.countries.len(),
        matrix.categories.len()
    );

    let json = serde_json::to_string_pretty(&matrix)?;
    write_output(&json, output)
}

fn cmd_evaluate(input: &Path, request: EvaluationRequest) -> Result<(), Box<dyn std::error::Error>> {
    let matrix = load_matrix_from_path(input)?;
    let decision = evaluate(&matrix, request)?;
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

fn cmd_rules(rules_dir: Option<PathBuf>, action: RulesAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let registry = RulesRegistry::new(rules_dir.unwrap_or(config.rules_dir))
        .with_history_limit(config.history_limit);

    match action {
        RulesAction::Active => {
            let info = registry.active_info()?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        RulesAction::Upload { file, mime_type } => {
            let original_name = file
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let content = fs::read(&file)?;

            let workflow = UploadWorkflow::new(registry, MatrixStore::new());
            match workflow.upload_and_activate(RulesUpload {
                original_name,
                mime_type,
                content,
            }) {
                Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                Err(e) => {
                    if let Some(reason) = e.reason() {
                        eprintln!("   reason: {}", reason);
                    }
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
