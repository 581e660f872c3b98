use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use codeguard::{
    connect_backend, AuditLogger, CodeExecutionRequest, EngineConfig, JsonLinesSink,
    LanguageRegistry, Orchestrator, SecurityValidator,
};

/// Run untrusted code inside an isolated sandbox
#[derive(Parser)]
#[command(name = "codeguard")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Append security audit records to this file (JSON lines)
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a request read from a JSON file ("-" for stdin)
    Run {
        request: PathBuf,

        /// Pretty-print the result
        #[arg(long)]
        pretty: bool,
    },

    /// List supported languages
    Languages,

    /// Report security violations without executing anything
    Scan {
        file: PathBuf,

        #[arg(short, long)]
        language: String,

        /// Also print the sanitized source
        #[arg(long)]
        sanitize: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("codeguard=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("Invalid engine configuration")?;

    let registry = match &config.languages_path {
        Some(path) => LanguageRegistry::from_file(path)
            .with_context(|| format!("Failed to load languages from {}", path.display()))?,
        None => LanguageRegistry::builtin().context("Built-in language profiles are invalid")?,
    };
    info!("Loaded languages: {:?}", registry.list_supported());

    match cli.command {
        Commands::Languages => {
            for language in registry.list_supported() {
                println!("{}", language);
            }
        }
        Commands::Scan {
            file,
            language,
            sanitize,
        } => {
            let code = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            if !registry.is_supported(&language) {
                bail!("unsupported language: {}", language);
            }

            let validator = SecurityValidator::new();
            let violations = validator.validate(&code, &language);
            println!("{}", serde_json::to_string_pretty(&violations)?);
            if sanitize {
                println!("{}", validator.sanitize(&code, &language));
            }
        }
        Commands::Run { request, pretty } => {
            let request = read_request(&request)?;

            let mut audit = AuditLogger::new();
            let audit_guard = match &cli.audit_log {
                Some(path) => {
                    let (sink, guard) = JsonLinesSink::open(path).with_context(|| {
                        format!("Failed to open audit log {}", path.display())
                    })?;
                    audit = audit.with_sink(Arc::new(sink));
                    Some(guard)
                }
                None => None,
            };

            let backend = connect_backend(&config);
            let orchestrator = Orchestrator::new(
                backend,
                Arc::new(registry),
                SecurityValidator::new(),
                audit,
                config.policy.clone(),
            )
            .with_sandbox_config(config.sandbox.clone());

            let result = orchestrator.execute(&request).await;
            orchestrator.shutdown().await;
            let result = result?;

            let json = if pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{}", json);

            // flushes queued audit records
            drop(orchestrator);
            drop(audit_guard);
        }
    }

    Ok(())
}

fn read_request(path: &Path) -> Result<CodeExecutionRequest> {
    let text = if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read request from stdin")?;
        text
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };
    serde_json::from_str(&text).context("Request is not valid JSON")
}
