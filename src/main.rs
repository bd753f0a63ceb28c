use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tarm::app::{render_tree, App, Target};
use tarm::azure::auth::{AzCliIdentity, Identity, StaticIdentity};
use tarm::azure::client::{ArmClient, WriteMethod};
use tarm::browse::{self, Prompt, TerminalConfirmer};
use tarm::config::{CliOverrides, Config};
use tarm::resource::document::{AutoConfirm, WriteConfirmer};
use tracing_subscriber::EnvFilter;

/// Terminal explorer for Azure Resource Manager
#[derive(Parser, Debug)]
#[command(name = "tarm", version = tarm::VERSION, about, long_about = None)]
struct Args {
    /// Management endpoint (defaults to the public cloud)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Tenant to sign in to
    #[arg(long, global = true)]
    tenant: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resource tree
    Tree {
        /// Levels to expand below the start node
        #[arg(short, long, default_value_t = 2)]
        depth: usize,
        /// Start node: labels (or indexes) from the root, one per flag
        #[arg(short, long = "path")]
        path: Vec<String>,
    },
    /// List provider namespaces
    Namespaces,
    /// Print a resource as JSON
    Show {
        resource_id: String,
        /// Print YAML instead of JSON
        #[arg(long)]
        yaml: bool,
    },
    /// Write a JSON file back to a resource
    Apply {
        resource_id: String,
        file: PathBuf,
        /// PATCH or PUT
        #[arg(short, long, default_value = "PATCH")]
        method: WriteMethod,
        /// Write to a different resource path
        #[arg(long)]
        target: Option<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Print the api-version used for a resource
    ApiVersion { resource_id: String },
    /// Export a resource as a deployment template
    Export {
        resource_id: String,
        /// Output file (prints JSON to stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Decompile to Bicep with `az bicep decompile`
        #[arg(long)]
        bicep: bool,
        /// Overwrite an existing output file
        #[arg(long)]
        force: bool,
    },
    /// Print the ARM URL of a resource
    Url { resource_id: String },
    /// Print the Azure portal link of a resource
    Portal { resource_id: String },
    /// Print an ARM access token
    Token,
    /// Show or set the provider namespace filter
    Filter {
        namespaces: Vec<String>,
        /// Remove the filter
        #[arg(long)]
        clear: bool,
    },
    /// Interactive browser (default)
    Browse,
    /// Sign in with the Azure CLI
    SignIn,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> Option<&'static str> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some("error"),
            LogLevel::Warn => Some("warn"),
            LogLevel::Info => Some("info"),
            LogLevel::Debug => Some("debug"),
            LogLevel::Trace => Some("trace"),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(directive) = level.as_filter() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("tarm started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("tarm").join("tarm.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".tarm").join("tarm.log");
    }
    PathBuf::from("tarm.log")
}

/// A token from the environment wins over the Azure CLI
fn build_identity(config: &Config) -> Arc<dyn Identity> {
    if let Some(identity) = StaticIdentity::from_env() {
        tracing::info!("Using bearer token from environment");
        return Arc::new(identity.with_subscription_lookup(config));
    }

    Arc::new(AzCliIdentity::new(config.effective_tenant()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let mut config = Config::load();
    config.cli = CliOverrides {
        endpoint: args.endpoint.clone(),
        tenant_id: args.tenant.clone(),
    };
    tracing::info!("Using endpoint: {}", config.effective_endpoint());

    let identity = build_identity(&config);
    let client = ArmClient::new(identity, &config)?;
    let mut app = App::new(client, config);

    let command = args.command.unwrap_or(Command::Browse);
    run_command(&mut app, command).await.map_err(|message| anyhow!(message))
}

async fn run_command(app: &mut App, command: Command) -> std::result::Result<(), String> {
    match command {
        Command::Tree { depth, path } => {
            app.walk(&path).await?;
            let mut lines = Vec::new();
            render_tree(&app.explorer, app.current().clone(), depth, 0, &mut lines).await;
            for line in lines {
                println!("{}", line);
            }
        }
        Command::Namespaces => {
            for namespace in app.namespaces().await? {
                println!("{}", namespace);
            }
        }
        Command::Show { resource_id, yaml } => {
            let text = app.show(&resource_id).await?;
            if yaml {
                let value: serde_json::Value =
                    serde_json::from_str(&text).map_err(|e| e.to_string())?;
                print!("{}", serde_yaml::to_string(&value).map_err(|e| e.to_string())?);
            } else {
                println!("{}", text);
            }
        }
        Command::Apply {
            resource_id,
            file,
            method,
            target,
            yes,
        } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .map_err(|e| format!("Error reading {}. {}", file.display(), e))?;
            let confirmer: Arc<dyn WriteConfirmer> = if yes {
                let auto = AutoConfirm::new(method);
                Arc::new(match target {
                    Some(target) => auto.to(target),
                    None => auto,
                })
            } else {
                Arc::new(TerminalConfirmer::new(Arc::new(Prompt::stdin())))
            };
            println!("{}", app.apply(&resource_id, text, confirmer).await?);
        }
        Command::ApiVersion { resource_id } => {
            if let Some((fragment, version)) = app.config.api_version_override(&resource_id) {
                println!("{} (configured for '{}')", version, fragment);
            } else {
                println!("{}", app.api_version(&resource_id).await?);
            }
        }
        Command::Export {
            resource_id,
            output,
            bicep,
            force,
        } => {
            println!("{}", app.export(&resource_id, output, bicep, force).await?);
        }
        Command::Url { resource_id } => {
            println!("{}", app.resource_url(&Target::Id(resource_id)).await?);
        }
        Command::Portal { resource_id } => {
            println!("{}", app.portal_link(&Target::Id(resource_id)).await?);
        }
        Command::Token => println!("{}", app.token().await?),
        Command::Filter { namespaces, clear } => {
            if clear {
                app.clear_provider_filter()?;
            } else if !namespaces.is_empty() {
                app.set_provider_filter(namespaces).await?;
            }
            if app.config.provider_filter.is_empty() {
                println!("(no filter)");
            } else {
                println!("{}", app.config.provider_filter.join(" "));
            }
        }
        Command::Browse => {
            browse::run(app, Arc::new(Prompt::stdin()))
                .await
                .map_err(|e| e.to_string())?;
        }
        Command::SignIn => {
            if app.sign_in().await? {
                println!("Signed in");
            } else {
                return Err("Sign-in did not complete".to_string());
            }
        }
    }

    Ok(())
}
