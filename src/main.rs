use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use plughost::domain::entities::Sender;
use plughost::infrastructure::adapters::ConsoleSession;
use plughost::plugins::install_admin;
use plughost::{Config, HostResult, HostServices, PluginLoader, PluginRegistry, Session};

/// Account id of the interactive console session
const CONSOLE_ACCOUNT: &str = "console";

/// Sender id used for console input; made a maintainer for the session.
const CONSOLE_USER: &str = "console-operator";

#[derive(Parser)]
#[command(name = "plughost")]
#[command(about = "A hot-reloadable plugin host for chat bots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "plughost.yaml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the host with an interactive console account
    Run,
    /// List plugin candidates found on disk
    List,
    /// Show version
    Version,
    /// Print a default config
    InitConfig,
}

fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Run => run_host(&cli.config),
        Commands::List => list_candidates(&cli.config),
        Commands::Version => {
            println!("plughost v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::InitConfig => init_config(),
    };

    if let Err(e) = outcome {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn load_config(path: &Path) -> Config {
    let mut config = if path.exists() {
        Config::load(path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        })
    } else {
        info!("No config at {}, using defaults", path.display());
        Config::default()
    };
    config.apply_env();
    config
}

fn run_host(config_path: &Path) -> HostResult<()> {
    let mut config = load_config(config_path);
    if !config.accounts.iter().any(|a| a.id == CONSOLE_ACCOUNT) {
        config.accounts.push(plughost::infrastructure::config::AccountConfig {
            id: CONSOLE_ACCOUNT.to_string(),
            masters: Vec::new(),
        });
    }
    config.host.maintainers.push(CONSOLE_USER.to_string());

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| plughost::HostError::Session(format!("Failed to start runtime: {}", e)))?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> HostResult<()> {
    let services = HostServices::new(config.permission_resolver(), config.setting_store()?)
        .with_command_prefix(config.host.prefix.clone());
    let registry = Arc::new(PluginRegistry::new(
        PluginLoader::from_config(&config.plugins),
        Arc::new(services),
    ));
    install_admin(&registry).await?;

    let console = Arc::new(ConsoleSession::new(CONSOLE_ACCOUNT));
    registry.add_account(console.clone());
    registry.bind_bot(plughost::plugins::ADMIN_PLUGIN, CONSOLE_ACCOUNT).await?;
    let restored = registry.restore_account(CONSOLE_ACCOUNT).await?;

    let candidates = registry.find_candidates();
    info!(
        "{} running: {} local and {} installed plugin candidate(s), restored [{}]",
        config.host.name,
        candidates.local.len(),
        candidates.modules.len(),
        restored.join(", ")
    );
    println!("Type commands (e.g. `{}plugins`), Ctrl-D to quit.", config.host.prefix);

    let operator = Sender::new(CONSOLE_USER).with_nickname("operator");
    while let Some(line) = console.read_line("> ").await {
        if line.is_empty() {
            continue;
        }
        if console.post_private(operator.clone(), line) == 0 {
            warn!("No plugin is listening on the console account");
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let reloaded = registry.reload_outdated().await;
        if !reloaded.is_empty() {
            info!("Reloaded changed plugins: {}", reloaded.join(", "));
        }
    }

    for plugin in registry.plugins() {
        if let Err(e) = registry.destroy(plugin.name()).await {
            warn!("Shutdown of {} incomplete: {}", plugin.name(), e);
        }
    }
    info!("{} stopped", console.account_id());
    Ok(())
}

fn list_candidates(config_path: &Path) -> HostResult<()> {
    let config = load_config(config_path);
    let loader = PluginLoader::from_config(&config.plugins);
    let candidates = loader.find_candidates();

    println!("Local ({}):", config.plugins.local_dir.display());
    for name in &candidates.local {
        println!("  {}", name);
    }
    println!("Installed ({}):", config.plugins.module_dir.display());
    for name in &candidates.modules {
        println!("  {} ({})", loader.short_name(name), name);
    }
    Ok(())
}

fn init_config() -> HostResult<()> {
    let config = Config::default();
    let yaml = serde_yaml::to_string(&config)
        .map_err(|e| plughost::application::errors::ConfigError::Parse(e.to_string()))?;
    println!("{}", yaml);
    println!("\nSave this to plughost.yaml and adjust as needed.");
    Ok(())
}
