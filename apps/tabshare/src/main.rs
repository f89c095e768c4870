use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use runtime::{AppConfig, CliArgs};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use friend_link::config::FriendLinkConfig;
use friend_link::contract::model::MemberKey;
use friend_link::infra::{InMemoryRemoteStore, JsonFileCache, MemoryCache};
use friend_link::module::MODULE_NAME;
use friend_link::FriendLinkModule;

/// TabShare - shared-expense client with account linking
#[derive(Parser)]
#[command(name = "tabshare")]
#[command(about = "TabShare - shared-expense client with account linking")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Client home directory for caches and logs (overrides config)
    #[arg(long)]
    home_dir: Option<PathBuf>,

    /// Print current configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check configuration
    Check,
    /// Link two accounts through an invite against an in-process store
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        home_dir: cli.home_dir.as_ref().map(|p| p.to_string_lossy().to_string()),
        verbose: cli.verbose,
    };

    // Load configuration (normalized home_dir is applied inside)
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args)?;

    let logging_config = config.logging.as_ref().cloned().unwrap_or_default();
    runtime::logging::init_logging_from_config(&logging_config, Path::new(&config.client.home_dir));
    tracing::info!("TabShare client starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Check) {
        Commands::Check => check_config(&config),
        Commands::Demo => run_demo(&config).await,
    }
}

fn friend_link_config(config: &AppConfig) -> Result<FriendLinkConfig> {
    let cfg: FriendLinkConfig = config.module_config(MODULE_NAME)?;
    cfg.validate()
        .with_context(|| format!("Invalid '{MODULE_NAME}' module configuration"))?;
    Ok(cfg)
}

fn check_config(config: &AppConfig) -> Result<()> {
    tracing::info!("Checking configuration...");
    let cfg = friend_link_config(config)?;
    tracing::info!("Configuration is valid");
    println!("Configuration check passed");
    println!("Home directory: {}", config.client.home_dir);
    println!("Invite base URL: {}", cfg.invite_base()?);
    Ok(())
}

/// Two sessions over one in-process store: the first signed-in account
/// invites a member it tracks, the second claims the invite.
async fn run_demo(config: &AppConfig) -> Result<()> {
    let cfg = friend_link_config(config)?;
    let home = PathBuf::from(&config.client.home_dir);
    let remote = Arc::new(InMemoryRemoteStore::new());

    let creator_email = config
        .client
        .account_email
        .clone()
        .unwrap_or_else(|| "alice@example.com".to_string());
    let creator_name = config
        .client
        .display_name
        .clone()
        .unwrap_or_else(|| "Alice".to_string());

    let creator = FriendLinkModule::init(
        cfg.clone(),
        remote.clone(),
        Arc::new(JsonFileCache::in_home_dir(&home)),
    )?;
    let claimant = FriendLinkModule::init(cfg, remote.clone(), Arc::new(MemoryCache::new()))?;

    creator
        .session()
        .sign_in(&creator_email, &creator_name, MemberKey::new())
        .await?;
    claimant
        .session()
        .sign_in("bob@example.com", "Bob", MemberKey::new())
        .await?;

    let target = MemberKey::new();
    let invite = creator.api().generate_invite(target, "Bobby").await?;
    println!("Invite created: {}", invite.url);
    println!("{}", invite.share_text);

    let validation = claimant.api().validate_invite(invite.token.id).await?;
    println!(
        "Invite valid: {} (balance preview: {})",
        validation.is_valid,
        validation
            .preview
            .as_ref()
            .map(|p| p.balance.to_string())
            .unwrap_or_default()
    );

    let result = claimant.api().claim_invite(invite.token.id).await?;
    claimant.session().flush_side_effects().await;
    println!(
        "Invite claimed: member {} is now {}",
        result.member_key, result.linked_account_email
    );

    creator.api().reconcile().await?;
    for friend in creator.api().friend_members()? {
        let linked = friend
            .link
            .account()
            .and_then(|a| a.email())
            .unwrap_or("-")
            .to_string();
        println!("Friend: {} <{}>", friend.display_name(), linked);
    }

    claimant.session().sign_out().await;
    creator.session().sign_out().await;
    Ok(())
}
