//! Tenantry CLI - Inspect permissions and replay access scenarios
//!
//! Decodes permission codes, evaluates access decisions and group moves
//! against TOML scenario files, and manages the kernel configuration.

mod scenario;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use scenario::Scenario;
use std::path::PathBuf;
use tenantry_core::{
    init_logging, log_operation_error, log_operation_start, log_operation_success, Permission,
    PermissionRight, PermissionRole, Right, TenantryConfig,
};
use tenantry_kernel::{CancellationToken, MovePolicy};
use tracing::info;

#[derive(Parser)]
#[command(name = "tenantry")]
#[command(about = "Group-scoped permission kernel toolbox")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the flags of a permission code such as rwr---
    Parse {
        /// Six-character permission code
        code: String,
    },

    /// Evaluate an access decision in a scenario
    Check {
        /// Scenario file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Acting user
        #[arg(short, long)]
        user: String,

        /// Target object name
        #[arg(short, long)]
        object: String,

        /// Right to check (read, write, link, delete)
        #[arg(short, long, default_value = "read")]
        right: Right,

        /// Context group: a group name or id, -1/ALL or SHARES
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Move an object graph to another group
    Chgrp {
        /// Scenario file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Acting user
        #[arg(short, long)]
        user: String,

        /// Root object name
        #[arg(short, long)]
        object: String,

        /// Destination group name
        #[arg(long)]
        to: String,

        /// Copy annotations that cannot be moved
        #[arg(long)]
        copy_annotations: bool,

        /// Move parent containers along instead of unlinking them
        #[arg(long)]
        include_containers: bool,

        /// Refuse instead of unlinking annotations left behind
        #[arg(long)]
        keep_links: bool,
    },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Initialize default configuration
        #[arg(long)]
        init: bool,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;

    let mut logging_config = config.logging.clone();
    if cli.verbose {
        logging_config.level = "debug".to_string();
    }
    init_logging(&logging_config).map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting Tenantry CLI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Parse { code } => handle_parse(&code)?,
        Commands::Check {
            scenario,
            user,
            object,
            right,
            group,
        } => {
            handle_check(scenario, user, object, right, group, config).await?;
        }
        Commands::Chgrp {
            scenario,
            user,
            object,
            to,
            copy_annotations,
            include_containers,
            keep_links,
        } => {
            let policy = MovePolicy {
                copy_annotations,
                include_containers,
                unlink_annotations: !keep_links,
                ..MovePolicy::default()
            };
            handle_chgrp(scenario, user, object, to, policy, config).await?;
        }
        Commands::Config {
            show,
            init,
            validate,
        } => {
            handle_config(cli.config, show, init, validate)?;
        }
    }

    Ok(())
}

fn load_config(config_path: Option<&PathBuf>) -> Result<TenantryConfig> {
    if let Some(path) = config_path {
        return Ok(TenantryConfig::from_file(path)?);
    }

    let default_paths = [
        dirs::config_dir().map(|d| d.join("tenantry").join("config.toml")),
        Some(PathBuf::from("tenantry.toml")),
    ];
    for path in default_paths.iter().flatten() {
        if path.exists() {
            return Ok(TenantryConfig::from_file(path)?);
        }
    }

    Ok(TenantryConfig::default())
}

/// Get the default configuration file path
fn get_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|d| d.join(".config")))
        .map(|d| d.join("tenantry").join("config.toml"))
        .ok_or_else(|| anyhow!("No configuration directory available on this platform"))
}

fn handle_parse(code: &str) -> Result<()> {
    let permission: Permission = code.parse()?;

    println!("{} (bits {:06b})", permission, permission.bits());
    println!("{:<6} {:<5} {:<5}", "role", "read", "write");
    for (name, role) in [
        ("user", PermissionRole::User),
        ("group", PermissionRole::Group),
        ("world", PermissionRole::World),
    ] {
        let read = permission.is_granted(role, PermissionRight::Read);
        let write = permission.is_granted(role, PermissionRight::Write);
        println!("{:<6} {:<5} {:<5}", name, yes_no(read), yes_no(write));
    }

    for (name, known) in [
        ("PRIVATE", Permission::PRIVATE),
        ("COLLAB_READONLY", Permission::COLLAB_READONLY),
        ("COLLAB_READLINK", Permission::COLLAB_READLINK),
        ("PUBLIC", Permission::PUBLIC),
    ] {
        if permission.identical(&known) {
            println!("level  {}", name);
        }
    }
    Ok(())
}

fn yes_no(granted: bool) -> &'static str {
    if granted {
        "yes"
    } else {
        "no"
    }
}

async fn handle_check(
    scenario: PathBuf,
    user: String,
    object: String,
    right: Right,
    group: Option<String>,
    config: TenantryConfig,
) -> Result<()> {
    log_operation_start!("check", user = %user, object = %object, right = %right);

    let loaded = Scenario::from_file(&scenario)?.load(config).await?;
    let user_id = loaded.user(&user)?;
    let sessions = loaded.kernel.sessions();
    let login = sessions.login(&user, loaded.password(&user)?).await?;
    let header = group.map(|g| loaded.context_header(&g));
    let context = sessions.context_for(login.session, header.as_deref()).await?;

    let target = loaded.object(&object)?;
    let decision = loaded.kernel.authorize(&context, target, right).await?;

    println!(
        "{} {} {} in context {}: {}",
        user, right, target, context.group, decision
    );
    log_operation_success!("check", user = %user_id, decision = %decision);
    Ok(())
}

async fn handle_chgrp(
    scenario: PathBuf,
    user: String,
    object: String,
    to: String,
    policy: MovePolicy,
    config: TenantryConfig,
) -> Result<()> {
    log_operation_start!("chgrp", user = %user, object = %object, to = %to);

    let loaded = Scenario::from_file(&scenario)?.load(config).await?;
    let sessions = loaded.kernel.sessions();
    let login = sessions.login(&user, loaded.password(&user)?).await?;
    let destination = loaded.group(&to)?;
    let root = loaded.object(&object)?;

    let report = match loaded
        .kernel
        .objects()
        .chgrp(&login, root, destination, policy, &CancellationToken::new())
        .await
    {
        Ok(report) => report,
        Err(e) => {
            log_operation_error!("chgrp", e);
            return Err(e.into());
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    log_operation_success!("chgrp", moved = report.moved.len());
    Ok(())
}

fn handle_config(path: Option<PathBuf>, show: bool, init: bool, validate: bool) -> Result<()> {
    if init {
        let config_path = match path.clone() {
            Some(path) => path,
            None => get_config_path()?,
        };
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        TenantryConfig::default().save_to_file(&config_path)?;
        println!("Configuration initialized at: {:?}", config_path);
    }

    if show {
        let config = load_config(path.as_ref())?;
        println!("{}", toml::to_string_pretty(&config)?);
    }

    if validate {
        let config = load_config(path.as_ref())?;
        config.validate()?;
        println!("Configuration is valid");
    }

    Ok(())
}
