use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use workspace_sandbox::shell;
use workspace_sandbox::sync;
use workspace_sandbox::workspace::{persist_state, JsonStateStore, StateStore, WorkspaceState};
use workspace_sandbox::WorkspaceError;

/// Workspace Sandbox - Virtual Filesystem Synchronization Engine
///
/// Mirrors an in-memory workspace tree against a real directory, preserving
/// metadata and version-control history, and screens shell commands before
/// they touch the workspace.
#[derive(Parser)]
#[command(name = "workspace-sandbox")]
#[command(version = "0.1.0")]
#[command(about = "Virtual workspace synchronization engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// State file location
    #[arg(long)]
    state_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a real directory into the virtual workspace
    Hydrate {
        /// Directory to load
        dir: PathBuf,
    },
    /// Write the virtual workspace out to a directory
    Dehydrate {
        /// Destination directory
        dir: PathBuf,
    },
    /// Screen a shell command against the security policy
    Check {
        /// The command to screen
        command: String,
    },
    /// Show workspace paths a shell command references
    Paths {
        /// The command to analyze
        command: String,
    },
    /// Set and mirror a new common directory
    SetCommon {
        /// The directory to mirror
        dir: PathBuf,
    },
    /// Show workspace status
    Status,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let state_file = cli.state_file.clone().unwrap_or_else(default_state_file);
    let store = JsonStateStore::new(&state_file);

    let mut state = match store.load() {
        Ok(s) => s,
        Err(WorkspaceError::Io(_)) => WorkspaceState::new(),
        Err(e) => {
            error!("Could not load state from {}: {}", state_file.display(), e);
            std::process::exit(1);
        }
    };

    let result = match &cli.command {
        Commands::Hydrate { dir } => cmd_hydrate(&mut state, dir),
        Commands::Dehydrate { dir } => cmd_dehydrate(&state, dir),
        Commands::Check { command } => cmd_check(&state, command),
        Commands::Paths { command } => cmd_paths(&state, command),
        Commands::SetCommon { dir } => cmd_set_common(&mut state, dir),
        Commands::Status => cmd_status(&state),
    };

    if let Err(e) = result {
        error!("Error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = persist_state(&state, &store) {
        error!("Could not save state to {}: {}", state_file.display(), e);
        std::process::exit(1);
    }
}

fn default_state_file() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("workspace-sandbox")
        .join("state.json")
}

fn cmd_hydrate(state: &mut WorkspaceState, dir: &Path) -> Result<(), WorkspaceError> {
    sync::hydrate(state, dir)?;
    println!("Hydrated {} items from {}", state.tree.len(), dir.display());
    Ok(())
}

fn cmd_dehydrate(state: &WorkspaceState, dir: &Path) -> Result<(), WorkspaceError> {
    sync::dehydrate(state, dir)?;
    println!("Wrote {} items to {}", state.tree.len(), dir.display());
    Ok(())
}

fn cmd_check(state: &WorkspaceState, command: &str) -> Result<(), WorkspaceError> {
    shell::validate_command_security(command, &state.shell_config)?;
    shell::check_command_restrictions(command, &state.shell_config)?;

    let primary = shell::identify_primary_command(command);
    let updates_atime =
        shell::should_update_access_time(&primary, state.shell_config.access_time_mode);

    println!("Command allowed");
    println!("Primary command: {}", primary);
    println!("Updates access time: {}", updates_atime);
    Ok(())
}

fn cmd_paths(state: &WorkspaceState, command: &str) -> Result<(), WorkspaceError> {
    let root = state.workspace_root.as_deref().ok_or_else(|| {
        WorkspaceError::WorkspaceNotAvailable("hydrate a workspace first".to_string())
    })?;

    let paths = shell::extract_file_paths_from_command(command, root, state.cwd.as_deref());
    if paths.is_empty() {
        println!("No workspace paths referenced");
    } else {
        for path in paths {
            println!("{}", path);
        }
    }
    Ok(())
}

fn cmd_set_common(state: &mut WorkspaceState, dir: &Path) -> Result<(), WorkspaceError> {
    sync::update_common_directory(state, &dir.to_string_lossy())?;
    state.common_file_system_enabled = true;
    info!("Common-filesystem mirroring enabled");
    Ok(())
}

fn cmd_status(state: &WorkspaceState) -> Result<(), WorkspaceError> {
    println!("Workspace root:    {}", display_opt(&state.workspace_root));
    println!("Current directory: {}", display_opt(&state.cwd));
    println!("Common directory:  {}", display_opt(&state.common_directory));
    println!("Mirroring enabled: {}", state.common_file_system_enabled);
    println!("Tracked items:     {}", state.tree.len());

    let files = state.tree.iter().filter(|(_, n)| !n.is_directory).count();
    let dirs = state.tree.len() - files;
    println!("  files:           {}", files);
    println!("  directories:     {}", dirs);
    Ok(())
}

fn display_opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("(not set)")
}
