//! Clap derive structures for the `ambientika` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// ambientika -- mirror Ambientika zones and rooms into floors and areas
#[derive(Debug, Parser)]
#[command(
    name = "ambientika",
    version,
    about = "Sync Ambientika zones and rooms into a local floor/area hierarchy",
    long_about = "Keeps a local floor/area hierarchy in step with the zones and rooms of an\n\
        Ambientika house, keeps each zone's master/slave roles consistent, and\n\
        shows what every slave device should display.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// House profile to use
    #[arg(long, short = 'p', env = "AMBIENTIKA_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Cloud service URL (overrides profile)
    #[arg(long, env = "AMBIENTIKA_API_URL", global = true)]
    pub api_url: Option<String>,

    /// House id (overrides profile)
    #[arg(long, env = "AMBIENTIKA_HOUSE_ID", global = true)]
    pub house: Option<i64>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "AMBIENTIKA_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "AMBIENTIKA_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one sync of zones to floors and rooms to areas
    Sync(SyncArgs),

    /// Show per-zone master status and the last run
    #[command(alias = "st")]
    Status,

    /// Show what every device should display
    Display,

    /// Make a device the master of its zone
    SetMaster(SetMasterArgs),

    /// Keep syncing on an interval until interrupted
    Watch(WatchArgs),

    /// List houses visible to the account
    Houses,

    /// Show the floors and areas this tool maintains
    #[command(alias = "ls")]
    Local,

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SYNC
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Re-apply remote names to every owned floor and area
    #[arg(long)]
    pub force: bool,

    /// Do not create floors for unmapped zones
    #[arg(long)]
    pub no_create_floors: bool,

    /// Do not create areas for unmapped rooms
    #[arg(long)]
    pub no_create_areas: bool,
}

#[derive(Debug, Args)]
pub struct SetMasterArgs {
    /// Zone id
    pub zone: i64,

    /// Serial number of the new master
    pub serial: String,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Minutes between runs (overrides profile)
    #[arg(long, short = 'i')]
    pub interval: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current configuration (secrets masked)
    Show,

    /// Print the config file path
    Path,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store the active profile's password in the system keyring
    SetPassword,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
