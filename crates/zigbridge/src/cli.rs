//! Clap derive structures for the `zigbridge` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// zigbridge -- deCONZ ZigBee gateway to MQTT bridge
#[derive(Debug, Parser)]
#[command(
    name = "zigbridge",
    version,
    about = "Bridge deCONZ ZigBee gateway events to MQTT",
    long_about = "Polls a deCONZ gateway's REST API, follows its event WebSocket,\n\
        enriches each event with the device's stable name, and republishes\n\
        it to an MQTT broker under a configurable topic prefix.",
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
    /// Settings file (TOML or JSON)
    #[arg(long, short = 'c', env = "ZIGBRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log outbound messages instead of publishing them
    #[arg(long, global = true)]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

// ── Output ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table
    #[default]
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bridge until interrupted
    Run,

    /// Poll the gateway once and list its devices
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Validate settings and print the resolved configuration
    Check,

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct DevicesArgs {
    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    pub output: OutputFormat,

    /// List every endpoint instead of one row per device
    #[arg(long, short = 'e')]
    pub endpoints: bool,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}
