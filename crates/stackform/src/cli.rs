//! Clap derive structures for the `stackform` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// stackform -- converge a declared cloud stack
#[derive(Debug, Parser)]
#[command(
    name = "stackform",
    version,
    about = "Plan, apply, and destroy a declared cloud stack",
    long_about = "Builds a dependency graph from the bundled stack declarations,\n\
        diffs it against recorded state, and converges the control plane.\n\n\
        Use --sandbox to run against an in-process simulation.",
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
    /// Configuration profile to use
    #[arg(long, short = 'p', env = "STACKFORM_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Bundled stack to operate on
    #[arg(long, env = "STACKFORM_STACK", default_value = "llm-serving", global = true)]
    pub stack: String,

    /// Run against the in-process sandbox instead of the profile endpoint
    #[arg(long, global = true)]
    pub sandbox: bool,

    /// State file path (overrides profile)
    #[arg(long, env = "STACKFORM_STATE", global = true)]
    pub state: Option<PathBuf>,

    /// Control-plane region (overrides profile)
    #[arg(long, env = "STACKFORM_REGION", global = true)]
    pub region: Option<String>,

    /// Set a variable: --var name=value (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE", global = true)]
    pub vars: Vec<String>,

    /// TOML file of variable values (overrides profile vars_file)
    #[arg(long, value_name = "PATH", global = true)]
    pub var_file: Option<PathBuf>,

    /// Refresh state from the platform before planning
    #[arg(long, value_name = "BOOL", global = true)]
    pub refresh: Option<bool>,

    /// Maximum resources in flight at once
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Per-call timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Retries for transient platform errors
    #[arg(long, global = true)]
    pub max_retries: Option<usize>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "STACKFORM_OUTPUT",
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

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table or plan listing (default)
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
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
    /// Check declarations and variables without calling the platform
    Validate,

    /// Show what an apply would change
    Plan(PlanArgs),

    /// Converge the platform to the declared stack
    Apply(TargetArgs),

    /// Delete everything recorded in state
    Destroy(TargetArgs),

    /// Show stored outputs
    #[command(alias = "outputs")]
    Output(OutputArgs),

    /// Show the dependency graph in apply order
    Graph(GraphArgs),

    /// Update state from what the platform reports
    Refresh,

    /// Inspect or edit recorded state
    State(StateArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Plan / Apply / Destroy ───────────────────────────────────────────

#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Limit the run to these addresses (and what they need or feed)
    #[arg(long = "target", value_name = "ADDRESS")]
    pub targets: Vec<String>,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Plan a destroy instead of an apply
    #[arg(long)]
    pub destroy: bool,
}

// ── Output ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// A single output to print
    pub name: Option<String>,
}

// ── Graph ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GraphArgs {
    /// Emit Graphviz DOT instead of a table
    #[arg(long)]
    pub dot: bool,
}

// ── State ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StateArgs {
    #[command(subcommand)]
    pub command: StateCommand,
}

#[derive(Debug, Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    #[command(alias = "ls")]
    List,

    /// Show one recorded resource
    Show {
        /// Resource address, e.g. aws_lb.shared
        address: String,
    },

    /// Forget resources without deleting them from the platform
    Rm {
        /// Resource addresses
        #[arg(required = true)]
        addresses: Vec<String>,
    },
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Interactive configuration wizard
    Init,

    /// Show the current configuration
    Show,

    /// List configured profiles
    Profiles,

    /// Make a profile the default
    Use {
        /// Profile name
        name: String,
    },

    /// Store a sensitive variable in the system keyring
    SetSecret {
        /// Variable name, e.g. webui_secret_key
        variable: String,

        /// Read the value from stdin instead of prompting
        #[arg(long)]
        stdin: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}
