//! Command dispatch: bridges CLI args -> engine calls -> output formatting.

pub mod apply;
pub mod config_cmd;
pub mod graph;
pub mod output_cmd;
pub mod plan;
pub mod refresh;
pub mod state;
pub mod util;
pub mod validate;

use std::path::PathBuf;

use stackform_core::{
    AnyPlatform, CoreError, Engine, StackDefinition, StateStore, VariableBindings, stack,
};

use crate::cli::{Command, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output::Painter;

/// Dispatch a stack command to the appropriate handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Validate => validate::handle(global),
        Command::Plan(args) => plan::handle(args, global).await,
        Command::Apply(args) => apply::handle_apply(args, global).await,
        Command::Destroy(args) => apply::handle_destroy(args, global).await,
        Command::Output(args) => output_cmd::handle(args, global),
        Command::Graph(args) => graph::handle(&args, global),
        Command::Refresh => refresh::handle(global).await,
        Command::State(args) => state::handle(args, global),
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "config and completions are not stack commands".into(),
        )),
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// Everything a platform-bound command needs for one run.
pub struct Session {
    pub engine: Engine<AnyPlatform>,
    pub stack: StackDefinition,
    pub bindings: VariableBindings,
    pub state: StateStore,
    pub painter: Painter,
    sandbox_snapshot: Option<PathBuf>,
}

impl Session {
    /// Resolve the profile, bindings, and state, then connect.
    pub fn open(global: &GlobalOpts) -> Result<Self, CliError> {
        let resolved = config::resolve(global)?;
        let stack = stack::by_name(&global.stack)?;
        let bindings = config::bindings(global, &resolved, &stack)?;
        let state = StateStore::open(&resolved.state_path, &stack.name)?;
        let engine = Engine::connect(resolved.engine)?;
        Ok(Self {
            engine,
            stack,
            bindings,
            state,
            painter: Painter::new(global.color),
            sandbox_snapshot: resolved.sandbox_snapshot,
        })
    }

    /// Write the sandbox's resources beside the state file so the next
    /// run sees them. No-op against a real control plane.
    pub fn save_sandbox(&self) -> Result<(), CliError> {
        if let Some(path) = &self.sandbox_snapshot {
            self.engine
                .platform()
                .persist(path)
                .map_err(CoreError::from)?;
        }
        Ok(())
    }
}

/// Recorded state for the selected stack, without connecting anywhere.
pub fn open_state(global: &GlobalOpts) -> Result<StateStore, CliError> {
    let resolved = config::resolve(global)?;
    let stack = stack::by_name(&global.stack)?;
    Ok(StateStore::open(&resolved.state_path, &stack.name)?)
}
