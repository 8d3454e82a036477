// ── Concrete stacks ──
//
// Stack definitions shipped with the engine. Each module exposes a
// `STACK_NAME` and a `definition()` constructor.

pub mod llm_serving;

use crate::error::CoreError;
use crate::model::StackDefinition;

/// Every bundled stack, by name.
pub const STACKS: &[&str] = &[llm_serving::STACK_NAME];

/// Look up a bundled stack by name.
pub fn by_name(name: &str) -> Result<StackDefinition, CoreError> {
    match name {
        llm_serving::STACK_NAME => llm_serving::definition(),
        other => Err(CoreError::Config {
            message: format!("unknown stack '{other}' (available: {})", STACKS.join(", ")),
        }),
    }
}
