//! `output`: outputs as last stored in state.

use indexmap::IndexMap;
use tabled::Tabled;

use stackform_core::OutputValue;

use crate::cli::{GlobalOpts, OutputArgs, OutputFormat};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct OutputRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

pub fn handle(args: OutputArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let state = super::open_state(global)?;
    let outputs: IndexMap<String, OutputValue> =
        stackform_core::output::stored(state.outputs());

    if let Some(name) = args.name {
        let value = outputs.get(&name).ok_or_else(|| CliError::NotFound {
            what: "output".into(),
            identifier: name.clone(),
            list_command: "output".into(),
        })?;
        let out =
            output::render_single(global.output, value, OutputValue::render, OutputValue::render)?;
        output::print_output(&out, global.quiet);
        return Ok(());
    }

    if outputs.is_empty() && global.output == OutputFormat::Table {
        if !global.quiet {
            eprintln!("No outputs recorded. Run: stackform apply");
        }
        return Ok(());
    }

    let entries: Vec<(String, OutputValue)> = outputs.into_iter().collect();
    let out = match global.output {
        OutputFormat::Json | OutputFormat::JsonCompact | OutputFormat::Yaml => {
            let map: IndexMap<&str, &OutputValue> =
                entries.iter().map(|(k, v)| (k.as_str(), v)).collect();
            output::render_single(global.output, &map, |_| String::new(), |_| String::new())?
        }
        _ => output::render_list(
            global.output,
            &entries,
            |(name, value)| OutputRow {
                name: name.clone(),
                value: value.render(),
            },
            |(name, value)| format!("{name}={}", value.render()),
        )?,
    };
    output::print_output(&out, global.quiet);
    Ok(())
}
