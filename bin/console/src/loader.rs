//! Loading flows and module configuration from disk.
//!
//! Flows live at `<flows_dir>/<bot_id>/<flow_name>.json`. The file stem must
//! match the flow's `name`.

use crate::error::ConsoleError;
use parley_core::{BotId, StaticConfigReader};
use parley_dialog::{Flow, InMemoryFlowProvider};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Loads every flow under `dir`.
///
/// A missing directory yields an empty provider.
///
/// # Errors
///
/// Returns [`ConsoleError::FlowLoad`] if a directory or file cannot be read,
/// a directory name is not a valid bot id, or a flow does not validate.
pub fn load_flows(dir: &Path) -> parley_core::Result<InMemoryFlowProvider, ConsoleError> {
    let provider = InMemoryFlowProvider::new();
    if !dir.exists() {
        warn!(dir = %dir.display(), "flows directory does not exist, no flows loaded");
        return Ok(provider);
    }

    let mut loaded = 0usize;
    for bot_dir in read_dir_sorted(dir)? {
        if !bot_dir.is_dir() {
            continue;
        }
        let bot_id = bot_dir
            .file_name()
            .and_then(|name| name.to_str())
            .map(BotId::try_new)
            .transpose()
            .map_err(|e| ConsoleError::FlowLoad {
                path: bot_dir.clone(),
                details: e.to_string(),
            })?;
        let Some(bot_id) = bot_id else {
            warn!(path = %bot_dir.display(), "skipping directory with a non-UTF-8 name");
            continue;
        };

        for path in read_dir_sorted(&bot_dir)? {
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let flow = load_flow(&path)?;
            debug!(bot = %bot_id, flow = flow.name(), nodes = flow.node_count(), "flow loaded");
            provider.insert(bot_id.clone(), flow);
            loaded += 1;
        }
    }

    info!(flows = loaded, dir = %dir.display(), "flows loaded");
    Ok(provider)
}

fn load_flow(path: &Path) -> parley_core::Result<Flow, ConsoleError> {
    let flow_error = |details: String| ConsoleError::FlowLoad {
        path: path.to_path_buf(),
        details,
    };

    let json = fs::read_to_string(path).map_err(|e| flow_error(e.to_string()))?;
    let flow = Flow::from_json(&json).map_err(|e| flow_error(e.to_string()))?;

    let stem = path.file_stem().and_then(|stem| stem.to_str());
    if stem != Some(flow.name()) {
        return Err(flow_error(format!(
            "file name does not match flow name '{}'",
            flow.name()
        ))
        .into());
    }
    Ok(flow)
}

fn read_dir_sorted(dir: &Path) -> parley_core::Result<Vec<PathBuf>, ConsoleError> {
    let entries = fs::read_dir(dir).map_err(|e| ConsoleError::FlowLoad {
        path: dir.to_path_buf(),
        details: e.to_string(),
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConsoleError::FlowLoad {
            path: dir.to_path_buf(),
            details: e.to_string(),
        })?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

/// Loads the module configuration document, or an empty one if no file is
/// configured.
///
/// # Errors
///
/// Returns [`ConsoleError::ModuleConfig`] if the file cannot be read or
/// parsed.
pub fn load_module_config(
    path: Option<&Path>,
) -> parley_core::Result<StaticConfigReader, ConsoleError> {
    let Some(path) = path else {
        return Ok(StaticConfigReader::new());
    };
    let module_error = |details: String| ConsoleError::ModuleConfig {
        path: path.to_path_buf(),
        details,
    };

    let json = fs::read_to_string(path).map_err(|e| module_error(e.to_string()))?;
    let reader = StaticConfigReader::from_json(&json).map_err(|e| module_error(e.to_string()))?;
    info!(path = %path.display(), "module configuration loaded");
    Ok(reader)
}
