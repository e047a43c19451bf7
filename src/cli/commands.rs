//! CLI command implementations
//!
//! File commands open the lix file, act on it in memory and write it back
//! only when something changed. Each prints one JSON response.

use std::fs;
use std::path::Path;

use serde_json::{json, Value};

use crate::engine::{Lix, LixConfig};
use crate::observability::Logger;
use crate::storage::json_to_sql;
use crate::sync::{ensure_read_only, LspServer, ServerConfig};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Parse arguments and run the command
///
/// Failures are also reported as a JSON error response on stdout.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    let result = run_command(cli.command);
    if let Err(e) = &result {
        write_error(e.code_str(), e.message())?;
    }
    result
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { path, config } => init(&path, config.as_deref()),
        Command::Query { path, sql, params } => query(&path, &sql, &params),
        Command::Versions { path } => versions(&path),
        Command::Serve { config, port } => serve(config.as_deref(), port),
    }
}

pub fn init(path: &Path, config_path: Option<&Path>) -> CliResult<()> {
    write_response(init_file(path, config_path)?)
}

pub fn query(path: &Path, sql: &str, params: &str) -> CliResult<()> {
    write_response(query_file(path, sql, params)?)
}

pub fn versions(path: &Path) -> CliResult<()> {
    write_response(list_file_versions(path)?)
}

/// Run the sync server until it fails
pub fn serve(config_path: Option<&Path>, port: Option<u16>) -> CliResult<()> {
    let mut config = match config_path {
        Some(path) => ServerConfig::load(path).map_err(|e| CliError::config_error(e.to_string()))?,
        None => ServerConfig::default(),
    };
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(severity) = config.severity() {
        Logger::set_min_severity(severity);
    }

    let server = LspServer::new(config)?;
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::serve_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        server
            .start()
            .await
            .map_err(|e| CliError::serve_failed(format!("sync server failed: {}", e)))
    })
}

fn init_file(path: &Path, config_path: Option<&Path>) -> CliResult<Value> {
    if path.exists() {
        return Err(CliError::already_initialized(path));
    }
    let config = match config_path {
        Some(config_path) => {
            LixConfig::load(config_path).map_err(|e| CliError::config_error(e.to_string()))?
        }
        None => LixConfig::default(),
    };

    let mut lix = Lix::open(config)?;
    save(&mut lix, path)?;
    Ok(json!({
        "lix_id": lix.lix_id(),
        "path": path.display().to_string(),
    }))
}

fn query_file(path: &Path, sql: &str, params: &str) -> CliResult<Value> {
    let params: Vec<Value> = serde_json::from_str(params)
        .map_err(|e| CliError::config_error(format!("--params must be a JSON array: {}", e)))?;
    let params: Vec<_> = params.iter().map(json_to_sql).collect();

    let mut lix = load(path)?;
    let result = lix.execute(sql, &params)?;
    if ensure_read_only(sql, &params).is_err() {
        save(&mut lix, path)?;
    }

    Ok(json!({
        "columns": result.columns,
        "rows": result.to_json_rows(),
        "rows_affected": result.rows_affected,
    }))
}

fn list_file_versions(path: &Path) -> CliResult<Value> {
    let lix = load(path)?;
    let active = lix.active_version_id().to_string();
    let versions: Vec<Value> = lix
        .versions()?
        .into_iter()
        .map(|version| {
            let is_active = version.id == active;
            let mut value = serde_json::to_value(version).unwrap_or(Value::Null);
            if let Some(object) = value.as_object_mut() {
                object.insert("active".to_string(), Value::Bool(is_active));
            }
            value
        })
        .collect();
    Ok(json!({ "versions": versions }))
}

fn load(path: &Path) -> CliResult<Lix> {
    if !path.exists() {
        return Err(CliError::not_initialized(path));
    }
    let blob = fs::read(path)
        .map_err(|e| CliError::io_error(format!("Failed to read {}: {}", path.display(), e)))?;
    Ok(Lix::open_from_blob(&blob, LixConfig::default())?)
}

/// Write through a sibling temp file so a failed write keeps the old file
fn save(lix: &mut Lix, path: &Path) -> CliResult<()> {
    let blob = lix.to_blob()?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, &blob)
        .map_err(|e| CliError::io_error(format!("Failed to write {}: {}", path.display(), e)))?;
    fs::rename(&tmp, path)
        .map_err(|e| CliError::io_error(format!("Failed to replace {}: {}", path.display(), e)))?;
    Ok(())
}
