use std::path::Path;

use crate::app::config::HdcSettings;
use crate::app::error::AppError;
use crate::app::hdc::runner::HdcBridge;

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|candidate| candidate.strip_suffix('"'))
    {
        return inner.trim().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|candidate| candidate.strip_suffix('\''))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

pub fn resolve_hdc_program(config_command_path: &str) -> String {
    let normalized = normalize_command_path(config_command_path);
    if normalized.is_empty() {
        "hdc".to_string()
    } else {
        normalized
    }
}

pub fn validate_hdc_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("HDC command is empty".to_string());
    }
    if program == "hdc" {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err("HDC path must point to an executable file".to_string());
    }
    if !path.exists() {
        return Err("HDC executable not found at the configured path".to_string());
    }
    Ok(())
}

/// Resolves and checks the configured hdc binary, then targets the configured device.
pub fn bridge_from_settings(settings: &HdcSettings, trace_id: &str) -> Result<HdcBridge, AppError> {
    let program = resolve_hdc_program(&settings.command_path);
    validate_hdc_program(&program).map_err(|message| AppError::dependency(message, trace_id))?;
    let connect_key = Some(settings.connect_key.trim().to_string()).filter(|key| !key.is_empty());
    Ok(HdcBridge::new(program, connect_key))
}
