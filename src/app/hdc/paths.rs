use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const MAX_PACKAGE_NAME_LEN: usize = 128;

/// A bundle name that is safe to splice into a device shell script verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageName(String);

impl PackageName {
    pub fn parse(value: &str) -> Result<Self, String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("package_name is required".to_string());
        }
        if trimmed.len() > MAX_PACKAGE_NAME_LEN {
            return Err(format!(
                "package_name must be at most {MAX_PACKAGE_NAME_LEN} characters"
            ));
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-')))
        {
            return Err(format!("package_name contains invalid character {bad:?}"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn validate_device_path(path: &str) -> Result<(), String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err("device_path is required".to_string());
    }
    if !trimmed.starts_with('/') {
        return Err("device_path must be an absolute device path starting with '/'".to_string());
    }
    if trimmed == "/" {
        return Err("device_path must not be root".to_string());
    }
    if let Some(bad) = trimmed
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '/' | '.' | '_' | '-')))
    {
        return Err(format!("device_path contains invalid character {bad:?}"));
    }
    for segment in trimmed.split('/') {
        if segment == ".." {
            return Err("device_path must not contain '..' segments".to_string());
        }
    }
    Ok(())
}

pub fn sanitize_filename_component(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "case".to_string()
    } else {
        cleaned
    }
}

/// Picks `<case>_<stem>.<ext>` in `dir`, or the first free `<case>_<stem>_<n>.<ext>`.
/// Creates `dir` when missing.
pub fn unique_artifact_path(dir: &Path, case_name: &str, stem: &str, ext: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let case = sanitize_filename_component(case_name);
    let candidate = dir.join(format!("{case}_{stem}.{ext}"));
    if !candidate.exists() {
        return Ok(candidate);
    }
    let mut counter = 1u32;
    loop {
        let candidate = dir.join(format!("{case}_{stem}_{counter}.{ext}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
        counter += 1;
    }
}
