use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;

/// Platform base directory: `%APPDATA%` on Windows, `$HOME` elsewhere.
fn platform_base() -> Result<PathBuf> {
    #[cfg(target_os = "windows")]
    let var = "APPDATA";
    #[cfg(not(target_os = "windows"))]
    let var = "HOME";

    env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("environment variable {var} is not set"))
}

/// Expand a leading `~` against the platform base directory.
fn expand_tilde(raw: &str) -> Result<PathBuf> {
    if raw == "~" {
        return platform_base();
    }
    if let Some(rest) = raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
        return Ok(platform_base()?.join(rest));
    }
    Ok(PathBuf::from(raw))
}

/// Resolve the client home directory into an absolute path.
///
/// - `None` resolves to `<platform base>/<default_subdir>`.
/// - `~` prefixes are expanded; relative paths are joined onto the current dir.
/// - When `create` is set the directory is created if missing.
pub fn resolve_home_dir(
    configured: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf> {
    let mut path = match configured {
        Some(raw) => expand_tilde(raw.trim())?,
        None => platform_base()?.join(default_subdir),
    };

    if path.is_relative() {
        path = env::current_dir()
            .context("cannot read current directory")?
            .join(path);
    }

    if create {
        std::fs::create_dir_all(&path)
            .with_context(|| format!("cannot create home dir {}", path.display()))?;
    }
    Ok(path)
}
