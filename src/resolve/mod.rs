//! Default configuration-directory resolution
//!
//! Consulted only when no explicit directory is given; the store receives
//! the result as injected configuration and never reads the environment
//! itself.

use std::env;
use std::path::PathBuf;

/// Resolves the default configuration directory for the given program name.
///
/// Honors `$XDG_CONFIG_HOME` when set. Otherwise prefers an existing
/// `~/.config/<name>`, then an existing `~/.<name>`, and falls back to
/// `~/.config/<name>` whether or not it exists yet.
pub fn resolve_config_dir(name: &str) -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join(name);
        }
    }

    let home = match dirs::home_dir() {
        Some(home) => home,
        None => return PathBuf::from(".").join(name),
    };

    let config = home.join(".config");
    if config.exists() {
        return config.join(name);
    }

    let dotted = home.join(format!(".{}", name));
    if dotted.exists() {
        return dotted;
    }

    config.join(name)
}

/// Name of the current executable, the default program name for directory
/// resolution.
pub fn executable_name() -> String {
    env::current_exe()
        .ok()
        .and_then(|path| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "confmap".to_string())
}
