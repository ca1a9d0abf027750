use anyhow::{Context, Result};
use directories::ProjectDirs;
use hoplink_core::control::NodeConfig;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "hoplink-node.toml";

const QUALIFIER: &str = "org";
const ORGANIZATION: &str = "Hoplink";
const APPLICATION: &str = "Hoplink";

pub fn default_config_path() -> Result<PathBuf> {
    let proj = ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
        .context("could not determine platform config directory")?;
    Ok(proj.config_dir().join(CONFIG_FILE_NAME))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Load the node config, falling back to defaults when the file is missing.
pub fn load(path: &Path) -> Result<NodeConfig> {
    if !path.exists() {
        return Ok(NodeConfig::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse TOML: {}", path.display()))
}

pub fn save(path: &Path, cfg: &NodeConfig, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        anyhow::bail!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    ensure_parent_dir(path)?;
    let raw = toml::to_string_pretty(cfg).context("failed to serialize config to TOML")?;
    fs::write(path, raw).with_context(|| format!("failed to write config: {}", path.display()))
}
