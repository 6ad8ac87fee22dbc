use std::path::Path;

use anyhow::Context;
use jn_core::{paths::default_config_path, Config, Paths};

/// Print where config and data live, followed by the effective config.
pub fn show(config: &Config, override_path: Option<&Path>, paths: &Paths) -> anyhow::Result<()> {
    print!("{}", render(config, override_path, paths)?);
    Ok(())
}

fn render(config: &Config, override_path: Option<&Path>, paths: &Paths) -> anyhow::Result<String> {
    let config_path = override_path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    let body = config.to_toml().context("failed to serialize config")?;

    Ok(format!(
        "# config file: {}\n# data dir:    {}\n\n{body}",
        config_path.display(),
        paths.root().display(),
    ))
}
