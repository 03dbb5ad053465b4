use crate::output::Output;
use crate::ConfigCommands;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use reelshelf_config::{Config, PathManager};
use serde_json::json;
use std::path::PathBuf;

pub fn run_config(cmd: ConfigCommands, config_override: Option<PathBuf>, output: &Output) -> Result<()> {
    let paths = PathManager::default();
    let uses_default_location = config_override.is_none();
    let config_file = config_override.unwrap_or_else(|| paths.config_file());

    match cmd {
        ConfigCommands::Show => {
            let config = Config::load_or_default(&config_file)
                .map_err(|e| eyre!("Failed to load config from {}: {}", config_file.display(), e))?;
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| eyre!("Failed to render config: {}", e))?;
            let valid = config.validate();

            output.json(&json!({
                "path": config_file.display().to_string(),
                "exists": config_file.exists(),
                "valid": valid.is_ok(),
                "config": serde_json::to_value(&config)?,
            }));
            if output.is_human() {
                if !config_file.exists() {
                    output.info(format!("# {} does not exist, showing defaults", config_file.display()));
                }
                output.info(rendered);
            }
            if let Err(e) = valid {
                output.error(format!("Validation error: {}", e));
            }
        }
        ConfigCommands::Init { force } => {
            if config_file.exists() && !force {
                output.warn(format!("{} already exists (use --force to overwrite)", config_file.display()));
                return Ok(());
            }
            if uses_default_location {
                paths
                    .ensure_directories()
                    .map_err(|e| eyre!("Failed to create application directories: {}", e))?;
            }
            Config::default()
                .save_to_file(&config_file)
                .map_err(|e| eyre!("Failed to write config to {}: {}", config_file.display(), e))?;
            output.success(format!("Wrote default configuration to {}", config_file.display()));
        }
        ConfigCommands::Path => {
            output.json(&json!({ "path": config_file.display().to_string() }));
            if output.is_human() {
                output.info(config_file.display().to_string());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;

    fn quiet_output() -> Output {
        Output::new(OutputFormat::Json, true)
    }

    #[test]
    fn test_show_reports_invalid_config_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[routes]\nadmin_prefix = \"/\"\n").unwrap();

        assert!(run_config(ConfigCommands::Show, Some(path), &quiet_output()).is_ok());
    }

    #[test]
    fn test_show_unparseable_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage\n").unwrap();

        assert!(run_config(ConfigCommands::Show, Some(path), &quiet_output()).is_err());
    }

    #[test]
    fn test_init_writes_defaults_and_respects_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        run_config(ConfigCommands::Init { force: false }, Some(path.clone()), &quiet_output()).unwrap();
        let written = Config::load_from_file(&path).unwrap();
        assert_eq!(written.poller.interval_seconds, 60);

        std::fs::write(&path, "[poller]\ninterval_seconds = 5\n").unwrap();
        run_config(ConfigCommands::Init { force: false }, Some(path.clone()), &quiet_output()).unwrap();
        assert_eq!(Config::load_from_file(&path).unwrap().poller.interval_seconds, 5);

        run_config(ConfigCommands::Init { force: true }, Some(path.clone()), &quiet_output()).unwrap();
        assert_eq!(Config::load_from_file(&path).unwrap().poller.interval_seconds, 60);
    }
}
