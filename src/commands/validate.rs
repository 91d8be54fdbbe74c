use super::Host;
use super::config::Config;
use crate::Result;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use std::io::Write;

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file (default is `contrib-rank.toml`)
    #[arg(value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,
}

pub fn validate_config<H: Host>(host: &mut H, args: &ValidateArgs) -> Result<()> {
    let config_path = args.config.as_ref();

    match Config::load(Utf8Path::new("."), config_path) {
        Ok(config) => {
            let _ = writeln!(host.output(), "Configuration file is valid");
            if let Some(path) = config_path {
                let _ = writeln!(host.output(), "Config file: {path}");
            } else {
                let _ = writeln!(host.output(), "Using default configuration (no config file found)");
            }

            if config.organizations.is_empty() {
                let _ = writeln!(host.output(), "No organizations configured; pass them with --org when analyzing");
            }
            Ok(())
        }
        Err(e) => {
            let _ = writeln!(host.error(), "Configuration validation failed: {e}");
            host.exit(1);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::host::TestHost;
    use crate::commands::init::{InitArgs, init_config};

    fn write_config(dir: &tempfile::TempDir, name: &str, text: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap();
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_generated_config_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("contrib-rank.toml")).unwrap();

        let mut init_host = TestHost::new();
        init_config(&mut init_host, &InitArgs { output: Some(path.clone()) }).unwrap();

        let mut host = TestHost::new();
        validate_config(&mut host, &ValidateArgs { config: Some(path) }).unwrap();
        assert!(host.output_text().contains("Configuration file is valid"));
        assert_eq!(host.exit_code, None);
    }

    #[test]
    fn test_invalid_toml_syntax() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "bad.toml", "[weights\nreviews = 1.0\n");

        let mut host = TestHost::new();
        let _ = validate_config(&mut host, &ValidateArgs { config: Some(path) }).unwrap_err();
        assert_eq!(host.exit_code, Some(1));
        assert!(host.error_text().contains("validation failed"));
    }

    #[test]
    fn test_unknown_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "unknown.toml", "organizations = [\"acme\"]\nstars = 3\n");

        let mut host = TestHost::new();
        let _ = validate_config(&mut host, &ValidateArgs { config: Some(path) }).unwrap_err();
        assert_eq!(host.exit_code, Some(1));
    }

    #[test]
    fn test_out_of_range_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "range.toml", "[fetch]\npage_size = 250\n");

        let mut host = TestHost::new();
        let _ = validate_config(&mut host, &ValidateArgs { config: Some(path) }).unwrap_err();
    }

    #[test]
    fn test_empty_config_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "empty.toml", "# nothing here\n");

        let mut host = TestHost::new();
        validate_config(&mut host, &ValidateArgs { config: Some(path) }).unwrap();
        assert!(host.output_text().contains("No organizations configured"));
    }
}
