//! Runtime configuration.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `CONFGEN_*` environment variables, then command line flags. A bare
//! `confgen SOURCE [DEST]` invocation with no config file defines a single
//! template job from the positional arguments and hook flags.

use crate::cli::Cli;
use crate::error::ConfigError;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_METADATA_URL: &str = "http://metadata.internal";
pub const DEFAULT_METADATA_VERSION: &str = "latest";
pub const DEFAULT_INTERVAL_SECS: u64 = 5;

/// One template-to-destination pipeline.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TemplateJob {
    /// Template file to render.
    pub source: PathBuf,

    /// Destination path; stdout when absent.
    #[serde(default)]
    pub dest: Option<PathBuf>,

    /// Validation command run against the staging file, with `{{staging}}`
    /// expanding to the staging path. Non-zero exit aborts the publish.
    #[serde(default)]
    pub check_cmd: Option<String>,

    /// Command run after the destination changed.
    #[serde(default)]
    pub notify_cmd: Option<String>,

    /// Log the notify command's output.
    #[serde(default)]
    pub notify_output: bool,

    /// Command run after the job's render and publish succeeded, even when
    /// the output was unchanged. Skipped when the job failed.
    #[serde(default)]
    pub update_cmd: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Polling interval in seconds.
    pub interval: u64,

    /// Base URL of the metadata service.
    pub metadata_url: String,

    /// Metadata API version path segment.
    pub metadata_version: String,

    /// Render once and exit instead of polling.
    pub onetime: bool,

    /// Accepted for compatibility; stopped containers are always included
    /// in the context and filtered in templates.
    pub include_inactive: bool,

    /// Container UUID to resolve as self, overriding the metadata answer.
    #[serde(default)]
    pub self_id: Option<String>,

    /// Template jobs, `[[template]]` tables in the config file.
    #[serde(rename = "template", default)]
    pub templates: Vec<TemplateJob>,
}

impl Settings {
    /// Load settings from defaults, the optional config file, environment
    /// variables and CLI flags, in increasing precedence.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("interval", DEFAULT_INTERVAL_SECS)?
            .set_default("metadata_url", DEFAULT_METADATA_URL)?
            .set_default("metadata_version", DEFAULT_METADATA_VERSION)?
            .set_default("onetime", false)?
            .set_default("include_inactive", false)?;

        if let Some(path) = &cli.config {
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
        }

        builder = builder.add_source(Environment::with_prefix("CONFGEN").try_parsing(true));

        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.apply_cli(cli);
        settings.validate()?;

        Ok(settings)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(url) = &cli.metadata_url {
            self.metadata_url = url.clone();
        }
        if let Some(version) = &cli.metadata_version {
            self.metadata_version = version.clone();
        }
        if let Some(interval) = cli.interval {
            self.interval = interval;
        }
        if cli.onetime {
            self.onetime = true;
        }
        if cli.include_inactive {
            self.include_inactive = true;
        }
        if let Some(self_id) = &cli.self_id {
            self.self_id = Some(self_id.clone());
        }

        // positional source defines a single job when no file provided any
        if let Some(source) = &cli.source {
            self.templates = vec![TemplateJob {
                source: source.clone(),
                dest: cli.dest.clone(),
                check_cmd: cli.check_cmd.clone(),
                notify_cmd: cli.notify_cmd.clone(),
                notify_output: cli.notify_output,
                update_cmd: None,
            }];
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval == 0 {
            return Err(ConfigError::Invalid(
                "interval must be greater than 0".to_string(),
            ));
        }
        if self.templates.is_empty() {
            return Err(ConfigError::Invalid(
                "no template configured, pass a source file or a config file with [[template]] tables".to_string(),
            ));
        }
        for job in &self.templates {
            if job.source.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "template source must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;
    use tempfile::TempDir;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["confgen"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_defaults_with_positional_template() {
        let settings = Settings::load(&cli(&["app.tmpl"])).unwrap();

        assert_eq!(settings.interval, DEFAULT_INTERVAL_SECS);
        assert_eq!(settings.metadata_url, DEFAULT_METADATA_URL);
        assert_eq!(settings.metadata_version, DEFAULT_METADATA_VERSION);
        assert!(!settings.onetime);
        assert_eq!(settings.templates.len(), 1);
        assert_eq!(settings.templates[0].source.to_str().unwrap(), "app.tmpl");
        assert!(settings.templates[0].dest.is_none());
    }

    #[test]
    fn test_config_file_with_template_tables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("confgen.toml");
        fs::write(
            &path,
            r#"
interval = 30
metadata_url = "http://meta:8080"
onetime = true

[[template]]
source = "nginx.conf.tmpl"
dest = "/etc/nginx/nginx.conf"
check_cmd = "nginx -t -c {{staging}}"
notify_cmd = "nginx -s reload"
notify_output = true

[[template]]
source = "haproxy.cfg.tmpl"
"#,
        )
        .unwrap();

        let settings =
            Settings::load(&cli(&["--config", path.to_str().unwrap()])).unwrap();

        assert_eq!(settings.interval, 30);
        assert_eq!(settings.metadata_url, "http://meta:8080");
        assert!(settings.onetime);
        assert_eq!(settings.templates.len(), 2);
        assert_eq!(
            settings.templates[0].check_cmd.as_deref(),
            Some("nginx -t -c {{staging}}")
        );
        assert!(settings.templates[0].notify_output);
        assert!(settings.templates[1].dest.is_none());
    }

    #[test]
    fn test_cli_flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("confgen.toml");
        fs::write(
            &path,
            r#"
interval = 30

[[template]]
source = "a.tmpl"
"#,
        )
        .unwrap();

        let settings = Settings::load(&cli(&[
            "--config",
            path.to_str().unwrap(),
            "--interval",
            "7",
            "--onetime",
        ]))
        .unwrap();

        assert_eq!(settings.interval, 7);
        assert!(settings.onetime);
    }

    #[test]
    fn test_positional_source_replaces_file_templates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("confgen.toml");
        fs::write(&path, "[[template]]\nsource = \"a.tmpl\"\n").unwrap();

        let settings = Settings::load(&cli(&[
            "--config",
            path.to_str().unwrap(),
            "--notify-cmd",
            "reload",
            "b.tmpl",
            "out.conf",
        ]))
        .unwrap();

        assert_eq!(settings.templates.len(), 1);
        assert_eq!(settings.templates[0].source.to_str().unwrap(), "b.tmpl");
        assert_eq!(settings.templates[0].dest.as_ref().unwrap().to_str().unwrap(), "out.conf");
        assert_eq!(settings.templates[0].notify_cmd.as_deref(), Some("reload"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = Settings::load(&cli(&["--interval", "0", "a.tmpl"]));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_no_templates_rejected() {
        let result = Settings::load(&cli(&[]));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
