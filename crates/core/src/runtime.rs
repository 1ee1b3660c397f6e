//! Library-surface diagnostics for embedding hosts — a `doctor`-style check
//! a host can run at startup instead of only discovering a bad config or an
//! unwritable state directory once the first session tries to append.
//!
//! Grounded on the teacher's `cli/doctor.rs` (`check_config_validation`,
//! `check_workspace`'s writability probe), generalized from a CLI command
//! that prints and returns `Ok(bool)` into a library function a host's own
//! CLI or startup path can call and format itself.

pub mod diagnostics {
    use tron_domain::config::{Config, ConfigError, ConfigSeverity};

    /// Runs every diagnostic check against `config` and returns the combined
    /// list of issues. An empty result means the configuration and durable
    /// log path are both usable as-is.
    pub fn doctor(config: &Config) -> Vec<ConfigError> {
        let mut issues = config.validate();
        if let Some(issue) = check_state_path_writable(config) {
            issues.push(issue);
        }
        issues
    }

    fn check_state_path_writable(config: &Config) -> Option<ConfigError> {
        let path = &config.workspace.state_path;

        if std::fs::create_dir_all(path).is_err() {
            return Some(ConfigError {
                severity: ConfigSeverity::Error,
                field: "workspace.state_path".into(),
                message: format!("{} could not be created", path.display()),
            });
        }

        let probe = path.join(".tron_doctor_probe");
        let writable = std::fs::write(&probe, b"probe").is_ok();
        let _ = std::fs::remove_file(&probe);

        if writable {
            None
        } else {
            Some(ConfigError {
                severity: ConfigSeverity::Error,
                field: "workspace.state_path".into(),
                message: format!("{} is not writable", path.display()),
            })
        }
    }

}
