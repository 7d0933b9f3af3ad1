//! CLI argument definitions for netsentry-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// netsentry network monitoring daemon.
///
/// Captures traffic on the configured interfaces, tracks flows and
/// statistics, runs signature and anomaly detection, and persists alerts.
#[derive(Parser, Debug)]
#[command(name = "netsentry-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to netsentry.toml configuration file.
    #[arg(short, long, default_value = "/etc/netsentry/netsentry.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,

    /// Override any configuration value with a dotted path.
    ///
    /// Example: `--set alert_engine.max_alerts_per_hour=50`. May be repeated.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,
}

impl DaemonCli {
    /// All configuration overrides in application order.
    ///
    /// The dedicated flags are applied after `--set`, so they win.
    pub fn config_overrides(&self) -> Vec<String> {
        let mut overrides = self.overrides.clone();
        if let Some(level) = &self.log_level {
            overrides.push(format!("general.log_level={}", quote(level)));
        }
        if let Some(format) = &self.log_format {
            overrides.push(format!("general.log_format={}", quote(format)));
        }
        if let Some(pid_file) = &self.pid_file {
            overrides.push(format!("general.pid_file={}", quote(pid_file)));
        }
        overrides
    }
}

/// Render a value as a TOML basic string.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = DaemonCli::parse_from(["netsentry-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/netsentry/netsentry.toml"));
        assert!(!cli.validate);
        assert!(cli.config_overrides().is_empty());
    }

    #[test]
    fn test_repeated_set_and_dedicated_flags() {
        let cli = DaemonCli::parse_from([
            "netsentry-daemon",
            "--set",
            "alert_engine.max_alerts_per_hour=50",
            "--set",
            "traffic_analyzer.queue_capacity=20",
            "--log-level",
            "debug",
            "--pid-file",
            "/tmp/n.pid",
        ]);
        assert_eq!(
            cli.config_overrides(),
            vec![
                "alert_engine.max_alerts_per_hour=50".to_owned(),
                "traffic_analyzer.queue_capacity=20".to_owned(),
                "general.log_level=\"debug\"".to_owned(),
                "general.pid_file=\"/tmp/n.pid\"".to_owned(),
            ]
        );
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote(r#"C:\a"b"#), r#""C:\\a\"b""#);
    }
}
