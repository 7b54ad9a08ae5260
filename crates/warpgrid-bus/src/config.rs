//! Bus configuration (`[bus]` table of a TOML file).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BusError, BusResult};

/// Default wait for a handler's first signal, and for each section or
/// element hand-off once streaming.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Duration string such as `"10s"`, `"500ms"` or `"1m"`.
    pub response_timeout: Option<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            response_timeout: Some("10s".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    bus: Option<BusConfig>,
}

impl BusConfig {
    /// Load the `[bus]` table from a TOML file. A missing table yields
    /// the defaults.
    pub fn from_file(path: &Path) -> BusResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BusError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> BusResult<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| BusError::Config(e.to_string()))?;
        let config = file.bus.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> BusResult<()> {
        if let Some(raw) = &self.response_timeout {
            if parse_duration(raw).is_none() {
                return Err(BusError::Config(format!(
                    "response_timeout: cannot parse duration {raw:?}"
                )));
            }
        }
        Ok(())
    }

    /// The effective response timeout.
    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_TIMEOUT)
    }
}

/// Parse `<digits><unit>` with unit `ms`, `s` or `m`; a bare number is
/// seconds. Values that overflow are rejected.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (value, unit) = s.split_at(split);
    let value: u64 = value.parse().ok()?;
    match unit.trim() {
        "" | "s" => Some(Duration::from_secs(value)),
        "ms" => Some(Duration::from_millis(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_formats() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration(" 7 "), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("10h"), None);
        assert_eq!(parse_duration("ms"), None);
    }

    #[test]
    fn overflowing_minutes_are_rejected() {
        let raw = format!("{}m", u64::MAX);
        assert_eq!(parse_duration(&raw), None);

        let err = BusConfig::from_toml_str(&format!("[bus]\nresponse_timeout = \"{raw}\"\n"))
            .unwrap_err();
        assert!(matches!(err, BusError::Config(_)));
    }

    #[test]
    fn defaults() {
        let config = BusConfig::default();
        assert_eq!(config.response_timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn parse_bus_table() {
        let config = BusConfig::from_toml_str(
            r#"
[bus]
response_timeout = "250ms"
"#,
        )
        .unwrap();
        assert_eq!(config.response_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn missing_table_uses_defaults() {
        let config = BusConfig::from_toml_str("").unwrap();
        assert_eq!(config.response_timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let err = BusConfig::from_toml_str("[bus]\nresponse_timeout = \"later\"\n").unwrap_err();
        assert!(matches!(err, BusError::Config(_)));
    }

    #[test]
    fn from_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.toml");
        std::fs::write(&path, "[bus]\nresponse_timeout = \"3s\"\n").unwrap();
        let config = BusConfig::from_file(&path).unwrap();
        assert_eq!(config.response_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn from_file_missing() {
        let err = BusConfig::from_file(Path::new("/nonexistent/bus.toml")).unwrap_err();
        assert!(err.to_string().contains("invalid bus config"));
    }
}
