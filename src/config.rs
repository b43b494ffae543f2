//! YAML configuration file for the `server` subcommand.

use crate::error::{ProxyError, Result};
use crate::proxy::pattern::PatternMatcher;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub authorization: String,
    pub force_nameserver: Option<String>,
    pub logger: String,
    pub denylist: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            authorization: String::new(),
            force_nameserver: None,
            logger: "info".to_string(),
            denylist: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let payload = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&payload)
            .map_err(|e| ProxyError::MalformedRequest(format!("invalid config {path:?}: {e}")))?;
        Ok(config)
    }

    /// Builds the denylist matcher, reporting the 1-based line number of
    /// the first malformed rule.
    pub fn build_matcher(&self) -> Result<PatternMatcher<()>> {
        let mut matcher = PatternMatcher::new();
        for (line, rule) in self.denylist.iter().enumerate() {
            matcher.add(rule, Some(()), line + 1)?;
        }
        Ok(matcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_full_config_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "addr: 127.0.0.1:8888\nauthorization: \"u:p\"\nlogger: debug\ndenylist:\n  - \".ads.example\"\n  - \"=10.0.0.7\"\n"
        )
        .unwrap();

        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.addr, "127.0.0.1:8888");
        assert_eq!(config.authorization, "u:p");
        assert_eq!(config.logger, "debug");
        assert_eq!(config.denylist.len(), 2);

        let matcher = config.build_matcher().unwrap();
        assert!(matcher.eval("x.ads.example").0);
    }

    #[test]
    fn empty_authorization_means_disabled() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "addr: 127.0.0.1:8888\n").unwrap();
        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.authorization, "");
    }

    #[test]
    fn syntax_error_reports_one_based_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "addr: 127.0.0.1:8888\ndenylist:\n  - \"?\"\n").unwrap();
        let config = ServerConfig::load(file.path()).unwrap();
        let err = config.build_matcher().unwrap_err();
        assert!(matches!(err, ProxyError::SyntaxError { line: 1 }));
    }
}
