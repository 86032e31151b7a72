use crate::error::{OrmError, OrmResult};
use std::time::Duration;

/// Per-connection configuration.
///
/// Defaults: no query timeout, no slow-query threshold, query log on with
/// 1000 entries, 5s SQLite busy timeout.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Upper bound on one statement; unset waits forever.
    pub query_timeout: Option<Duration>,
    /// Statements slower than this are reported as slow queries.
    pub slow_query_threshold: Option<Duration>,
    /// Keep statements in the connection's query log.
    pub log_queries: bool,
    /// Ring size of the query log; the oldest entries are dropped first.
    pub max_log_entries: usize,
    /// How long SQLite waits on a locked database file.
    pub sqlite_busy_timeout: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            query_timeout: None,
            slow_query_threshold: None,
            log_queries: true,
            max_log_entries: 1000,
            sqlite_busy_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every statement.
    ///
    /// Statements exceeding this duration fail with [`OrmError::Timeout`].
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Report statements slower than `threshold` to `on_slow_query`.
    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = Some(threshold);
        self
    }

    pub fn with_max_log_entries(mut self, max: usize) -> Self {
        self.max_log_entries = max;
        self
    }

    pub fn with_sqlite_busy_timeout(mut self, timeout: Duration) -> Self {
        self.sqlite_busy_timeout = Some(timeout);
        self
    }

    pub fn enable_query_log(mut self) -> Self {
        self.log_queries = true;
        self
    }

    pub fn disable_query_log(mut self) -> Self {
        self.log_queries = false;
        self
    }

    /// Read overrides from the process environment.
    ///
    /// | variable | meaning |
    /// |---|---|
    /// | `KORM_QUERY_TIMEOUT_MS` | query timeout in milliseconds |
    /// | `KORM_SLOW_QUERY_MS` | slow query threshold in milliseconds |
    /// | `KORM_LOG_QUERIES` | `true`/`false`/`1`/`0` |
    /// | `KORM_MAX_LOG_ENTRIES` | query log size |
    ///
    /// Unset variables keep their defaults; malformed ones are a configuration error.
    pub fn from_env() -> OrmResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ConnectOptions::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> OrmResult<Self> {
        let mut options = Self::default();
        if let Some(ms) = parse_var::<u64>(&lookup, "KORM_QUERY_TIMEOUT_MS")? {
            options.query_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "KORM_SLOW_QUERY_MS")? {
            options.slow_query_threshold = Some(Duration::from_millis(ms));
        }
        if let Some(raw) = lookup("KORM_LOG_QUERIES") {
            options.log_queries = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(OrmError::configuration(format!(
                        "KORM_LOG_QUERIES: expected a boolean, got '{raw}'"
                    )));
                }
            };
        }
        if let Some(max) = parse_var::<usize>(&lookup, "KORM_MAX_LOG_ENTRIES")? {
            options.max_log_entries = max;
        }
        Ok(options)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> OrmResult<Option<T>> {
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| {
                OrmError::configuration(format!("{key}: expected a number, got '{raw}'"))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let options = ConnectOptions::from_lookup(lookup(&[])).unwrap();
        assert!(options.query_timeout.is_none());
        assert!(options.log_queries);
        assert_eq!(options.max_log_entries, 1000);
    }

    #[test]
    fn reads_all_variables() {
        let options = ConnectOptions::from_lookup(lookup(&[
            ("KORM_QUERY_TIMEOUT_MS", "250"),
            ("KORM_SLOW_QUERY_MS", "40"),
            ("KORM_LOG_QUERIES", "off"),
            ("KORM_MAX_LOG_ENTRIES", "10"),
        ]))
        .unwrap();
        assert_eq!(options.query_timeout, Some(Duration::from_millis(250)));
        assert_eq!(options.slow_query_threshold, Some(Duration::from_millis(40)));
        assert!(!options.log_queries);
        assert_eq!(options.max_log_entries, 10);
    }

    #[test]
    fn malformed_values_are_configuration_errors() {
        let err = ConnectOptions::from_lookup(lookup(&[("KORM_QUERY_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, OrmError::Configuration(ref m) if m.contains("KORM_QUERY_TIMEOUT_MS")));

        let err = ConnectOptions::from_lookup(lookup(&[("KORM_LOG_QUERIES", "maybe")])).unwrap_err();
        assert!(matches!(err, OrmError::Configuration(_)));
    }
}
