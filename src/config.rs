use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read once from `ALLOCD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    /// Login names that act as administrators.
    pub admins: Vec<String>,
    pub max_connections: usize,
    /// Compact the WAL once this many appends have accumulated.
    pub compact_threshold: u64,
    /// Optional JSON catalog loaded at startup.
    pub catalog: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "allocd".into(),
            admins: vec!["admin".into()],
            max_connections: 256,
            compact_threshold: 1000,
            catalog: None,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid value for {}: {:?}", self.var, self.value)
    }
}

impl std::error::Error for ConfigError {}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { var, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let admins = match lookup("ALLOCD_ADMINS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => defaults.admins,
        };
        let max_connections = parsed(&lookup, "ALLOCD_MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections);
        if max_connections == 0 {
            return Err(ConfigError {
                var: "ALLOCD_MAX_CONNECTIONS",
                value: "0".into(),
            });
        }

        Ok(Self {
            bind: lookup("ALLOCD_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "ALLOCD_PORT")?.unwrap_or(defaults.port),
            data_dir: lookup("ALLOCD_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: lookup("ALLOCD_PASSWORD").unwrap_or(defaults.password),
            admins,
            max_connections,
            compact_threshold: parsed(&lookup, "ALLOCD_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            catalog: lookup("ALLOCD_CATALOG").map(PathBuf::from),
            metrics_port: parsed(&lookup, "ALLOCD_METRICS_PORT")?,
            tls_cert: lookup("ALLOCD_TLS_CERT"),
            tls_key: lookup("ALLOCD_TLS_KEY"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("allocd.wal")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.wal_path(), PathBuf::from("./data/allocd.wal"));
    }

    #[test]
    fn overrides_are_applied() {
        let config = from(&[
            ("ALLOCD_PORT", "6000"),
            ("ALLOCD_BIND", "127.0.0.1"),
            ("ALLOCD_ADMINS", "root, office ,,"),
            ("ALLOCD_COMPACT_THRESHOLD", "50"),
            ("ALLOCD_METRICS_PORT", "9100"),
            ("ALLOCD_CATALOG", "/etc/allocd/catalog.json"),
        ])
        .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:6000");
        assert_eq!(config.admins, vec!["root", "office"]);
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.catalog, Some(PathBuf::from("/etc/allocd/catalog.json")));
    }

    #[test]
    fn bad_numbers_are_errors() {
        let err = from(&[("ALLOCD_PORT", "http")]).unwrap_err();
        assert_eq!(err.var, "ALLOCD_PORT");
        assert!(from(&[("ALLOCD_MAX_CONNECTIONS", "0")]).is_err());
        assert!(from(&[("ALLOCD_METRICS_PORT", "70000")]).is_err());
    }
}
