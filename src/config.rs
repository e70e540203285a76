use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Parameters that can only be set at startup.
const READ_ONLY_PARAMS: &[&str] = &["bind", "port", "dir", "cluster-enabled"];

/// Every parameter CONFIG GET reports, in reply order.
const PARAMS: &[&str] = &[
    "bind",
    "port",
    "requirepass",
    "timeout",
    "loglevel",
    "dir",
    "repl-namespace-enabled",
    "cluster-enabled",
    "slaveof",
    "slowlog-log-slower-than",
    "slowlog-max-len",
];

const LOG_LEVELS: &[&str] = &["debug", "verbose", "info", "notice", "warning", "error"];

/// Config file entries of the form `namespace.<name> <token>`.
const NAMESPACE_PREFIX: &str = "namespace.";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unsupported CONFIG parameter: {0}")]
    UnknownParameter(String),

    #[error("Can't set read-only parameter: {0}")]
    ReadOnly(String),

    #[error("Invalid argument '{value}' for CONFIG SET '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("line {line}: {msg}")]
    BadLine { line: usize, msg: String },

    #[error("The server is running without a config file")]
    NoConfigFile,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub requirepass: Option<String>,
    pub timeout: u64,
    pub loglevel: String,
    pub dir: String,
    /// Replicas accept namespace mutations from their master only.
    pub repl_namespace_enabled: bool,
    pub cluster_enabled: bool,
    pub slaveof: Option<(String, u16)>,
    /// Microseconds; negative turns the slow log off, zero logs everything.
    pub slowlog_log_slower_than: i64,
    pub slowlog_max_len: usize,
    /// File the config was loaded from; CONFIG REWRITE writes back here.
    pub config_file: Option<PathBuf>,
    /// `(name, token)` pairs loaded at startup.
    pub namespaces: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1".to_string(),
            port: 6666,
            requirepass: None,
            timeout: 0,
            loglevel: "notice".to_string(),
            dir: ".".to_string(),
            repl_namespace_enabled: false,
            cluster_enabled: false,
            slaveof: None,
            slowlog_log_slower_than: 100_000,
            slowlog_max_len: 128,
            config_file: None,
            namespaces: Vec::new(),
        }
    }
}

fn parse_yes_no(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "yes" => Ok(true),
        "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}

impl Config {
    /// Build the config from command-line flags. `--config` is applied
    /// first wherever it appears; the other flags override the file.
    pub fn from_args(args: &[String]) -> Result<Self, ConfigError> {
        let mut config = match args.iter().position(|a| a == "--config") {
            Some(i) if i + 1 < args.len() => Config::from_file(&args[i + 1])?,
            _ => Config::default(),
        };

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => i += 1,
                "--port" => {
                    if i + 1 < args.len() {
                        if let Ok(p) = args[i + 1].parse() {
                            config.port = p;
                        }
                        i += 1;
                    }
                }
                "--bind" => {
                    if i + 1 < args.len() {
                        config.bind = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--requirepass" => {
                    if i + 1 < args.len() {
                        config.apply("requirepass", &args[i + 1])?;
                        i += 1;
                    }
                }
                "--dir" => {
                    if i + 1 < args.len() {
                        config.dir = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--timeout" => {
                    if i + 1 < args.len() {
                        if let Ok(t) = args[i + 1].parse() {
                            config.timeout = t;
                        }
                        i += 1;
                    }
                }
                "--loglevel" => {
                    if i + 1 < args.len() {
                        config.apply("loglevel", &args[i + 1])?;
                        i += 1;
                    }
                }
                "--cluster-enabled" => {
                    if i + 1 < args.len() {
                        config.apply("cluster-enabled", &args[i + 1])?;
                        i += 1;
                    }
                }
                "--repl-namespace-enabled" => {
                    if i + 1 < args.len() {
                        config.apply("repl-namespace-enabled", &args[i + 1])?;
                        i += 1;
                    }
                }
                "--slaveof" | "--replicaof" => {
                    if i + 2 < args.len() {
                        let value = format!("{} {}", args[i + 1], args[i + 2]);
                        config.apply("slaveof", &value)?;
                        i += 2;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        Ok(config)
    }

    /// Load a config file of `key value` lines.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config = Config::default();
        config.load_str(&text)?;
        config.config_file = Some(path.to_path_buf());
        Ok(config)
    }

    fn load_str(&mut self, text: &str) -> Result<(), ConfigError> {
        for (n, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((k, v)) => (k, v.trim()),
                None => (line, ""),
            };
            // Namespace names keep their case; only the prefix is matched loosely.
            let namespace = key
                .get(..NAMESPACE_PREFIX.len())
                .filter(|prefix| prefix.eq_ignore_ascii_case(NAMESPACE_PREFIX))
                .map(|_| &key[NAMESPACE_PREFIX.len()..]);
            let result = match namespace {
                Some(name) if !name.is_empty() && !value.is_empty() => {
                    self.namespaces.push((name.to_string(), value.to_string()));
                    Ok(())
                }
                Some(_) => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                }),
                None => self.apply(&key.to_ascii_lowercase(), value),
            };
            result.map_err(|e| ConfigError::BadLine {
                line: n + 1,
                msg: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key.to_ascii_lowercase().as_str() {
            "bind" => Some(self.bind.clone()),
            "port" => Some(self.port.to_string()),
            "requirepass" => self.requirepass.clone().or(Some(String::new())),
            "timeout" => Some(self.timeout.to_string()),
            "loglevel" => Some(self.loglevel.clone()),
            "dir" => Some(self.dir.clone()),
            "repl-namespace-enabled" => Some(yes_no(self.repl_namespace_enabled)),
            "cluster-enabled" => Some(yes_no(self.cluster_enabled)),
            "slaveof" => Some(
                self.slaveof
                    .as_ref()
                    .map(|(host, port)| format!("{host} {port}"))
                    .unwrap_or_default(),
            ),
            "slowlog-log-slower-than" => Some(self.slowlog_log_slower_than.to_string()),
            "slowlog-max-len" => Some(self.slowlog_max_len.to_string()),
            _ => None,
        }
    }

    /// `(name, value)` pairs for CONFIG GET: `*`, `prefix*` or an exact name.
    pub fn get_matching(&self, pattern: &str) -> Vec<(String, String)> {
        let pattern = pattern.to_ascii_lowercase();
        let matches = |name: &str| match pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => name == pattern,
        };
        PARAMS
            .iter()
            .filter(|name| matches(name))
            .filter_map(|name| self.get(name).map(|v| (name.to_string(), v)))
            .collect()
    }

    /// CONFIG SET. Read-only and unknown parameters are rejected.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let key = key.to_ascii_lowercase();
        if READ_ONLY_PARAMS.contains(&key.as_str()) {
            return Err(ConfigError::ReadOnly(key));
        }
        self.apply(&key, value)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        match key {
            "bind" => self.bind = value.to_string(),
            "port" => self.port = value.parse().map_err(|_| invalid())?,
            "requirepass" => {
                self.requirepass = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "timeout" => self.timeout = value.parse().map_err(|_| invalid())?,
            "loglevel" => {
                let level = value.to_ascii_lowercase();
                if !LOG_LEVELS.contains(&level.as_str()) {
                    return Err(invalid());
                }
                self.loglevel = level;
            }
            "dir" => self.dir = value.to_string(),
            "repl-namespace-enabled" => self.repl_namespace_enabled = parse_yes_no(key, value)?,
            "cluster-enabled" => self.cluster_enabled = parse_yes_no(key, value)?,
            "slaveof" => self.slaveof = Config::parse_master(value)?,
            "slowlog-log-slower-than" => self.slowlog_log_slower_than = value.parse().map_err(|_| invalid())?,
            "slowlog-max-len" => self.slowlog_max_len = value.parse().map_err(|_| invalid())?,
            _ => return Err(ConfigError::UnknownParameter(key.to_string())),
        }
        Ok(())
    }

    /// `host port` names a master; `no one` or nothing means none.
    pub fn parse_master(value: &str) -> Result<Option<(String, u16)>, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: "slaveof".to_string(),
            value: value.to_string(),
        };
        match value.split_whitespace().collect::<Vec<_>>().as_slice() {
            [] => Ok(None),
            [no, one] if no.eq_ignore_ascii_case("no") && one.eq_ignore_ascii_case("one") => Ok(None),
            [host, port] => Ok(Some((host.to_string(), port.parse().map_err(|_| invalid())?))),
            _ => Err(invalid()),
        }
    }

    /// Tracing filter for the current `loglevel`; `RUST_LOG` directives
    /// still apply on top.
    pub fn log_filter(&self) -> EnvFilter {
        EnvFilter::from_default_env().add_directive(self.log_level().into())
    }

    /// Default tracing level for `loglevel`.
    pub fn log_level(&self) -> Level {
        match self.loglevel.as_str() {
            "debug" | "verbose" => Level::DEBUG,
            "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// Text of the config file for the current settings and namespace map.
    pub fn render(&self, namespaces: &[(String, String)]) -> String {
        let mut out = String::new();
        for name in PARAMS {
            if let Some(value) = self.get(name).filter(|v| !v.is_empty()) {
                let _ = writeln!(out, "{name} {value}");
            }
        }
        for (name, token) in namespaces {
            let _ = writeln!(out, "{NAMESPACE_PREFIX}{name} {token}");
        }
        out
    }

    /// CONFIG REWRITE: replace the config file (atomically, via a temp
    /// file + rename) with the current settings and namespace map.
    pub fn rewrite(&self, namespaces: &[(String, String)]) -> Result<(), ConfigError> {
        let path = self.config_file.as_ref().ok_or(ConfigError::NoConfigFile)?;
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        std::fs::write(&tmp, self.render(namespaces))?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

pub type SharedConfig = Arc<RwLock<Config>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_args() {
        let config = Config::from_args(&args(&[
            "nskv",
            "--port",
            "7000",
            "--requirepass",
            "secret",
            "--cluster-enabled",
            "yes",
            "--slaveof",
            "10.0.0.1",
            "6666",
        ]))
        .unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.requirepass.as_deref(), Some("secret"));
        assert!(config.cluster_enabled);
        assert_eq!(config.slaveof, Some(("10.0.0.1".to_string(), 6666)));
    }

    #[test]
    fn test_file_with_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nskv.conf");
        std::fs::write(
            &path,
            "# comment\nport 7001\nrequirepass admin\nrepl-namespace-enabled yes\n\
             namespace.ns1 token1\nnamespace.ns2 token2\n",
        )
        .unwrap();

        let config = Config::from_args(&args(&["nskv", "--config", path.to_str().unwrap(), "--port", "7002"])).unwrap();
        assert_eq!(config.port, 7002);
        assert!(config.repl_namespace_enabled);
        assert_eq!(
            config.namespaces,
            vec![
                ("ns1".to_string(), "token1".to_string()),
                ("ns2".to_string(), "token2".to_string())
            ]
        );
        assert_eq!(config.config_file.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_namespace_names_keep_their_case() {
        let mut config = Config::default();
        config.load_str("NAMESPACE.Tenant tok_abc\nnamespace.MiXeD tok_def\nPort 7004\n").unwrap();
        assert_eq!(
            config.namespaces,
            vec![
                ("Tenant".to_string(), "tok_abc".to_string()),
                ("MiXeD".to_string(), "tok_def".to_string())
            ]
        );
        assert_eq!(config.port, 7004);
    }

    #[test]
    fn test_bad_file_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nskv.conf");
        std::fs::write(&path, "port 7001\nmaxclients 10\n").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::BadLine { line: 2, .. }));
    }

    #[test]
    fn test_set_rules() {
        let mut config = Config::default();
        config.set("timeout", "30").unwrap();
        assert_eq!(config.get("timeout").unwrap(), "30");
        config.set("LOGLEVEL", "warning").unwrap();
        assert_eq!(config.log_level(), Level::WARN);
        assert!(matches!(config.set("port", "1"), Err(ConfigError::ReadOnly(_))));
        assert!(matches!(config.set("maxclients", "1"), Err(ConfigError::UnknownParameter(_))));
        assert!(matches!(config.set("loglevel", "loud"), Err(ConfigError::InvalidValue { .. })));
        assert!(matches!(config.set("cluster-enabled", "yes"), Err(ConfigError::ReadOnly(_))));
        config.set("slaveof", "no one").unwrap();
        assert_eq!(config.slaveof, None);
        config.set("slowlog-log-slower-than", "-1").unwrap();
        assert_eq!(config.slowlog_log_slower_than, -1);
        assert!(matches!(config.set("slowlog-max-len", "-1"), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_parse_master() {
        assert_eq!(Config::parse_master("NO ONE").unwrap(), None);
        assert_eq!(Config::parse_master("").unwrap(), None);
        assert_eq!(
            Config::parse_master("10.0.0.3 6380").unwrap(),
            Some(("10.0.0.3".to_string(), 6380))
        );
        assert!(Config::parse_master("10.0.0.3").is_err());
        assert!(Config::parse_master("10.0.0.3 port").is_err());
    }

    #[test]
    fn test_get_matching() {
        let config = Config::default();
        assert_eq!(config.get_matching("*").len(), PARAMS.len());
        let repl: Vec<String> = config.get_matching("repl*").into_iter().map(|(k, _)| k).collect();
        assert_eq!(repl, vec!["repl-namespace-enabled"]);
        assert_eq!(config.get_matching("PORT"), vec![("port".to_string(), "6666".to_string())]);
        assert!(config.get_matching("nothing").is_empty());
    }

    #[test]
    fn test_rewrite_round_trips_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nskv.conf");
        std::fs::write(&path, "port 7003\n").unwrap();
        let config = Config::from_file(&path).unwrap();

        let namespaces = vec![
            ("Tenant".to_string(), "tok_abc".to_string()),
            ("tenant".to_string(), "tok_def".to_string()),
        ];
        config.rewrite(&namespaces).unwrap();
        let reloaded = Config::from_file(&path).unwrap();
        assert_eq!(reloaded.port, 7003);
        assert_eq!(reloaded.namespaces, namespaces);

        assert!(matches!(Config::default().rewrite(&namespaces), Err(ConfigError::NoConfigFile)));
    }
}
