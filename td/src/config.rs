//! Daemon configuration: defaults → TOML config file → env file → `RALPH_`
//! environment variables → CLI overrides. Also owns the daemon's rotating
//! file logger.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const DEFAULT_MAX_CONCURRENT_LOOPS: usize = 4;
const DEFAULT_LOOP_TIMEOUT_HOURS: u32 = 24;
const DEFAULT_LOG_MAX_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_LOG_BACKUP_COUNT: u32 = 5;

fn default_workspace_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join("ralph-workspaces")
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("ralph-daemon")
}

fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ralph-daemon")
}

fn default_log_file() -> PathBuf {
    default_state_dir().join("daemon.log")
}

/// Merged daemon configuration, the product of defaults, config file, env
/// file, `RALPH_*` environment variables, and CLI overrides, in that order.
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace_dir: PathBuf,
    pub max_concurrent_loops: usize,
    pub loop_timeout_hours: u32,
    pub ziti_identity_path: Option<PathBuf>,
    pub log_file: PathBuf,
    pub log_max_bytes: u64,
    pub log_backup_count: u32,
    pub env_vars: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace_dir(),
            max_concurrent_loops: DEFAULT_MAX_CONCURRENT_LOOPS,
            loop_timeout_hours: DEFAULT_LOOP_TIMEOUT_HOURS,
            ziti_identity_path: None,
            log_file: default_log_file(),
            log_max_bytes: DEFAULT_LOG_MAX_BYTES,
            log_backup_count: DEFAULT_LOG_BACKUP_COUNT,
            env_vars: HashMap::new(),
        }
    }
}

/// CLI-level overrides applied after every other source.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub workspace_dir: Option<PathBuf>,
    pub ziti_identity_path: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// On-disk TOML shape. Every field optional; unspecified fields fall back
/// to `Config::default()`.
#[derive(Debug, Default, Deserialize, Serialize)]
struct TomlConfig {
    workspace_dir: Option<String>,
    max_concurrent_loops: Option<i64>,
    loop_timeout_hours: Option<i64>,
    ziti_identity_path: Option<String>,
    log: Option<TomlLogConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct TomlLogConfig {
    file: Option<String>,
    max_bytes: Option<i64>,
    backup_count: Option<i64>,
}

impl Config {
    /// Load configuration, applying every layer in precedence order.
    pub fn load(overrides: &ConfigOverrides) -> Self {
        let mut config = Config::default();

        let config_path = overrides.config_path.clone().unwrap_or_else(|| default_config_dir().join("config.toml"));
        if config_path.is_file() {
            if let Err(e) = apply_toml_config(&mut config, &config_path) {
                warn!(path = %config_path.display(), error = %e, "Config::load: failed to load config file");
            }
        } else {
            debug!(path = %config_path.display(), "Config::load: no config file present, using defaults");
        }

        let env_file = default_config_dir().join("env");
        if env_file.is_file() {
            config.env_vars = load_env_file(&env_file);
        }

        apply_process_env(&mut config);

        if let Some(path) = &overrides.workspace_dir {
            config.workspace_dir = path.clone();
        }
        if let Some(path) = &overrides.ziti_identity_path {
            config.ziti_identity_path = Some(path.clone());
        }

        config
    }

    /// Resolve the effective log level, CLI flag taking priority over any
    /// `RALPH_LOG_LEVEL` value captured from the environment.
    pub fn resolve_log_level(&self, cli_log_level: Option<&str>) -> String {
        cli_log_level
            .map(str::to_string)
            .or_else(|| self.env_vars.get("RALPH_LOG_LEVEL").cloned())
            .or_else(|| std::env::var("RALPH_LOG_LEVEL").ok())
            .unwrap_or_else(|| "INFO".to_string())
    }
}

fn apply_toml_config(config: &mut Config, path: &Path) -> Result<()> {
    let content = fs::read_to_string(path).context("failed to read config file")?;
    let parsed: TomlConfig = toml::from_str(&content).context("failed to parse TOML config file")?;

    if let Some(dir) = parsed.workspace_dir {
        config.workspace_dir = expand_home(&dir);
    }
    if let Some(val) = parsed.max_concurrent_loops
        && val > 0
    {
        config.max_concurrent_loops = val as usize;
    }
    if let Some(val) = parsed.loop_timeout_hours
        && val > 0
    {
        config.loop_timeout_hours = val as u32;
    }
    if let Some(path) = parsed.ziti_identity_path {
        config.ziti_identity_path = Some(expand_home(&path));
    }
    if let Some(log) = parsed.log {
        if let Some(file) = log.file {
            config.log_file = expand_home(&file);
        }
        if let Some(val) = log.max_bytes
            && val > 0
        {
            config.log_max_bytes = val as u64;
        }
        if let Some(val) = log.backup_count
            && val >= 0
        {
            config.log_backup_count = val as u32;
        }
    }

    info!(path = %path.display(), "apply_toml_config: loaded config file");
    Ok(())
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

/// Parse a shell-style `KEY=value` env file: `export` prefix tolerated,
/// `#` comments, surrounding single or double quotes stripped.
fn load_env_file(path: &Path) -> HashMap<String, String> {
    let mut env_vars = HashMap::new();

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "load_env_file: failed to read env file");
            return env_vars;
        }
    };

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line).trim();

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let mut value = value.trim();
        if (value.starts_with('"') && value.ends_with('"') && value.len() >= 2)
            || (value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2)
        {
            value = &value[1..value.len() - 1];
        }
        if !key.is_empty() {
            env_vars.insert(key.to_string(), value.to_string());
        }
    }

    env_vars
}

/// `RALPH_WORKSPACE_DIR`, `RALPH_MAX_CONCURRENT_LOOPS`,
/// `RALPH_LOOP_TIMEOUT_HOURS`, `RALPH_ZITI_IDENTITY_PATH` — lower precedence
/// than CLI flags, higher than the config file and env file.
fn apply_process_env(config: &mut Config) {
    if let Ok(val) = std::env::var("RALPH_WORKSPACE_DIR") {
        config.workspace_dir = expand_home(&val);
    }
    if let Ok(val) = std::env::var("RALPH_MAX_CONCURRENT_LOOPS")
        && let Ok(n) = val.parse::<usize>()
        && n > 0
    {
        config.max_concurrent_loops = n;
    }
    if let Ok(val) = std::env::var("RALPH_LOOP_TIMEOUT_HOURS")
        && let Ok(n) = val.parse::<u32>()
        && n > 0
    {
        config.loop_timeout_hours = n;
    }
    if let Ok(val) = std::env::var("RALPH_ZITI_IDENTITY_PATH") {
        config.ziti_identity_path = Some(expand_home(&val));
    }
}

/// Parse a `--log-level` / `RALPH_LOG_LEVEL` string into a `tracing::Level`,
/// defaulting to `INFO` on anything unrecognized.
pub fn parse_log_level(level_str: &str) -> tracing::Level {
    match level_str.to_uppercase().as_str() {
        "TRACE" => tracing::Level::TRACE,
        "DEBUG" => tracing::Level::DEBUG,
        "INFO" => tracing::Level::INFO,
        "WARN" | "WARNING" => tracing::Level::WARN,
        "ERROR" => tracing::Level::ERROR,
        other => {
            eprintln!("Warning: unknown log level '{other}', defaulting to INFO");
            tracing::Level::INFO
        }
    }
}

/// Install a `tracing_subscriber` that writes to `config.log_file` (rotated
/// per `log_max_bytes`/`log_backup_count`) and mirrors at `INFO` and above to
/// stderr, matching the split the teacher's own daemon keeps between file and
/// console handlers.
pub fn setup_logging(config: &Config, cli_log_level: Option<&str>) -> Result<()> {
    if let Some(parent) = config.log_file.parent() {
        fs::create_dir_all(parent).context("failed to create log directory")?;
    }

    let level = parse_log_level(&config.resolve_log_level(cli_log_level));
    let writer = RotatingFileWriter::new(config.log_file.clone(), config.log_max_bytes, config.log_backup_count);

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!(level = %level, file = %config.log_file.display(), "setup_logging: logging initialized");
    Ok(())
}

/// Rotation state shared by every `RotatingFileWriter` handle handed out by
/// `make_writer`, mirroring `logging.handlers.RotatingFileHandler`.
struct RotatingFileInner {
    path: PathBuf,
    max_bytes: u64,
    backup_count: u32,
    current_size: u64,
    file: fs::File,
}

impl RotatingFileInner {
    fn rotate(&mut self) {
        if self.backup_count == 0 {
            let _ = fs::remove_file(&self.path);
        } else {
            for i in (1..self.backup_count).rev() {
                let from = self.backup_path(i);
                let to = self.backup_path(i + 1);
                if from.exists() {
                    let _ = fs::rename(&from, &to);
                }
            }
            let _ = fs::rename(&self.path, self.backup_path(1));
        }

        self.file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .unwrap_or_else(|e| panic!("failed to reopen log file {}: {e}", self.path.display()));
        self.current_size = 0;
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.current_size >= self.max_bytes {
            self.rotate();
        }
        let written = std::io::Write::write(&mut self.file, buf)?;
        self.current_size += written as u64;
        Ok(written)
    }
}

/// A minimal `std::io::Write` sink that rotates the log file once it exceeds
/// `max_bytes`, keeping up to `backup_count` numbered backups
/// (`daemon.log.1`, `daemon.log.2`, ...). Cheap to clone: every handle shares
/// the same rotation state behind a mutex.
#[derive(Clone)]
struct RotatingFileWriter {
    inner: std::sync::Arc<std::sync::Mutex<RotatingFileInner>>,
}

impl RotatingFileWriter {
    fn new(path: PathBuf, max_bytes: u64, backup_count: u32) -> Self {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap_or_else(|e| panic!("failed to open log file {}: {e}", path.display()));
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        let inner = RotatingFileInner { path, max_bytes, backup_count, current_size, file };
        Self { inner: std::sync::Arc::new(std::sync::Mutex::new(inner)) }
    }
}

impl std::io::Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).file.flush()
    }
}

impl tracing_subscriber::fmt::writer::MakeWriter<'_> for RotatingFileWriter {
    type Writer = RotatingFileWriter;

    fn make_writer(&self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_sane_values() {
        let config = Config::default();
        assert_eq!(config.max_concurrent_loops, DEFAULT_MAX_CONCURRENT_LOOPS);
        assert_eq!(config.loop_timeout_hours, DEFAULT_LOOP_TIMEOUT_HOURS);
        assert!(config.ziti_identity_path.is_none());
    }

    #[test]
    fn toml_config_overrides_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
            workspace_dir = "/tmp/ws"
            max_concurrent_loops = 8
            loop_timeout_hours = 12

            [log]
            max_bytes = 2048
            backup_count = 2
            "#,
        )
        .unwrap();

        let mut config = Config::default();
        apply_toml_config(&mut config, &config_path).unwrap();

        assert_eq!(config.workspace_dir, PathBuf::from("/tmp/ws"));
        assert_eq!(config.max_concurrent_loops, 8);
        assert_eq!(config.loop_timeout_hours, 12);
        assert_eq!(config.log_max_bytes, 2048);
        assert_eq!(config.log_backup_count, 2);
    }

    #[test]
    fn toml_config_ignores_non_positive_overrides() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "max_concurrent_loops = 0\nloop_timeout_hours = -1\n").unwrap();

        let mut config = Config::default();
        apply_toml_config(&mut config, &config_path).unwrap();

        assert_eq!(config.max_concurrent_loops, DEFAULT_MAX_CONCURRENT_LOOPS);
        assert_eq!(config.loop_timeout_hours, DEFAULT_LOOP_TIMEOUT_HOURS);
    }

    #[test]
    fn env_file_parses_export_and_quotes() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join("env");
        fs::write(
            &env_path,
            "# a comment\nexport FOO=bar\nBAZ=\"quoted value\"\nQUX='single quoted'\n\nNOVALUE\n",
        )
        .unwrap();

        let env_vars = load_env_file(&env_path);
        assert_eq!(env_vars.get("FOO"), Some(&"bar".to_string()));
        assert_eq!(env_vars.get("BAZ"), Some(&"quoted value".to_string()));
        assert_eq!(env_vars.get("QUX"), Some(&"single quoted".to_string()));
        assert_eq!(env_vars.len(), 3);
    }

    #[test]
    fn resolve_log_level_prefers_cli_flag() {
        let mut config = Config::default();
        config.env_vars.insert("RALPH_LOG_LEVEL".to_string(), "DEBUG".to_string());
        assert_eq!(config.resolve_log_level(Some("ERROR")), "ERROR");
        assert_eq!(config.resolve_log_level(None), "DEBUG");
    }

    #[test]
    fn parse_log_level_handles_known_and_unknown() {
        assert_eq!(parse_log_level("debug"), tracing::Level::DEBUG);
        assert_eq!(parse_log_level("WARNING"), tracing::Level::WARN);
        assert_eq!(parse_log_level("nonsense"), tracing::Level::INFO);
    }
}
