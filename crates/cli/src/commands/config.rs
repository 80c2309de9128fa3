use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use assetdesk_core::config::{AppConfig, LoadOptions};
use toml::Value;

const CONFIG_CANDIDATES: [&str; 2] = ["assetdesk.toml", "config/assetdesk.toml"];

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(key: &'static str, value: impl ToString, env_keys: &'static [&'static str]) -> Field {
    Field { key, value: value.to_string(), env_keys }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let templates_dir = config
        .server
        .templates_dir
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<embedded>".to_string());

    let fields = vec![
        field("database.url", &config.database.url, &["ASSETDESK_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections,
            &["ASSETDESK_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs,
            &["ASSETDESK_DATABASE_TIMEOUT_SECS"],
        ),
        field(
            "server.bind_address",
            &config.server.bind_address,
            &["ASSETDESK_SERVER_BIND_ADDRESS"],
        ),
        field("server.port", config.server.port, &["ASSETDESK_SERVER_PORT"]),
        field(
            "server.health_check_port",
            config.server.health_check_port,
            &["ASSETDESK_SERVER_HEALTH_CHECK_PORT"],
        ),
        field(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs,
            &["ASSETDESK_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        field("server.templates_dir", templates_dir, &["ASSETDESK_SERVER_TEMPLATES_DIR"]),
        field(
            "logging.level",
            &config.logging.level,
            &["ASSETDESK_LOGGING_LEVEL", "ASSETDESK_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["ASSETDESK_LOGGING_FORMAT", "ASSETDESK_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        fields
            .into_iter()
            .map(|field| render_line(field.key, &field.value, source(field.key, field.env_keys))),
    );
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    CONFIG_CANDIDATES.iter().map(PathBuf::from).find(|candidate| candidate.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
