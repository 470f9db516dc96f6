use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL_PATH: &str = "best.onnx";
pub const DEFAULT_PORT: u16 = 8002;
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    /// Lets the inference runtime log at the service level instead of `warn`.
    pub runtime_verbose: bool,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

impl Config {
    pub fn log_filter(&self) -> String {
        let level = self.log_level.as_str();
        let runtime_level = if self.runtime_verbose { level } else { "warn" };
        format!("{},ort={}", level, runtime_level)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub labels_file: Option<PathBuf>,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(5)
}

fn default_input_size() -> u32 {
    640
}

impl ModelConfig {
    pub fn get_path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let vars: config::Map<String, String> = std::env::vars().collect();

    load_configuration(&base_path.join("configuration"), &vars)
}

/// Layers defaults, the optional YAML files, `APP_`-prefixed variables and
/// finally the plain `YOLO_MODEL_PATH`, `PORT` and `YOLO_VERBOSE` variables.
pub fn load_configuration(
    configuration_directory: &Path,
    vars: &config::Map<String, String>,
) -> Result<Config, config::ConfigError> {
    let environment: Environment = vars
        .get("APP_ENVIRONMENT")
        .cloned()
        .unwrap_or_else(|| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", DEFAULT_PORT as i64)?
        .set_default("server.max_body_bytes", DEFAULT_MAX_BODY_BYTES as i64)?
        .set_default("model.path", DEFAULT_MODEL_PATH)?
        .set_default("log_level", "info")?
        .set_default("runtime_verbose", false)?
        .add_source(config::File::from(configuration_directory.join("base.yaml")).required(false))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .source(Some(vars.clone())),
        )
        .set_override_option("model.path", vars.get("YOLO_MODEL_PATH").cloned())?
        .set_override_option("server.port", vars.get("PORT").cloned())?
        .set_override_option("runtime_verbose", vars.get("YOLO_VERBOSE").cloned())?
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> config::Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_without_files_or_variables() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_configuration(dir.path(), &vars(&[])).unwrap();

        assert_eq!(config.model.get_path(), Path::new("best.onnx"));
        assert_eq!(config.server.port, 8002);
        assert_eq!(config.server.max_body_bytes, 4 * 1024 * 1024);
        assert_eq!(config.server.get_address(), "0.0.0.0:8002");
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(!config.runtime_verbose);
        assert_eq!(config.model.input_size, 640);
        assert!(config.model.labels_file.is_none());
    }

    #[test]
    fn test_plain_variables_override_everything() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("base.yaml"),
            "server:\n  port: 9000\nmodel:\n  path: from_yaml.onnx\n",
        )
        .unwrap();

        let config = load_configuration(
            dir.path(),
            &vars(&[
                ("YOLO_MODEL_PATH", "/models/custom.onnx"),
                ("PORT", "8100"),
                ("YOLO_VERBOSE", "1"),
            ]),
        )
        .unwrap();

        assert_eq!(config.model.get_path(), Path::new("/models/custom.onnx"));
        assert_eq!(config.server.port, 8100);
        assert!(config.runtime_verbose);
    }

    #[test]
    fn test_yaml_layers_and_prefixed_variables() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("base.yaml"),
            "log_level: debug\nmodel:\n  path: base.onnx\n  num_instances: 2\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("production.yaml"),
            "model:\n  path: production.onnx\n",
        )
        .unwrap();

        let config = load_configuration(
            dir.path(),
            &vars(&[
                ("APP_ENVIRONMENT", "production"),
                ("APP_MODEL__INPUT_SIZE", "320"),
            ]),
        )
        .unwrap();

        assert_eq!(config.model.get_path(), Path::new("production.onnx"));
        assert_eq!(config.model.num_instances, 2);
        assert_eq!(config.model.input_size, 320);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_unknown_environment_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_configuration(dir.path(), &vars(&[("APP_ENVIRONMENT", "staging")]));

        assert!(result.is_err());
    }

    #[test]
    fn test_log_filter_caps_runtime_unless_verbose() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = load_configuration(dir.path(), &vars(&[])).unwrap();
        assert_eq!(config.log_filter(), "info,ort=warn");

        config.runtime_verbose = true;
        config.log_level = LogLevel::Debug;
        assert_eq!(config.log_filter(), "debug,ort=debug");
    }
}
