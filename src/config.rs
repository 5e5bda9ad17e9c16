use crate::models::{BatchOptions, ErrorStrategy, DEFAULT_CHUNK_SIZE};
use ::config::{Config, ConfigError as SettingsError, Environment, File};
use serde::{Deserialize, Serialize};

/// 配置文件名 (不含扩展名, 可选)
pub const CONFIG_FILE: &str = "price-match";
/// 环境变量前缀, 例如 `PRICE_MATCH__SERVER__PORT=9000`
pub const ENV_PREFIX: &str = "PRICE_MATCH";

/// 应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 引擎默认批处理选项 (请求未指定时使用)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub chunk_size: usize,
    pub error_strategy: ErrorStrategy,
    pub diagnostics: bool,
    pub parallel: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            engine: EngineConfig {
                chunk_size: DEFAULT_CHUNK_SIZE,
                error_strategy: ErrorStrategy::default(),
                diagnostics: false,
                parallel: false,
            },
        }
    }
}

impl AppConfig {
    /// 加载顺序: 默认值 -> price-match.toml (可选) -> PRICE_MATCH__* 环境变量
    pub fn load() -> Result<Self, SettingsError> {
        Self::builder(File::with_name(CONFIG_FILE).required(false))?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    fn builder<S>(file: S) -> Result<::config::ConfigBuilder<::config::builder::DefaultState>, SettingsError>
    where
        S: ::config::Source + Send + Sync + 'static,
    {
        Ok(Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080_i64)?
            .set_default("engine.chunk_size", DEFAULT_CHUNK_SIZE as i64)?
            .set_default("engine.error_strategy", "process_individual")?
            .set_default("engine.diagnostics", false)?
            .set_default("engine.parallel", false)?
            .add_source(file))
    }

    pub fn to_batch_options(&self) -> BatchOptions {
        BatchOptions {
            chunk_size: self.engine.chunk_size,
            strategy: self.engine.error_strategy,
            diagnostics: self.engine.diagnostics,
            parallel: self.engine.parallel,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
