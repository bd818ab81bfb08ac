//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HOMEOSTAT__*` 覆盖（双下划线表示嵌套，如 `HOMEOSTAT__MONITOR__ENABLED=false`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::mode::ModeThresholds;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub monitor: MonitorSection,
    pub cache: CacheSection,
    pub mode: ModeSection,
    pub executor: ExecutorSection,
    pub reflection: ReflectionSection,
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
        }
    }
}

/// [monitor] 段：请求级资源监控开关与采样间隔
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    5
}

impl MonitorSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

/// [cache] 段：传感器缓存 TTL 与单次昂贵轮询的超时
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_seconds: u64,
}

fn default_cache_ttl() -> u64 {
    10
}

fn default_poll_timeout() -> u64 {
    5
}

impl CacheSection {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_seconds.max(1))
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
            poll_timeout_seconds: default_poll_timeout(),
        }
    }
}

/// [mode] 段：迟滞参数与各模式阈值
#[derive(Debug, Clone, Deserialize)]
pub struct ModeSection {
    /// ALERT 下连续越线多少次评估后进入 DEGRADED（含触发 ALERT 的那一次）
    #[serde(default = "default_degrade_after")]
    pub degrade_after_breaches: u32,
    /// DEGRADED 下连续无越线多少次后内部触发恢复；0 表示仅接受人工触发
    #[serde(default = "default_recovery_after_clear")]
    pub recovery_after_clear: u32,
    /// RECOVERY 下连续通过多少次自检后回到 NORMAL
    #[serde(default = "default_recovery_checks")]
    pub recovery_checks: u32,
    #[serde(default)]
    pub thresholds: ModeThresholds,
}

fn default_degrade_after() -> u32 {
    3
}

fn default_recovery_after_clear() -> u32 {
    2
}

fn default_recovery_checks() -> u32 {
    1
}

impl Default for ModeSection {
    fn default() -> Self {
        Self {
            degrade_after_breaches: default_degrade_after(),
            recovery_after_clear: default_recovery_after_clear(),
            recovery_checks: default_recovery_checks(),
            thresholds: ModeThresholds::default(),
        }
    }
}

/// [executor] 段：外部调用超时、退避与重试上限
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default)]
    pub max_retries: MaxRetriesSection,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_model_timeout_secs() -> u64 {
    60
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    8000
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            model_timeout_secs: default_model_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_retries: MaxRetriesSection::default(),
        }
    }
}

/// [executor.max_retries] 段：按外部调用类型区分的重试次数（不含首次调用）
#[derive(Debug, Clone, Deserialize)]
pub struct MaxRetriesSection {
    #[serde(default = "default_max_retries")]
    pub tool: u32,
    #[serde(default = "default_max_retries")]
    pub model: u32,
}

fn default_max_retries() -> u32 {
    2
}

impl Default for MaxRetriesSection {
    fn default() -> Self {
        Self {
            tool: default_max_retries(),
            model: default_max_retries(),
        }
    }
}

/// [reflection] 段：反思各档开关、生成超时与记录落盘路径
#[derive(Debug, Clone, Deserialize)]
pub struct ReflectionSection {
    #[serde(default = "default_true")]
    pub schema_guided: bool,
    #[serde(default = "default_true")]
    pub manual_parse: bool,
    #[serde(default = "default_reflection_timeout")]
    pub timeout_secs: u64,
    pub store_path: Option<PathBuf>,
}

fn default_reflection_timeout() -> u64 {
    30
}

impl Default for ReflectionSection {
    fn default() -> Self {
        Self {
            schema_guided: true,
            manual_parse: true,
            timeout_secs: default_reflection_timeout(),
            store_path: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 HOMEOSTAT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HOMEOSTAT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HOMEOSTAT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
