//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SCOUT__*` 覆盖（双下划线表示嵌套，如 `SCOUT__LLM__MODEL=...`）。
//! API Key 不进配置文件，始终从环境变量读取（GROQ_API_KEY / OPENAI_API_KEY / TAVILY_API_KEY）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

/// [app] 段：应用名
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择、采样温度、限速与重试
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    /// 后端：groq / openai；无可用 API Key 时回落到 Mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// 采样温度（复刻研究类任务偏保守的取值）
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// 覆盖 OpenAI 兼容端点的 base_url（provider=openai 时生效）
    pub base_url: Option<String>,
    /// 相邻 LLM 调用之间的延迟（毫秒），用于限速保护
    #[serde(default = "default_call_delay_ms")]
    pub call_delay_ms: u64,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
    #[serde(default)]
    pub retry: LlmRetrySection,
}

fn default_provider() -> String {
    "groq".to_string()
}

fn default_model() -> String {
    "llama-3.1-8b-instant".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_call_delay_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

fn default_request_timeout() -> u64 {
    60
}

/// [llm.retry] 段：瞬时错误重试（超时/限流），格式错误不重试
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmRetrySection {
    #[serde(default = "default_llm_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_llm_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_llm_max_attempts() -> u32 {
    3
}

fn default_llm_backoff_ms() -> u64 {
    500
}

/// [tools] 段：单次调用超时、超时重试上限、并发上限与各知识源结果数
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 超时重试的尝试上限（含首次）
    #[serde(default = "default_tool_max_attempts")]
    pub max_attempts: u32,
    /// 同一子任务内工具调用的并发上限
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
    #[serde(default = "default_max_arxiv_results")]
    pub max_arxiv_results: usize,
    #[serde(default = "default_max_wiki_results")]
    pub max_wiki_results: usize,
    /// 代码执行工具使用的解释器
    #[serde(default = "default_python_bin")]
    pub python_bin: String,
    /// 代码执行超时（秒），独立于通用工具超时
    #[serde(default = "default_code_timeout_secs")]
    pub code_timeout_secs: u64,
}

fn default_tool_timeout_secs() -> u64 {
    20
}

fn default_tool_max_attempts() -> u32 {
    3
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_search_results() -> usize {
    5
}

fn default_max_arxiv_results() -> usize {
    3
}

fn default_max_wiki_results() -> usize {
    2
}

fn default_python_bin() -> String {
    "python3".to_string()
}

fn default_code_timeout_secs() -> u64 {
    5
}

/// [pipeline] 段：校验重试上限与置信度阈值
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PipelineSection {
    /// 校验不通过时允许的重新执行次数
    #[serde(default = "default_max_verification_retries")]
    pub max_verification_retries: u32,
    /// confidence >= 阈值 时判定 proceed
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: u8,
}

fn default_max_verification_retries() -> u32 {
    2
}

fn default_confidence_threshold() -> u8 {
    70
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            tools: ToolsSection::default(),
            pipeline: PipelineSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 SCOUT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SCOUT__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("SCOUT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.provider, "groq");
        assert_eq!(cfg.llm.retry.max_attempts, 3);
        assert_eq!(cfg.tools.max_attempts, 3);
        assert_eq!(cfg.tools.max_search_results, 5);
        assert_eq!(cfg.pipeline.max_verification_retries, 2);
        assert_eq!(cfg.pipeline.confidence_threshold, 70);
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let cfg: AppConfig = toml_from_str(
            r#"
            [llm]
            model = "llama-3.3-70b-versatile"

            [pipeline]
            confidence_threshold = 80
            "#,
        );
        assert_eq!(cfg.llm.model, "llama-3.3-70b-versatile");
        assert_eq!(cfg.llm.provider, "groq");
        assert_eq!(cfg.pipeline.confidence_threshold, 80);
        assert_eq!(cfg.pipeline.max_verification_retries, 2);
    }

    fn toml_from_str(s: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(s, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .expect("valid config")
    }
}
