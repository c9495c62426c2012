//! 流水线错误类型
//!
//! ToolError 是工具层的局部失败（见 tools::gateway），从不升级到这里；
//! 这里是阶段级 taxonomy：LLM 调用耗尽重试、schema 修复后仍不合法、配置缺失、取消。

use thiserror::Error;

use crate::llm::LlmError;

/// 阶段级错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 规划阶段失败：没有计划可供后续阶段使用，运行终止（含修复重询后仍不合法的输出）
    #[error("planning failed: {0}")]
    PlanningFailed(String),

    /// 执行阶段失败：没有任何子任务产出 Finding
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// 综合阶段失败：由状态机降级为基于 findings 的回退报告
    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    /// 配置错误（缺少凭证等），在任何阶段运行前快速失败
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,
}
