//! 研究过程事件：供前端展示进度（步骤切换、子任务、工具调用、重试与用量）

use serde::Serialize;
use tokio::sync::mpsc;

use crate::research::state::{Complexity, Decision, ResearchStep};
use crate::tools::ToolId;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchEvent {
    /// 状态机进入新节点
    StepUpdate { step: ResearchStep },
    /// 规划完成
    PlanReady {
        subtasks: usize,
        complexity: Complexity,
    },
    /// 开始执行某个子任务
    SubtaskStarted { id: u32, description: String },
    /// 调用知识源
    ToolCall { tool: ToolId, query: String },
    /// 工具调用失败（记录到所属 Finding，不中断子任务）
    ToolFailure { tool: ToolId, reason: String },
    /// 子任务完成
    SubtaskComplete { id: u32, sources: usize },
    /// 校验结论
    Verified { confidence: u8, decision: Decision },
    /// 派发重试
    RetryScheduled {
        iteration: u32,
        missing_aspects: Vec<String>,
    },
    /// 达到重试上限，强制进入综合
    RetryCeilingReached { iteration: u32 },
    /// 报告装配完成
    ReportReady { sections: usize, references: usize },
    /// 本次运行的累计 token 用量
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    },
    /// 错误
    Error { text: String },
}

/// 事件可选发送：未接事件通道时静默丢弃
pub(crate) fn send_event(
    tx: &Option<&mpsc::UnboundedSender<ResearchEvent>>,
    ev: ResearchEvent,
) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
