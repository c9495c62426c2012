//! 研究主循环（状态机）
//!
//! Start -> Planning -> Executing -> Verifying -> {Executing (重试) | Synthesizing} -> Complete，
//! Planner/Executor 的致命失败进入 Error 吸收态。VERIFY->EXECUTE 仅在
//! decision == retry 且 iteration < max_retries 时发生；另有一道执行轮数硬上限，
//! 即使某阶段行为异常也保证最多 max_retries + 1 轮执行。每次转移先更新
//! current_step 再调用下一阶段，外部据此轮询进度。取消在每个阶段边界生效。

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::research::events::{send_event, ResearchEvent};
use crate::research::executor::Executor;
use crate::research::planner::Planner;
use crate::research::report;
use crate::research::state::{Decision, ResearchState, ResearchStep};
use crate::research::synthesizer::Synthesizer;
use crate::research::verifier::Verifier;

/// 一次研究运行的会话配置
pub struct ResearchSession<'a> {
    /// 规划器（必需）
    pub planner: &'a Planner,
    /// 执行器（必需）
    pub executor: &'a Executor,
    /// 校验器（必需）
    pub verifier: &'a Verifier,
    /// 综合器（必需）
    pub synthesizer: &'a Synthesizer,
    /// 取消令牌（必需）
    pub cancel_token: CancellationToken,
    /// 可选：事件推送通道
    pub event_tx: Option<&'a mpsc::UnboundedSender<ResearchEvent>>,
    /// 校验不通过时允许的重新执行次数
    pub max_retries: u32,
    /// proceed 判定阈值（0-100）
    pub confidence_threshold: u8,
}

impl<'a> ResearchSession<'a> {
    /// 创建最小配置的会话（重试上限 2、阈值 70 为默认策略）
    pub fn new(
        planner: &'a Planner,
        executor: &'a Executor,
        verifier: &'a Verifier,
        synthesizer: &'a Synthesizer,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            planner,
            executor,
            verifier,
            synthesizer,
            cancel_token,
            event_tx: None,
            max_retries: 2,
            confidence_threshold: 70,
        }
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: &'a mpsc::UnboundedSender<ResearchEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 设置重试上限与置信度阈值
    pub fn with_retry_policy(mut self, max_retries: u32, confidence_threshold: u8) -> Self {
        self.max_retries = max_retries;
        self.confidence_threshold = confidence_threshold;
        self
    }
}

fn transition(
    state: &mut ResearchState,
    step: ResearchStep,
    tx: &Option<&mpsc::UnboundedSender<ResearchEvent>>,
) {
    state.current_step = step;
    send_event(tx, ResearchEvent::StepUpdate { step });
}

/// 致命失败：记入 errors 并进入 Error 吸收态（不产出报告）
fn fail(
    state: &mut ResearchState,
    error: String,
    tx: &Option<&mpsc::UnboundedSender<ResearchEvent>>,
) {
    tracing::error!(step = %state.current_step, error = %error, "stage failed");
    send_event(tx, ResearchEvent::Error { text: error.clone() });
    state.errors.push(error);
    transition(state, ResearchStep::Error, tx);
}

/// 驱动一次完整的研究运行
///
/// 返回 Err 仅表示取消；其余结局都落在返回状态里：Complete 必有 report，
/// Error 必有非空 errors。
pub async fn research_loop(
    session: &ResearchSession<'_>,
    query: &str,
) -> Result<ResearchState, AgentError> {
    let mut state = ResearchState::new(query);
    let event_tx = session.event_tx;
    // 执行轮数硬上限：即使校验阶段行为异常也保证终止
    let max_passes = session.max_retries + 1;
    let mut executor_passes = 0u32;

    loop {
        if matches!(
            state.current_step,
            ResearchStep::Complete | ResearchStep::Error
        ) {
            break;
        }

        // 取消在每个阶段调用前检查
        if session.cancel_token.is_cancelled() {
            send_event(&event_tx, ResearchEvent::Error {
                text: "cancelled".to_string(),
            });
            return Err(AgentError::Cancelled);
        }

        match state.current_step {
            ResearchStep::Start => {
                transition(&mut state, ResearchStep::Planning, &event_tx);
            }

            ResearchStep::Planning => {
                match session.planner.plan(&state.query).await {
                    Ok(plan) => {
                        send_event(&event_tx, ResearchEvent::PlanReady {
                            subtasks: plan.subtasks.len(),
                            complexity: plan.complexity,
                        });
                        state.plan = Some(plan);
                        transition(&mut state, ResearchStep::Executing, &event_tx);
                    }
                    Err(e) => fail(&mut state, e.to_string(), &event_tx),
                }
            }

            ResearchStep::Executing => {
                let Some(plan) = state.plan.clone() else {
                    fail(&mut state, "no plan to execute".to_string(), &event_tx);
                    continue;
                };
                executor_passes += 1;
                let missing: Vec<String> = state
                    .verification
                    .as_ref()
                    .map(|v| v.missing_aspects.clone())
                    .unwrap_or_default();

                match session
                    .executor
                    .execute(&plan, &state.findings, &missing, &session.cancel_token, event_tx)
                    .await
                {
                    Ok(outcome) => {
                        // 整体替换，不跨轮合并
                        state.findings = outcome.findings;
                        state.errors.extend(outcome.errors);
                        transition(&mut state, ResearchStep::Verifying, &event_tx);
                    }
                    Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                    Err(e) => fail(&mut state, e.to_string(), &event_tx),
                }
            }

            ResearchStep::Verifying => {
                let Some(plan) = state.plan.clone() else {
                    fail(&mut state, "no plan to verify against".to_string(), &event_tx);
                    continue;
                };
                let verification = session
                    .verifier
                    .verify(
                        &state.query,
                        &plan,
                        &state.findings,
                        session.confidence_threshold,
                    )
                    .await;
                send_event(&event_tx, ResearchEvent::Verified {
                    confidence: verification.confidence,
                    decision: verification.decision,
                });

                let wants_retry = verification.decision == Decision::Retry;
                let missing = verification.missing_aspects.clone();
                state.verification = Some(verification);

                if wants_retry
                    && state.iteration < session.max_retries
                    && executor_passes < max_passes
                {
                    state.iteration += 1;
                    send_event(&event_tx, ResearchEvent::RetryScheduled {
                        iteration: state.iteration,
                        missing_aspects: missing,
                    });
                    transition(&mut state, ResearchStep::Executing, &event_tx);
                } else {
                    if wants_retry {
                        // 达到上限：无论置信度如何强制进入综合
                        send_event(&event_tx, ResearchEvent::RetryCeilingReached {
                            iteration: state.iteration,
                        });
                    }
                    transition(&mut state, ResearchStep::Synthesizing, &event_tx);
                }
            }

            ResearchStep::Synthesizing => {
                let Some(plan) = state.plan.clone() else {
                    fail(&mut state, "no plan to synthesize from".to_string(), &event_tx);
                    continue;
                };
                let payload = match session
                    .synthesizer
                    .synthesize(&state.query, &plan, &state.findings)
                    .await
                {
                    Ok(payload) => payload,
                    Err(e) => {
                        // 综合失败降级：findings 还在，装配回退报告而非放弃整个运行
                        let text = e.to_string();
                        tracing::warn!(error = %text, "synthesis failed, assembling fallback report");
                        send_event(&event_tx, ResearchEvent::Error { text: text.clone() });
                        state.errors.push(text);
                        report::fallback_payload(&state.query, &state.findings)
                    }
                };

                let report = report::assemble(&state.query, payload, &state.findings);
                send_event(&event_tx, ResearchEvent::ReportReady {
                    sections: report.sections.len(),
                    references: report.references.len(),
                });
                state.report = Some(report);

                let (prompt, completion, total) = session.planner.token_usage();
                send_event(&event_tx, ResearchEvent::TokenUsage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: total,
                });

                transition(&mut state, ResearchStep::Complete, &event_tx);
            }

            ResearchStep::Complete | ResearchStep::Error => break,
        }
    }

    Ok(state)
}
