//! 校验阶段：评估研究覆盖度并给出 proceed / retry 决策
//!
//! 一次 LLM 调用产出 confidence（0-100）与 missing_aspects；决策规则归校验器所有：
//! confidence >= 阈值 则 proceed，阈值由配置传入。LLM 失败时开放式降级
//! （confidence = 0，decision = proceed），流水线不因校验不可用而停摆。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::llm::{extract, LlmClient, Message};
use crate::research::state::{Decision, Finding, Plan, Verification};

const VERIFIER_SYSTEM_PROMPT: &str = r#"You are a research verifier. Review the plan and the collected findings and judge coverage and quality.

Evaluation criteria:
1. Does the research cover every subtask of the plan?
2. Are the findings specific and well-sourced?
3. Is there enough depth for a comprehensive report?

Be reasonably lenient: if the core aspects are covered, score high.
In missing_aspects, name the under-covered subtask ids or themes (empty list if nothing is missing).

Respond with ONLY a JSON object matching this schema:
{schema}"#;

/// 校验输出的线格式
#[derive(Debug, Deserialize, JsonSchema)]
pub struct VerificationPayload {
    /// 0-100 的完整性/质量评分
    pub confidence: i64,
    #[serde(default)]
    pub coverage_notes: String,
    #[serde(default)]
    pub missing_aspects: Vec<String>,
}

/// 校验器
pub struct Verifier {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Verifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        let schema = schemars::schema_for!(VerificationPayload);
        let schema_text =
            serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());
        Self {
            llm,
            system_prompt: VERIFIER_SYSTEM_PROMPT.replace("{schema}", &schema_text),
        }
    }

    /// 决策规则：confidence >= 阈值 则 proceed
    pub fn decide(confidence: u8, threshold: u8) -> Decision {
        if confidence >= threshold {
            Decision::Proceed
        } else {
            Decision::Retry
        }
    }

    /// 校验 findings；不会使运行失败（LLM/结构问题均降级为 proceed）
    pub async fn verify(
        &self,
        query: &str,
        plan: &Plan,
        findings: &[Finding],
        threshold: u8,
    ) -> Verification {
        let mut messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(render_review_request(query, plan, findings)),
        ];

        let raw = match self.llm.complete(&messages).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "verifier LLM call failed, failing open");
                return fail_open(format!("verification unavailable (LLM call failed: {})", e));
            }
        };

        let payload = match extract::decode::<VerificationPayload>(&raw) {
            Ok(p) => p,
            Err(first_error) => {
                // 一次修复重询，仍失败则开放式降级
                tracing::warn!(error = %first_error, "verification output rejected, reprompting");
                messages.push(Message::assistant(raw));
                messages.push(Message::user(format!(
                    "Your previous output could not be used: {}. \
                     Respond again with ONLY the JSON object matching the schema.",
                    first_error
                )));
                match self.llm.complete(&messages).await {
                    Ok(raw) => match extract::decode::<VerificationPayload>(&raw) {
                        Ok(p) => p,
                        Err(e) => {
                            return fail_open(format!(
                                "verification output invalid after repair ({}), proceeding",
                                e
                            ))
                        }
                    },
                    Err(e) => {
                        return fail_open(format!(
                            "verification unavailable (LLM call failed: {})",
                            e
                        ))
                    }
                }
            }
        };

        let confidence = payload.confidence.clamp(0, 100) as u8;
        let decision = Self::decide(confidence, threshold);
        Verification {
            confidence,
            coverage_notes: payload.coverage_notes,
            decision,
            // 不变式：missing_aspects 仅在 retry 时非空
            missing_aspects: match decision {
                Decision::Retry => payload.missing_aspects,
                Decision::Proceed => Vec::new(),
            },
        }
    }
}

/// 开放式降级：proceed + confidence 0 + 说明
fn fail_open(note: String) -> Verification {
    Verification {
        confidence: 0,
        coverage_notes: note,
        decision: Decision::Proceed,
        missing_aspects: Vec::new(),
    }
}

fn render_review_request(query: &str, plan: &Plan, findings: &[Finding]) -> String {
    let source_count: usize = findings.iter().map(|f| f.sources.len()).sum();
    let mut text = format!(
        "Original query: {}\n\nPlan analysis: {}\nPlanned subtasks:\n",
        query, plan.query_analysis
    );
    for sub in &plan.subtasks {
        text.push_str(&format!("- [{}] {}\n", sub.id, sub.description));
    }
    text.push_str("\nCollected findings:\n");
    for f in findings {
        text.push_str(&format!(
            "\nSubtask {} ({} sources, {} tool failures):\n{}\n",
            f.subtask_id,
            f.sources.len(),
            f.tool_errors.len(),
            f.summary
        ));
    }
    text.push_str(&format!("\nTotal sources: {}\n", source_count));
    text
}
