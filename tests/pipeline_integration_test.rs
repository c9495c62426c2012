//! 研究流水线集成测试：用脚本化 Mock LLM 与桩工具驱动完整状态机

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use scout::core::AgentError;
use scout::llm::{LlmError, MockLlmClient};
use scout::research::{
    research_loop, Decision, Executor, Planner, ResearchSession, ResearchStep, Synthesizer,
    Verifier,
};
use scout::tools::{Tool, ToolGateway, ToolId, ToolRecord, ToolRegistry};

/// 固定记录桩工具，共享调用计数
struct StaticTool {
    id: ToolId,
    records: Vec<ToolRecord>,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Tool for StaticTool {
    fn id(&self) -> ToolId {
        self.id
    }

    fn description(&self) -> &str {
        "static test records"
    }

    async fn search(&self, _query: &str) -> Result<Vec<ToolRecord>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.clone())
    }
}

/// 总是失败的桩工具（模拟网络中断）
struct FailingTool {
    id: ToolId,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Tool for FailingTool {
    fn id(&self) -> ToolId {
        self.id
    }

    fn description(&self) -> &str {
        "always fails"
    }

    async fn search(&self, _query: &str) -> Result<Vec<ToolRecord>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err("connection refused".to_string())
    }
}

fn record(title: &str, url: Option<&str>) -> ToolRecord {
    ToolRecord {
        title: title.to_string(),
        url: url.map(String::from),
        snippet: format!("snippet from {}", title),
    }
}

fn working_gateway(calls: Arc<AtomicU32>) -> Arc<ToolGateway> {
    let mut registry = ToolRegistry::new();
    registry.register(StaticTool {
        id: ToolId::WebSearch,
        records: vec![
            record("Search summary", None),
            record("Web article", Some("https://blog.example.org/rag")),
        ],
        calls: calls.clone(),
    });
    registry.register(StaticTool {
        id: ToolId::EncyclopediaSearch,
        records: vec![record(
            "Retrieval-augmented generation",
            Some("https://en.wikipedia.org/wiki/Retrieval-augmented_generation"),
        )],
        calls: calls.clone(),
    });
    registry.register(StaticTool {
        id: ToolId::AcademicSearch,
        records: vec![record(
            "RAG for Knowledge-Intensive NLP",
            Some("http://arxiv.org/abs/2005.11401v4"),
        )],
        calls,
    });
    Arc::new(ToolGateway::new(registry, 5, 1))
}

fn failing_gateway(calls: Arc<AtomicU32>) -> Arc<ToolGateway> {
    let mut registry = ToolRegistry::new();
    registry.register(FailingTool {
        id: ToolId::WebSearch,
        calls: calls.clone(),
    });
    registry.register(FailingTool {
        id: ToolId::EncyclopediaSearch,
        calls,
    });
    Arc::new(ToolGateway::new(registry, 5, 1))
}

fn plan_json() -> String {
    r#"{
        "query_analysis": "user wants to understand how RAG systems work",
        "complexity": "moderate",
        "subtasks": [
            {"id": 1, "description": "RAG fundamentals and definitions", "tools_needed": ["wikipedia", "tavily"]},
            {"id": 2, "description": "RAG research and evaluation", "tools_needed": ["arxiv", "tavily"]}
        ],
        "expected_sections": ["Introduction", "Architecture", "Applications", "Conclusion"],
        "estimated_sources": 8
    }"#
    .to_string()
}

fn single_subtask_plan_json() -> String {
    r#"{
        "query_analysis": "outage scenario",
        "complexity": "simple",
        "subtasks": [
            {"id": 1, "description": "topic overview", "tools_needed": ["tavily", "wikipedia"]}
        ],
        "expected_sections": ["Overview"],
        "estimated_sources": 3
    }"#
    .to_string()
}

fn finding_json(text: &str) -> String {
    format!(
        r#"{{"findings": "{} - detailed enough to pass the length check", "key_points": []}}"#,
        text
    )
}

fn verification_json(confidence: u32, missing: &[&str]) -> String {
    let missing: Vec<String> = missing.iter().map(|m| format!("\"{}\"", m)).collect();
    format!(
        r#"{{"confidence": {}, "coverage_notes": "notes", "missing_aspects": [{}]}}"#,
        confidence,
        missing.join(",")
    )
}

fn report_json(sections: usize) -> String {
    let body: Vec<String> = (1..=sections)
        .map(|i| {
            format!(
                r#"{{"heading": "Section {}", "content": "Content for section {} [1]"}}"#,
                i, i
            )
        })
        .collect();
    format!(
        r#"{{"title": "How RAG Systems Work", "executive_summary": "A summary.", "sections": [{}]}}"#,
        body.join(",")
    )
}

struct Stages {
    planner: Planner,
    executor: Executor,
    verifier: Verifier,
    synthesizer: Synthesizer,
}

fn make_stages(llm: Arc<MockLlmClient>, gateway: Arc<ToolGateway>) -> Stages {
    Stages {
        planner: Planner::new(llm.clone()),
        executor: Executor::new(llm.clone(), gateway, 3, Duration::ZERO),
        verifier: Verifier::new(llm.clone()),
        synthesizer: Synthesizer::new(llm, Duration::ZERO),
    }
}

fn make_session(stages: &Stages) -> ResearchSession<'_> {
    ResearchSession::new(
        &stages.planner,
        &stages.executor,
        &stages.verifier,
        &stages.synthesizer,
        CancellationToken::new(),
    )
    .with_retry_policy(2, 70)
}

#[tokio::test]
async fn test_happy_path_reaches_complete() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_ok(plan_json());
    llm.push_ok(finding_json("fundamentals of RAG"));
    llm.push_ok(finding_json("research on RAG evaluation"));
    llm.push_ok(verification_json(85, &[]));
    llm.push_ok(report_json(6));

    let stages = make_stages(llm.clone(), working_gateway(Arc::new(AtomicU32::new(0))));
    let state = research_loop(&make_session(&stages), "Explain how RAG systems work")
        .await
        .unwrap();

    assert!(state.is_complete());
    assert_eq!(state.current_step, ResearchStep::Complete);
    assert_eq!(state.iteration, 0);
    assert!(state.errors.is_empty());

    // 2 个子任务各产出一个带来源的 Finding
    assert_eq!(state.findings.len(), 2);
    for finding in &state.findings {
        assert!(!finding.sources.is_empty());
        assert!(!finding.summary.is_empty());
    }

    let verification = state.verification.as_ref().unwrap();
    assert_eq!(verification.confidence, 85);
    assert_eq!(verification.decision, Decision::Proceed);

    let report = state.report.as_ref().unwrap();
    assert_eq!(report.sections.len(), 6);
    // tavily 的记录在两个子任务都出现：references 必须按 URL 去重
    let mut urls: Vec<&str> = report.references.iter().map(|s| s.url.as_str()).collect();
    let total = urls.len();
    urls.sort();
    urls.dedup();
    assert_eq!(urls.len(), total);
    assert_eq!(total, 3);
    // 无链接的「Search summary」记录不得进入引用
    assert!(report.references.iter().all(|s| s.title != "Search summary"));

    // plan(1) + 综合(2) + 校验(1) + 报告(1)
    assert_eq!(llm.call_count(), 5);
}

#[tokio::test]
async fn test_finding_subtask_ids_reference_plan() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_ok(plan_json());
    llm.push_ok(finding_json("a"));
    llm.push_ok(finding_json("b"));
    llm.push_ok(verification_json(90, &[]));
    llm.push_ok(report_json(5));

    let stages = make_stages(llm, working_gateway(Arc::new(AtomicU32::new(0))));
    let state = research_loop(&make_session(&stages), "q").await.unwrap();

    let plan_ids: Vec<u32> = state.plan.as_ref().unwrap().subtask_ids();
    for finding in &state.findings {
        assert!(plan_ids.contains(&finding.subtask_id));
    }
}

#[tokio::test]
async fn test_low_confidence_retries_until_ceiling() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_ok(plan_json());
    // 第 1 轮执行 + 校验 40 -> 重试
    llm.push_ok(finding_json("round one, subtask one"));
    llm.push_ok(finding_json("round one, subtask two"));
    llm.push_ok(verification_json(40, &["subtask 1", "subtask 2"]));
    // 第 2 轮执行 + 校验 40 -> 重试
    llm.push_ok(finding_json("round two, subtask one"));
    llm.push_ok(finding_json("round two, subtask two"));
    llm.push_ok(verification_json(40, &["subtask 1", "subtask 2"]));
    // 第 3 轮执行 + 校验仍 40，但 iteration 已到上限 -> 强制进入综合
    llm.push_ok(finding_json("round three, subtask one"));
    llm.push_ok(finding_json("round three, subtask two"));
    llm.push_ok(verification_json(40, &["subtask 1", "subtask 2"]));
    llm.push_ok(report_json(5));

    let tool_calls = Arc::new(AtomicU32::new(0));
    let stages = make_stages(llm.clone(), working_gateway(tool_calls.clone()));
    let state = research_loop(&make_session(&stages), "q").await.unwrap();

    // max_verification_retries = 2 -> 执行器总共跑 3 轮后强制 proceed
    assert_eq!(state.current_step, ResearchStep::Complete);
    assert_eq!(state.iteration, 2);
    assert!(state.report.is_some());
    // 每轮 2 个子任务 × 2 个工具 = 4 次调用，3 轮共 12 次
    assert_eq!(tool_calls.load(Ordering::SeqCst), 12);
    // plan(1) + 3×(综合 2 + 校验 1) + 报告(1)
    assert_eq!(llm.call_count(), 11);
    // findings 是整体替换：留下的是第 3 轮的结果，而非三轮累积
    assert_eq!(state.findings.len(), 2);
    assert!(state.findings[0].summary.contains("round three"));
}

#[tokio::test]
async fn test_total_outage_still_completes() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_ok(single_subtask_plan_json());
    llm.push_ok(finding_json("best effort summary without evidence"));
    llm.push_ok(verification_json(80, &[]));
    llm.push_ok(report_json(5));

    let tool_calls = Arc::new(AtomicU32::new(0));
    let stages = make_stages(llm, failing_gateway(tool_calls));
    let state = research_loop(&make_session(&stages), "q").await.unwrap();

    // 工具全灭：仍然恰好一个 Finding，失败记录在 tool_errors 里
    assert_eq!(state.current_step, ResearchStep::Complete);
    assert_eq!(state.findings.len(), 1);
    let finding = &state.findings[0];
    assert!(finding.sources.is_empty());
    assert_eq!(finding.tool_errors.len(), 2);
    assert!(state.report.is_some());
    assert!(state.report.as_ref().unwrap().references.is_empty());
}

#[tokio::test]
async fn test_synthesis_failure_degrades_to_fallback_report() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_ok(plan_json());
    llm.push_ok(finding_json("finding one"));
    llm.push_ok(finding_json("finding two"));
    llm.push_ok(verification_json(85, &[]));
    // 综合两次调用都失败 -> 回退报告
    llm.push_err(LlmError::Timeout);
    llm.push_err(LlmError::Transient("503".into()));

    let stages = make_stages(llm, working_gateway(Arc::new(AtomicU32::new(0))));
    let state = research_loop(&make_session(&stages), "q").await.unwrap();

    assert_eq!(state.current_step, ResearchStep::Complete);
    let report = state.report.as_ref().unwrap();
    assert!(report.sections.len() >= 5 && report.sections.len() <= 8);
    assert!(!report.references.is_empty());
    // 降级被记录，但运行仍算完成
    assert!(state.errors.iter().any(|e| e.contains("synthesis failed")));
}

#[tokio::test]
async fn test_planner_failure_terminates_with_error() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_err(LlmError::Api("model rejected the request".into()));

    let stages = make_stages(llm, working_gateway(Arc::new(AtomicU32::new(0))));
    let state = research_loop(&make_session(&stages), "q").await.unwrap();

    // 终态二选一：这里是 ERROR + 非空 errors + 无报告
    assert_eq!(state.current_step, ResearchStep::Error);
    assert!(state.report.is_none());
    assert!(!state.errors.is_empty());
    assert!(state.plan.is_none());
    assert!(state.findings.is_empty());
}

#[tokio::test]
async fn test_malformed_plan_repaired_once() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_ok("I could not produce JSON, sorry".to_string());
    llm.push_ok(plan_json());
    llm.push_ok(finding_json("a"));
    llm.push_ok(finding_json("b"));
    llm.push_ok(verification_json(75, &[]));
    llm.push_ok(report_json(5));

    let stages = make_stages(llm, working_gateway(Arc::new(AtomicU32::new(0))));
    let state = research_loop(&make_session(&stages), "q").await.unwrap();

    assert_eq!(state.current_step, ResearchStep::Complete);
    assert!(state.report.is_some());
}

#[tokio::test]
async fn test_oversized_report_clamped_to_range() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_ok(plan_json());
    llm.push_ok(finding_json("a"));
    llm.push_ok(finding_json("b"));
    llm.push_ok(verification_json(75, &[]));
    llm.push_ok(report_json(12));

    let stages = make_stages(llm, working_gateway(Arc::new(AtomicU32::new(0))));
    let state = research_loop(&make_session(&stages), "q").await.unwrap();

    let report = state.report.as_ref().unwrap();
    assert!(report.sections.len() >= 5 && report.sections.len() <= 8);
}

#[tokio::test]
async fn test_cancellation_surfaces_as_error() {
    let llm = Arc::new(MockLlmClient::new());
    let stages = make_stages(llm, working_gateway(Arc::new(AtomicU32::new(0))));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let session = ResearchSession::new(
        &stages.planner,
        &stages.executor,
        &stages.verifier,
        &stages.synthesizer,
        cancel,
    );

    let err = research_loop(&session, "q").await.unwrap_err();
    assert!(matches!(err, AgentError::Cancelled));
}
