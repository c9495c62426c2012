//! Scout - Rust 深度研究智能体
//!
//! 入口：初始化日志与配置，装配流水线，运行单次研究并把报告渲染为纯文本输出。
//! Ctrl-C 触发取消令牌，在阶段边界生效。

use anyhow::Context;
use scout::config::load_config;
use scout::research::{render_text, ResearchEvent};
use scout::ResearchPipeline;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scout::observability::init();

    let query: String = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        eprintln!("usage: scout <research question>");
        std::process::exit(2);
    }

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        scout::config::AppConfig::default()
    });

    let pipeline = ResearchPipeline::from_config(&cfg).context("Failed to build pipeline")?;

    // Ctrl-C -> 取消令牌，在阶段边界生效
    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, cancelling run");
            signal_token.cancel();
        }
    });

    // 进度事件打到 stderr，报告本体走 stdout
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<ResearchEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                ResearchEvent::StepUpdate { step } => eprintln!("[scout] step: {}", step),
                ResearchEvent::PlanReady { subtasks, .. } => {
                    eprintln!("[scout] plan ready: {} subtasks", subtasks)
                }
                ResearchEvent::SubtaskStarted { id, description } => {
                    eprintln!("[scout] subtask {}: {}", id, description)
                }
                ResearchEvent::ToolFailure { tool, reason } => {
                    eprintln!("[scout] tool {} failed: {}", tool, reason)
                }
                ResearchEvent::Verified { confidence, .. } => {
                    eprintln!("[scout] verified: confidence {}", confidence)
                }
                ResearchEvent::RetryScheduled { iteration, .. } => {
                    eprintln!("[scout] retrying research (iteration {})", iteration)
                }
                ResearchEvent::ReportReady { sections, references } => {
                    eprintln!(
                        "[scout] report ready: {} sections, {} references",
                        sections, references
                    )
                }
                _ => {}
            }
        }
    });

    let state = pipeline
        .run(&query, cancel_token, Some(&event_tx))
        .await
        .context("Run cancelled")?;
    drop(event_tx);
    let _ = printer.await;

    match state.report {
        Some(ref report) => {
            println!("{}", render_text(report));
            if !state.errors.is_empty() {
                eprintln!("[scout] completed with {} warning(s):", state.errors.len());
                for error in &state.errors {
                    eprintln!("  - {}", error);
                }
            }
            Ok(())
        }
        None => {
            eprintln!("[scout] research failed, no report produced:");
            for error in &state.errors {
                eprintln!("  - {}", error);
            }
            std::process::exit(1);
        }
    }
}
