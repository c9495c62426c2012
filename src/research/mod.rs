//! 认知层：四个阶段（Planner / Executor / Verifier / Synthesizer）、报告装配与研究主循环

pub mod events;
pub mod executor;
pub mod loop_;
pub mod planner;
pub mod report;
pub mod state;
pub mod synthesizer;
pub mod verifier;

pub use events::ResearchEvent;
pub use executor::{ExecutionOutcome, Executor};
pub use loop_::{research_loop, ResearchSession};
pub use planner::Planner;
pub use report::render_text;
pub use state::{
    Complexity, Decision, Finding, Plan, Priority, Report, ReportSection, ResearchState,
    ResearchStep, Source, Subtask, Verification,
};
pub use synthesizer::Synthesizer;
pub use verifier::Verifier;
