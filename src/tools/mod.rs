//! 工具层：五个知识源（web / arxiv / wikipedia / 计算器 / 代码执行）与统一网关

pub mod arxiv;
pub mod calculator;
pub mod code_runner;
pub mod gateway;
pub mod registry;
pub mod web_search;
pub mod wikipedia;

pub use arxiv::ArxivSearchTool;
pub use calculator::CalculatorTool;
pub use code_runner::CodeRunnerTool;
pub use gateway::{ToolError, ToolGateway};
pub use registry::{Tool, ToolId, ToolRecord, ToolRegistry};
pub use web_search::WebSearchTool;
pub use wikipedia::WikipediaSearchTool;
