//! Scout - Rust 深度研究智能体
//!
//! 把一个自然语言研究问题变成带引用的多章节报告：固定的四阶段流水线
//! （规划 -> 执行 -> 校验 -> 综合）作用于同一份研究状态，校验不通过时在
//! 有界次数内回到执行阶段补充研究。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误 taxonomy 与流水线装配（ResearchPipeline）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Groq / Mock）、重试装饰器、JSON 提取边界
//! - **observability**: tracing 初始化
//! - **research**: 四个阶段、研究状态、报告装配与主循环（状态机）
//! - **tools**: 五个知识源（web / arxiv / wikipedia / 计算器 / 代码执行）与统一网关

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod research;
pub mod tools;

pub use crate::core::ResearchPipeline;
