//! 沙箱代码执行工具：禁止危险操作，临时目录内运行
//!
//! 仅当查询本身是 Python 代码时执行；禁止文件/网络/进程类操作的子串；
//! 代码写入临时目录后以超时运行，超时即杀死子进程。

use async_trait::async_trait;
use tokio::process::Command;

use crate::tools::registry::ToolId;
use crate::tools::{Tool, ToolRecord};

/// 禁止的操作子串
const FORBIDDEN_SUBSTR: &[&str] = &[
    "open(",
    "file(",
    "exec(",
    "eval(",
    "compile(",
    "__import__",
    "subprocess",
    "os.system",
    "os.popen",
    "shutil",
    "pathlib",
    "socket",
    "urllib",
    "requests",
    "pickle",
    "shelve",
    "marshal",
];

/// 输出截断上限
const MAX_OUTPUT_CHARS: usize = 2_000;

/// 代码执行工具
pub struct CodeRunnerTool {
    python_bin: String,
    timeout_secs: u64,
}

/// 粗略判断文本是否像一段 Python 代码而非自然语言
fn looks_like_code(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }
    ["print(", "def ", "import ", "for ", "while ", "lambda ", "return "]
        .iter()
        .any(|kw| text.contains(kw))
        || (text.contains('=') && text.contains('\n'))
}

impl CodeRunnerTool {
    pub fn new(python_bin: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            python_bin: python_bin.into(),
            timeout_secs,
        }
    }

    fn screen(code: &str) -> Result<(), String> {
        for pattern in FORBIDDEN_SUBSTR {
            if code.contains(pattern) {
                return Err(format!("code contains forbidden operation: {}", pattern));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for CodeRunnerTool {
    fn id(&self) -> ToolId {
        ToolId::CodeExecutor
    }

    fn description(&self) -> &str {
        "Run a short Python snippet in a sandbox for demonstrations and numeric examples. The query must be the code itself."
    }

    async fn search(&self, query: &str) -> Result<Vec<ToolRecord>, String> {
        if !looks_like_code(query) {
            // 子任务描述不是代码：无事可做
            tracing::debug!("code runner skipped non-code query");
            return Ok(vec![]);
        }
        Self::screen(query)?;

        let dir = tempfile::tempdir().map_err(|e| format!("tempdir failed: {}", e))?;
        let script = dir.path().join("snippet.py");
        std::fs::write(&script, query).map_err(|e| format!("write snippet: {}", e))?;

        tracing::info!(timeout_secs = self.timeout_secs, "code runner executing snippet");

        let mut cmd = Command::new(&self.python_bin);
        cmd.arg(&script)
            .current_dir(dir.path())
            .kill_on_drop(true);

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(self.timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| format!("execution timed out after {}s", self.timeout_secs))?
        .map_err(|e| format!("failed to run {}: {}", self.python_bin, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(format!("exit {:?}: {}", output.status.code(), stderr.trim()));
        }

        let mut text = stdout.trim().to_string();
        if text.is_empty() {
            text = "Code executed successfully (no output)".to_string();
        }
        if !stderr.trim().is_empty() {
            text.push_str(&format!("\nstderr: {}", stderr.trim()));
        }
        if text.chars().count() > MAX_OUTPUT_CHARS {
            text = format!(
                "{}...",
                text.chars().take(MAX_OUTPUT_CHARS).collect::<String>()
            );
        }

        Ok(vec![ToolRecord {
            title: "Code execution".to_string(),
            url: None,
            snippet: text,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_code() {
        assert!(looks_like_code("print('hi')"));
        assert!(looks_like_code("import math\nprint(math.pi)"));
        assert!(looks_like_code("x = 1\ny = 2"));
        assert!(!looks_like_code("explain how transformers work"));
        assert!(!looks_like_code(""));
    }

    #[test]
    fn test_screen_blocks_forbidden() {
        assert!(CodeRunnerTool::screen("open('/etc/passwd')").is_err());
        assert!(CodeRunnerTool::screen("import subprocess").is_err());
        assert!(CodeRunnerTool::screen("print(1 + 1)").is_ok());
    }

    #[tokio::test]
    async fn test_non_code_query_yields_empty() {
        let tool = CodeRunnerTool::new("python3", 5);
        let records = tool.search("what is attention").await.unwrap();
        assert!(records.is_empty());
    }
}
