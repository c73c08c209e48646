//! CommandExecutor - 外部エージェントをプロセスとして起動する Executor
//!
//! ホスト側のブリッジ（ブラウザ自動化エージェント）を子プロセスとして
//! 呼び出します。引数中の `{target}` / `{query}` を呼び出しごとに置換します。
//!
//! - exit 0 → `Success { payload: stdout }`
//! - それ以外 → `Failure { error: stderr }`（空なら exit code）
//! - 起動失敗 → `Failure`（プログラムが見つからない等）

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::ExecutorConfig;
use crate::domain::ExecutorOutcome;
use crate::ports::Executor;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `None` when no program is configured.
    pub fn from_config(config: &ExecutorConfig) -> Option<Self> {
        let program = config.program.as_ref()?;
        Some(Self::new(program.clone()).args(config.args.iter().cloned()))
    }

    fn render_args(&self, target: &str, query: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| substitute(arg, target, query))
            .collect()
    }
}

/// Expand `{target}` and `{query}` in one pass. Substituted text is never rescanned.
fn substitute(template: &str, target: &str, query: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{target}") {
            out.push_str(target);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{query}") {
            out.push_str(query);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(&self, target: &str, query: &str) -> ExecutorOutcome {
        let args = self.render_args(target, query);
        debug!(program = %self.program, ?args, "spawning executor");

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(err) => {
                return ExecutorOutcome::failure(format!(
                    "failed to start {}: {err}",
                    self.program
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            return ExecutorOutcome::success(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            let code = output.status.code().unwrap_or(-1);
            ExecutorOutcome::failure(format!("executor exited with code {code}"))
        } else {
            ExecutorOutcome::failure(stderr)
        }
    }
}
