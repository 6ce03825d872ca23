//! Commit message drafting through an external language-model command.
//!
//! The [`MessageDrafter`] trait is the boundary between the commit cycle and
//! whatever produces message text. Drafting never fails from the caller's
//! point of view: every problem (missing credentials, a crashed or silent
//! command, a timeout) turns into [`DraftedMessage::Fallback`].

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use minijinja::{Environment, context};
use tracing::{debug, info, instrument, warn};

use crate::core::diff::truncate_diff;
use crate::io::config::LlmConfig;
use crate::io::process::{RunLimits, run_captured};

const COMMIT_MESSAGE_TEMPLATE: &str = include_str!("prompts/commit_message.md");

/// Message used whenever drafting fails.
pub const FALLBACK_MESSAGE: &str = "Automatic backup of working directory changes";

/// Upper bound on how much drafting command output is kept.
const DRAFT_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// Outcome of a drafting request. Both variants carry usable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftedMessage {
    /// Text produced by the model.
    Generated(String),
    /// Drafting failed; `message` is [`FALLBACK_MESSAGE`].
    Fallback { message: String, reason: String },
}

impl DraftedMessage {
    pub fn fallback(reason: impl Into<String>) -> Self {
        DraftedMessage::Fallback {
            message: FALLBACK_MESSAGE.to_string(),
            reason: reason.into(),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            DraftedMessage::Generated(text) => text,
            DraftedMessage::Fallback { message, .. } => message,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, DraftedMessage::Fallback { .. })
    }
}

/// Produces a commit message for a diff.
pub trait MessageDrafter: Send + Sync {
    fn draft(&self, diff: &str, llm: &LlmConfig) -> DraftedMessage;
}

/// Drafter that renders a prompt and pipes it into `llm.command`.
pub struct CommandDrafter {
    env: Environment<'static>,
}

impl CommandDrafter {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("commit_message", COMMIT_MESSAGE_TEMPLATE)
            .context("load commit message template")?;
        Ok(Self { env })
    }

    fn render_prompt(&self, diff: &str, max_diff_bytes: usize) -> Result<String> {
        let bounded = truncate_diff(diff, max_diff_bytes);
        if bounded.truncated_bytes > 0 {
            debug!(truncated_bytes = bounded.truncated_bytes, "diff truncated for prompt");
        }
        let template = self.env.get_template("commit_message")?;
        let rendered = template.render(context! {
            diff => bounded.text.trim_end(),
            truncated_bytes => bounded.truncated_bytes,
        })?;
        Ok(rendered)
    }

    fn render_argv(&self, llm: &LlmConfig) -> Result<Vec<String>> {
        llm.command
            .iter()
            .map(|arg| {
                self.env
                    .render_str(
                        arg,
                        context! {
                            provider => &llm.provider,
                            model => &llm.model,
                            options => &llm.options,
                        },
                    )
                    .with_context(|| format!("render command argument '{arg}'"))
            })
            .collect()
    }

    fn try_draft(&self, diff: &str, llm: &LlmConfig) -> Result<String> {
        let var = llm.api_key_env.trim();
        if !var.is_empty() {
            let present = std::env::var(var).is_ok_and(|value| !value.trim().is_empty());
            if !present {
                bail!("missing credentials: ${var} is not set");
            }
        }

        let prompt = self.render_prompt(diff, llm.max_diff_bytes)?;
        let argv = self.render_argv(llm)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("llm.command is empty"))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        let timeout = Duration::from_secs(llm.timeout_secs);
        let output = run_captured(
            cmd,
            Some(prompt.as_bytes()),
            RunLimits {
                timeout: Some(timeout),
                output_limit_bytes: Some(DRAFT_OUTPUT_LIMIT_BYTES),
            },
        )
        .with_context(|| format!("run {program}"))?;

        if output.timed_out {
            bail!("{program} timed out after {timeout:?}");
        }
        if !output.status.success() {
            let stderr = output.stderr_lossy();
            let first_line = stderr.lines().next().unwrap_or("").trim();
            bail!(
                "{program} exited with status {:?}: {first_line}",
                output.status.code()
            );
        }
        let message = output.stdout_lossy().trim().to_string();
        if message.is_empty() {
            bail!("{program} produced an empty message");
        }
        Ok(message)
    }
}

impl MessageDrafter for CommandDrafter {
    #[instrument(skip_all, fields(provider = %llm.provider, model = %llm.model, diff_bytes = diff.len()))]
    fn draft(&self, diff: &str, llm: &LlmConfig) -> DraftedMessage {
        match self.try_draft(diff, llm) {
            Ok(message) => {
                info!("drafted commit message");
                DraftedMessage::Generated(message)
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(%reason, "drafting failed, using fallback message");
                DraftedMessage::fallback(reason)
            }
        }
    }
}
