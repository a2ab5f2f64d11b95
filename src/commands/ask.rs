//! One-shot question command

use crate::commands::{build_controller, stream_turn};
use crate::config::Config;
use crate::error::Result;
use crate::session::TurnOutcome;
use colored::Colorize;

/// Ask a single question and print the streamed answer
///
/// # Arguments
///
/// * `config` - Global configuration
/// * `query` - The question
/// * `conversation` - Stored conversation to continue (full id or prefix);
///   a new one is created when absent
///
/// # Errors
///
/// Returns an error if the question is rejected, the turn fails, or the
/// quota is exhausted.
pub async fn run_ask(config: Config, query: String, conversation: Option<String>) -> Result<()> {
    let controller = build_controller(&config)?;

    let conversation_id = match conversation {
        Some(id) => controller.load_conversation(&id).await?,
        None => controller.open_conversation(None).await?,
    };
    tracing::debug!(conversation = %conversation_id, "Asking");

    match stream_turn(&controller, &conversation_id, &query).await? {
        TurnOutcome::Completed { title, usage } => {
            if let Some(title) = title {
                println!("{} {}", "Title:".dimmed(), title);
            }
            if let Some(usage) = usage {
                println!(
                    "{}",
                    format!(
                        "{} tokens ({} prompt, {} completion)",
                        usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
                    )
                    .dimmed()
                );
            }
            println!(
                "Continue with {}",
                format!(
                    "notestream ask --conversation {} <QUESTION>",
                    &conversation_id[..8.min(conversation_id.len())]
                )
                .cyan()
            );
            Ok(())
        }
        TurnOutcome::Failed { reason } => {
            anyhow::bail!("Question failed: {}", reason)
        }
        TurnOutcome::Cancelled => {
            println!("{}", "Cancelled.".yellow());
            Ok(())
        }
    }
}
