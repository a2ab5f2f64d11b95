use crate::cli::HistoryCommand;
use crate::commands::render::format_message;
use crate::error::{NotestreamError, Result};
use crate::storage::{ConversationStore, ConversationSummary};
use colored::Colorize;
use prettytable::{format, Table};

fn shorten_title(title: &str) -> String {
    if title.chars().count() > 40 {
        format!("{}...", title.chars().take(37).collect::<String>())
    } else {
        title.to_string()
    }
}

/// Print stored conversations as a table
pub fn print_conversations(conversations: &[ConversationSummary]) {
    if conversations.is_empty() {
        println!("{}", "No conversation history found.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Messages".bold(),
        "Last Updated".bold()
    ]);

    for conversation in conversations {
        let updated = conversation.updated_at.format("%Y-%m-%d %H:%M").to_string();
        table.add_row(prettytable::row![
            conversation.short_id().cyan(),
            shorten_title(&conversation.title),
            conversation.message_count,
            updated
        ]);
    }

    println!("\nConversation History:");
    table.printstd();
    println!();
    println!(
        "Use {} to resume a conversation.",
        "notestream chat --resume <ID>".cyan()
    );
    println!();
}

/// Handle history commands
pub async fn handle_history(command: HistoryCommand, store: &dyn ConversationStore) -> Result<()> {
    match command {
        HistoryCommand::List => {
            let conversations = store.list_conversations().await?;
            print_conversations(&conversations);
        }
        HistoryCommand::Show { id } => {
            let summary = store
                .find_conversation(&id)
                .await?
                .ok_or_else(|| NotestreamError::UnknownConversation(id.clone()))?;
            let messages = store.load_messages(&summary.id).await?;

            println!(
                "\n{} {}",
                summary.title.bold(),
                format!("({})", summary.id).dimmed()
            );
            for message in &messages {
                println!("{}", format_message(message));
            }
            println!();
        }
        HistoryCommand::Delete { id } => {
            if store.delete_conversation(&id).await? {
                println!("{}", format!("Deleted conversation {}", id).green());
            } else {
                return Err(NotestreamError::UnknownConversation(id).into());
            }
        }
    }

    Ok(())
}
