//! Interactive chat mode handler.
//!
//! Runs a readline-based loop that submits each line as a question to the
//! stream controller and prints the answer as it streams. Lines starting
//! with `/` are special commands (see [`special_commands`]).
//!
//! The session also joins the configured realtime room: messages posted
//! with `/say` and peers' messages show up in the current transcript.
//!
//! [`special_commands`]: crate::commands::special_commands

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use futures::FutureExt;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::commands::history::print_conversations;
use crate::commands::render::format_message;
use crate::commands::special_commands::{parse_special_command, print_help, SpecialCommand};
use crate::commands::{build_controller, stream_turn};
use crate::config::Config;
use crate::error::{NotestreamError, Result};
use crate::realtime::{LocalHub, RoomChannel};
use crate::session::{StreamController, TurnOutcome};

/// Start interactive chat mode
///
/// # Arguments
///
/// * `config` - Global configuration (consumed)
/// * `resume` - Stored conversation to resume (full id or prefix)
///
/// # Examples
///
/// ```
/// use notestream::commands::chat;
/// use notestream::config::Config;
///
/// // In application code:
/// // chat::run_chat(Config::default(), None).await?;
/// ```
pub async fn run_chat(config: Config, resume: Option<String>) -> Result<()> {
    tracing::info!("Starting interactive chat mode");

    let controller = build_controller(&config)?;
    let mut conversation_id = match resume {
        Some(id) => controller.load_conversation(&id).await?,
        None => controller.open_conversation(None).await?,
    };

    let mut room = match join_room(&config).await {
        Ok(room) => Some(room),
        Err(e) => {
            tracing::warn!("Continuing without room {}: {:#}", config.realtime.room, e);
            None
        }
    };
    if let (Some(room), Some(transcript)) = (room.as_mut(), controller.transcript(&conversation_id))
    {
        room.attach_transcript(transcript);
    }

    let mut rl = DefaultEditor::new()?;
    print_welcome_banner(&config);
    print_transcript(&controller, &conversation_id);

    loop {
        if let Some(room) = room.as_mut() {
            pump_room(room)?;
        }

        let prompt = format!("[{}] >> ", short(&conversation_id)).cyan().to_string();
        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if let Err(e) = rl.add_history_entry(trimmed) {
                    tracing::debug!("Failed to record readline history: {}", e);
                }

                let command = match parse_special_command(trimmed) {
                    Ok(command) => command,
                    Err(e) => {
                        eprintln!("{}", e.to_string().red());
                        continue;
                    }
                };

                match command {
                    SpecialCommand::None => {}
                    SpecialCommand::Exit => break,
                    SpecialCommand::Help => {
                        print_help();
                        continue;
                    }
                    SpecialCommand::History => {
                        match controller.store().list_conversations().await {
                            Ok(conversations) => print_conversations(&conversations),
                            Err(e) => eprintln!("{}", format!("Error: {:#}", e).red()),
                        }
                        continue;
                    }
                    SpecialCommand::New(title) => {
                        match controller.open_conversation(title.as_deref()).await {
                            Ok(id) => {
                                conversation_id = id;
                                switch_room_transcript(&controller, room.as_mut(), &conversation_id);
                                print_transcript(&controller, &conversation_id);
                            }
                            Err(e) => eprintln!("{}", format!("Error: {:#}", e).red()),
                        }
                        continue;
                    }
                    SpecialCommand::Switch(id) => {
                        match controller.load_conversation(&id).await {
                            Ok(id) => {
                                conversation_id = id;
                                switch_room_transcript(&controller, room.as_mut(), &conversation_id);
                                print_transcript(&controller, &conversation_id);
                            }
                            Err(e) => eprintln!("{}", format!("Error: {:#}", e).red()),
                        }
                        continue;
                    }
                    SpecialCommand::Who => {
                        match room.as_ref() {
                            Some(room) => print_roster(room),
                            None => println!("{}", "Not connected to a room.".yellow()),
                        }
                        continue;
                    }
                    SpecialCommand::Say(text) => {
                        match room.as_mut() {
                            Some(room) => {
                                if let Err(e) =
                                    room.send_message(&text, &config.backend.identity, None).await
                                {
                                    eprintln!("{}", format!("Error: {:#}", e).red());
                                }
                            }
                            None => println!("{}", "Not connected to a room.".yellow()),
                        }
                        continue;
                    }
                }

                match stream_turn(&controller, &conversation_id, trimmed).await {
                    Ok(TurnOutcome::Completed { title, .. }) => {
                        if let Some(title) = title {
                            println!("{}", format!("Title: {}", title).dimmed());
                        }
                        println!();
                    }
                    Ok(TurnOutcome::Failed { reason }) => {
                        eprintln!("{}\n", reason.dimmed());
                    }
                    Ok(TurnOutcome::Cancelled) => {
                        println!("\n{}\n", "Cancelled.".yellow());
                    }
                    Err(e) if NotestreamError::is_quota_exceeded(&e) => {
                        eprintln!(
                            "{}\n",
                            format!("{:#}. Start a new conversation once your quota resets.", e)
                                .red()
                        );
                    }
                    Err(e) => {
                        eprintln!("Error: {:#}\n", e);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                tracing::error!("Readline error: {:?}", err);
                break;
            }
        }
    }

    if let Some(room) = room {
        if let Err(e) = room.leave().await {
            tracing::warn!("Failed to leave room: {:#}", e);
        }
    }

    println!("Goodbye!");
    Ok(())
}

async fn join_room(config: &Config) -> Result<RoomChannel> {
    let identity = &config.backend.identity;
    let hub = Arc::new(LocalHub::new());
    let mut room = RoomChannel::join(hub, &config.realtime.room, identity).await?;
    room.track(serde_json::json!({ "id": identity, "user_name": identity }))
        .await?;
    room.wait_subscribed(Duration::from_secs(
        config.realtime.subscribe_timeout_seconds,
    ))
    .await?;
    Ok(room)
}

/// Apply every room event that is already waiting, without blocking.
fn pump_room(room: &mut RoomChannel) -> Result<()> {
    while let Some(event) = room.next_event().now_or_never() {
        if event?.is_none() {
            break;
        }
    }
    Ok(())
}

fn switch_room_transcript(
    controller: &StreamController,
    room: Option<&mut RoomChannel>,
    conversation_id: &str,
) {
    if let (Some(room), Some(transcript)) = (room, controller.transcript(conversation_id)) {
        room.attach_transcript(transcript);
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn print_welcome_banner(config: &Config) {
    println!();
    println!("{}", "Notestream interactive chat".bold());
    println!(
        "  {} {}",
        "Backend:".dimmed(),
        config.backend.endpoint.as_str().cyan()
    );
    println!(
        "  {} {} {}",
        "Room:".dimmed(),
        config.realtime.room.as_str().cyan(),
        "(this process only)".dimmed()
    );
    println!("Type '/help' for commands, '/exit' to leave.");
    println!();
}

fn print_transcript(controller: &StreamController, conversation_id: &str) {
    let Some(transcript) = controller.transcript(conversation_id) else {
        return;
    };
    println!("{}", format!("Conversation {}", conversation_id).dimmed());
    for message in transcript.snapshot().messages() {
        println!("{}", format_message(message));
    }
    println!();
}

fn print_roster(room: &RoomChannel) {
    println!("{}", format!("In {}:", room.room()).bold());
    for participant in room.roster().iter() {
        if participant == room.participant() {
            println!("  {} {}", participant.green(), "(you)".dimmed());
        } else {
            println!("  {}", participant);
        }
    }
}
