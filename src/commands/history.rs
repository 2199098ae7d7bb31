use crate::cli::HistoryCommand;
use crate::engine::ConversationEngine;
use crate::error::{ParleyError, Result};
use crate::storage::{DisplayMessage, Session, SqliteStorage};
use colored::Colorize;
use prettytable::{format, Table};

/// Handle history commands
pub async fn handle_history(
    engine: &ConversationEngine,
    storage: &SqliteStorage,
    command: HistoryCommand,
) -> Result<()> {
    match command {
        HistoryCommand::List => {
            print_sessions(&engine.list_sessions()?);
            println!(
                "Use {} to resume a session.",
                "parley chat --resume <ID>".cyan()
            );
            println!();
        }
        HistoryCommand::Show { id } => {
            let id = resolve_id(storage, &id)?;
            let session = engine.get_session(&id)?;
            println!(
                "\n{} {}\n",
                session.title.bold(),
                format!("({} / {})", session.provider, session.model).dimmed()
            );
            print_transcript(&engine.load_thread_for_display(&id)?);
        }
        HistoryCommand::Delete { id } => {
            let id = resolve_id(storage, &id)?;
            engine.delete_session(&id).await?;
            println!("{}", format!("Deleted conversation {}", short_id(&id)).green());
        }
    }

    Ok(())
}

/// Expand an id prefix to a full session id
///
/// # Errors
///
/// Returns `NotFound` when nothing matches
pub fn resolve_id(storage: &SqliteStorage, id_or_prefix: &str) -> Result<String> {
    storage
        .resolve_session_id(id_or_prefix)?
        .ok_or_else(|| ParleyError::NotFound(id_or_prefix.to_string()).into())
}

/// Print the session table
pub fn print_sessions(sessions: &[Session]) {
    if sessions.is_empty() {
        println!("{}", "No conversation history found.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Provider".bold(),
        "Model".bold(),
        "Messages".bold(),
        "Last Updated".bold()
    ]);

    for session in sessions {
        let updated = session
            .updated_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M")
            .to_string();

        table.add_row(prettytable::row![
            short_id(&session.id).cyan(),
            display_title(&session.title),
            session.provider,
            session.model,
            session.message_count,
            updated
        ]);
    }

    println!("\nConversation History:");
    table.printstd();
    println!();
}

/// Print a transcript, one block per message
pub fn print_transcript(messages: &[DisplayMessage]) {
    if messages.is_empty() {
        println!("{}", "No messages yet.".yellow());
        return;
    }
    for message in messages {
        let label = match message.role.as_str() {
            "user" => "You".blue().bold(),
            _ => "Assistant".green().bold(),
        };
        println!("{}: {}\n", label, message.content);
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Title clipped for the table column
fn display_title(title: &str) -> String {
    if title.chars().count() > 40 {
        format!("{}...", title.chars().take(37).collect::<String>())
    } else {
        title.to_string()
    }
}
