/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint:

- `chat`      — Interactive chat mode
- `send`      — One turn from the command line
- `history`   — List, show and delete stored conversations
- `providers` — Provider catalog

The handlers are thin: they turn configuration and flags into an
`InvocationConfig`, hand turns to the `ConversationEngine` and render what
comes back.
*/

use crate::cli::ProviderArgs;
use crate::config::Config;
use crate::engine::{ConversationEngine, InvocationConfig, TurnRequest, TurnStream};
use crate::error::{kind, ParleyError, Result};
use crate::providers::{ModelGateway, ProviderKind};
use crate::storage::SqliteStorage;
use colored::Colorize;
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;

pub mod history;
pub mod providers;
pub mod special_commands;

/// Storage and engine built from configuration
pub struct AppContext {
    /// Loaded configuration
    pub config: Config,
    /// History database shared by both stores
    pub storage: Arc<SqliteStorage>,
    /// Conversation engine over `storage`
    pub engine: ConversationEngine,
}

impl AppContext {
    /// Open the history database and build the gateway
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or the provider
    /// configuration is invalid
    pub fn new(config: Config) -> Result<Self> {
        let storage = Arc::new(SqliteStorage::open(config.storage.path.as_deref())?);
        let gateway = Arc::new(ModelGateway::from_config(&config.provider)?);
        let engine = ConversationEngine::with_storage(Arc::clone(&storage), gateway);
        Ok(Self {
            config,
            storage,
            engine,
        })
    }
}

/// Build the invocation parameters for a turn
///
/// Flags win over configuration. The API key comes from `--api-key` or the
/// provider's environment variable; a missing key is left empty so the
/// engine reports it.
///
/// # Errors
///
/// Returns `UnsupportedProvider` for an unknown provider tag
pub fn resolve_invocation(config: &Config, args: &ProviderArgs) -> Result<InvocationConfig> {
    let kind: ProviderKind = match &args.provider {
        Some(tag) => tag.parse()?,
        None => config.provider.default_kind()?,
    };
    let model = args
        .model
        .clone()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| config.provider.model_for(kind));
    let api_key = args
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| kind.api_key_from_env())
        .unwrap_or_default();
    let system_prompt = args
        .system_prompt
        .clone()
        .unwrap_or_else(|| config.chat.system_prompt.clone());

    Ok(InvocationConfig::new(
        kind.display_name(),
        model,
        api_key,
        system_prompt,
    ))
}

/// Render an error for the terminal
///
/// A reply that could not be saved is shown as a warning, since the text
/// was already displayed.
pub fn describe_error(err: &anyhow::Error) -> String {
    match kind(err) {
        Some(ParleyError::UnpersistedReply { .. }) => {
            format!("Warning: {}", err).yellow().to_string()
        }
        _ => format!("Error: {}", err).red().to_string(),
    }
}

/// Print a streamed reply as it arrives and return the full text
async fn print_stream(mut stream: TurnStream) -> Result<String> {
    let mut text = String::new();
    let mut stdout = std::io::stdout();
    while let Some(fragment) = stream.next().await {
        match fragment {
            Ok(fragment) => {
                print!("{}", fragment);
                stdout.flush()?;
                text.push_str(&fragment);
            }
            Err(e) => {
                if !text.is_empty() {
                    println!();
                }
                return Err(e);
            }
        }
    }
    println!();
    Ok(text)
}

// Send command handler
pub mod send {
    //! One-shot turn from the command line.

    use super::*;

    /// Send one message and print the reply
    ///
    /// The thread id is printed to stderr so it can be passed to `--thread`
    /// on the next call.
    pub async fn run_send(
        ctx: &AppContext,
        args: &ProviderArgs,
        thread: Option<String>,
        streaming: bool,
        message: String,
    ) -> Result<()> {
        let thread_id = match thread {
            Some(id) => Some(history::resolve_id(&ctx.storage, &id)?),
            None => None,
        };
        let invocation = resolve_invocation(&ctx.config, args)?;
        let request = TurnRequest::new(thread_id, invocation, message);

        let thread_id = if streaming {
            let stream = ctx.engine.send_turn_streaming(request).await?;
            let thread_id = stream.thread_id().to_string();
            print_stream(stream).await?;
            thread_id
        } else {
            let reply = ctx.engine.send_turn(request).await?;
            println!("{}", reply.message.content);
            reply.thread_id
        };

        eprintln!("{}", format!("thread: {}", thread_id).dimmed());
        Ok(())
    }
}

// Chat command handler
pub mod chat {
    //! Interactive chat mode handler.
    //!
    //! Runs a readline loop that sends each line as a turn on the current
    //! thread. Slash commands manage sessions and provider selection.

    use super::special_commands::{parse_special_command, print_help, SpecialCommand};
    use super::*;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;

    /// Mutable state of one chat session
    #[derive(Debug)]
    pub struct ChatState {
        /// Thread receiving turns; `None` until the first turn of a new chat
        pub thread_id: Option<String>,
        /// Parameters for the next turn
        pub invocation: InvocationConfig,
        /// Stream replies
        pub streaming: bool,
    }

    impl ChatState {
        /// Switch provider, resetting the model and key to that provider's defaults
        ///
        /// # Errors
        ///
        /// Returns `UnsupportedProvider` for an unknown tag
        pub fn switch_provider(&mut self, config: &Config, tag: &str) -> Result<ProviderKind> {
            let kind: ProviderKind = tag.parse()?;
            let args = ProviderArgs {
                provider: Some(kind.display_name().to_string()),
                system_prompt: Some(self.invocation.system_prompt.clone()),
                ..Default::default()
            };
            self.invocation = resolve_invocation(config, &args)?;
            Ok(kind)
        }

        fn prompt(&self) -> String {
            format!(
                "[{}/{}] >> ",
                self.invocation.provider, self.invocation.model
            )
            .cyan()
            .to_string()
        }
    }

    /// Start interactive chat mode
    pub async fn run_chat(
        ctx: &AppContext,
        args: &ProviderArgs,
        resume: Option<String>,
        streaming: bool,
    ) -> Result<()> {
        let thread_id = match resume {
            Some(id) => {
                let id = history::resolve_id(&ctx.storage, &id)?;
                let session = ctx.engine.get_session(&id)?;
                println!("{} {}", "Resuming:".green(), session.title);
                history::print_transcript(&ctx.engine.load_thread_for_display(&id)?);
                Some(id)
            }
            None => None,
        };

        let mut state = ChatState {
            thread_id,
            invocation: resolve_invocation(&ctx.config, args)?,
            streaming,
        };

        let mut rl = DefaultEditor::new()?;
        print_welcome_banner(&state);

        loop {
            match rl.readline(&state.prompt()) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(trimmed)?;

                    let command = match parse_special_command(trimmed) {
                        Ok(command) => command,
                        Err(e) => {
                            eprintln!("{}", e.to_string().red());
                            continue;
                        }
                    };

                    match command {
                        SpecialCommand::New => {
                            state.thread_id = None;
                            println!("{}", "Started a new conversation.".green());
                        }
                        SpecialCommand::Sessions => {
                            history::print_sessions(&ctx.engine.list_sessions()?);
                        }
                        SpecialCommand::History => match &state.thread_id {
                            Some(id) => {
                                history::print_transcript(&ctx.engine.load_thread_for_display(id)?)
                            }
                            None => println!("{}", "No messages yet.".yellow()),
                        },
                        SpecialCommand::Delete => match state.thread_id.take() {
                            Some(id) => {
                                ctx.engine.delete_session(&id).await?;
                                println!("{}", "Conversation deleted.".green());
                            }
                            None => println!("{}", "Nothing to delete.".yellow()),
                        },
                        SpecialCommand::SwitchProvider(tag) => {
                            match state.switch_provider(&ctx.config, &tag) {
                                Ok(kind) => println!(
                                    "Switched to {} ({})",
                                    kind.display_name().green(),
                                    state.invocation.model
                                ),
                                Err(e) => eprintln!("{}", describe_error(&e)),
                            }
                        }
                        SpecialCommand::SwitchModel(model) => {
                            state.invocation.model = model;
                            println!("Model set to {}", state.invocation.model.green());
                        }
                        SpecialCommand::Help => print_help(),
                        SpecialCommand::Exit => break,
                        SpecialCommand::None => send_line(ctx, &mut state, trimmed).await,
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => {
                    eprintln!("Error: {:?}", e);
                    break;
                }
            }
        }

        println!("Goodbye!");
        Ok(())
    }

    /// Send one line as a turn and render the outcome
    async fn send_line(ctx: &AppContext, state: &mut ChatState, line: &str) {
        // A rejected first turn is retried on the same session
        if state.thread_id.is_none() {
            match ctx
                .engine
                .create_session(&state.invocation.provider, &state.invocation.model)
            {
                Ok(session) => state.thread_id = Some(session.id),
                Err(e) => {
                    eprintln!("{}", describe_error(&e));
                    return;
                }
            }
        }
        let request = TurnRequest::new(state.thread_id.clone(), state.invocation.clone(), line);

        let outcome = if state.streaming {
            match ctx.engine.send_turn_streaming(request).await {
                Ok(stream) => {
                    state.thread_id = Some(stream.thread_id().to_string());
                    print_stream(stream).await.map(|_| ())
                }
                Err(e) => Err(e),
            }
        } else {
            match ctx.engine.send_turn(request).await {
                Ok(reply) => {
                    state.thread_id = Some(reply.thread_id);
                    println!("{}", reply.message.content);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };

        if let Err(e) = outcome {
            tracing::debug!("Turn error: {:#}", e);
            eprintln!("{}", describe_error(&e));
        }
        println!();
    }

    fn print_welcome_banner(state: &ChatState) {
        println!();
        println!("{}", "Parley".bold());
        println!(
            "Provider: {}  Model: {}  Streaming: {}",
            state.invocation.provider.green(),
            state.invocation.model.green(),
            if state.streaming { "on" } else { "off" }
        );
        if state.invocation.api_key.is_empty() {
            println!(
                "{}",
                format!(
                    "No API key found for {}; set it in the environment or pass --api-key.",
                    state.invocation.provider
                )
                .yellow()
            );
        }
        println!("Type /help for commands, exit to quit.\n");
    }

}
