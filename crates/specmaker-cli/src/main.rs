// SpecMaker CLI
// Drives conversations against a local Ollama server from the terminal
//
// Run with: cargo run --bin specmaker -- send <conversation-id> "message"

use std::io::{self, Write};

use clap::{Parser, Subcommand};

use specmaker_lib::repositories::SettingsRepository;
use specmaker_lib::utils::database::open_default_database;
use specmaker_lib::{ConversationPhase, GenerationConfig, GenerationEvent, GenerationOrchestrator};

#[derive(Parser)]
#[command(name = "specmaker")]
#[command(about = "Turn a product idea into specifications through a guided conversation")]
#[command(version)]
struct Cli {
    /// Model to use instead of the configured one
    #[arg(long)]
    model: Option<String>,

    /// Ollama endpoint to use instead of the configured one
    #[arg(long)]
    endpoint: Option<String>,

    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a conversation for a project
    New {
        project_id: String,
    },
    /// Send a message and stream the reply (Ctrl-C cancels)
    Send {
        conversation_id: String,
        /// Message content
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
    /// Show the context the next request would carry
    Preview {
        conversation_id: String,
    },
    /// Show messages and summaries of a conversation
    History {
        conversation_id: String,
    },
    /// Move a conversation to another phase
    Phase {
        conversation_id: String,
        /// initial_analysis, consultation, context_building, generation or refinement
        phase: String,
    },
    /// Check that the model server is reachable
    Check,
    /// Print the effective generation settings
    Config,
}

/// Log filter used when `RUST_LOG` is unset
fn default_log_filter(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

fn load_config(cli: &Cli, settings: &SettingsRepository) -> Result<GenerationConfig, String> {
    let mut config = settings.get_generation_config()?;
    config.apply_env_overrides();

    if let Some(ref model) = cli.model {
        config.model = model.clone();
    }
    if let Some(ref endpoint) = cli.endpoint {
        config.endpoint = endpoint.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn send(
    orchestrator: &GenerationOrchestrator,
    conversation_id: &str,
    message: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut handle = orchestrator.submit_user_turn(conversation_id, message).await?;

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            cancel.cancel();
        }
    });

    let mut stdout = io::stdout();
    while let Some(event) = handle.next_event().await {
        match event {
            GenerationEvent::Chunk { text } => {
                print!("{}", text);
                stdout.flush()?;
            }
            GenerationEvent::Completed { .. } => {
                println!();
                break;
            }
            GenerationEvent::Cancelled => {
                println!();
                eprintln!("Generation cancelled; nothing was saved for this reply");
                break;
            }
            GenerationEvent::Failed {
                kind,
                message,
                retryable,
            } => {
                println!();
                let hint = if retryable { " (you can resend the message)" } else { "" };
                return Err(format!("Generation failed [{}]: {}{}", kind, message, hint).into());
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_log_filter(cli.debug)),
    )
    .init();

    let db = open_default_database()?;
    let settings = SettingsRepository::new(db.clone());
    let config = load_config(&cli, &settings)?;
    log::debug!("Using model {} at {}", config.model, config.endpoint);

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let orchestrator = GenerationOrchestrator::from_database(db, config)?;

    match cli.command {
        Commands::New { project_id } => {
            let conversation = orchestrator.create_conversation(&project_id).await?;
            println!("{}", conversation.id);
        }
        Commands::Send {
            conversation_id,
            message,
        } => {
            send(&orchestrator, &conversation_id, &message.join(" ")).await?;
        }
        Commands::Preview { conversation_id } => {
            let context = orchestrator.assembled_context_preview(&conversation_id).await?;
            println!("{}", serde_json::to_string_pretty(&context)?);
        }
        Commands::History { conversation_id } => {
            let conversation = orchestrator.get_conversation(&conversation_id).await?;
            println!(
                "Conversation {} (project {}, phase {})",
                conversation.id, conversation.project_id, conversation.phase
            );

            for message in orchestrator.conversation_messages(&conversation_id).await? {
                println!("\n#{} [{}]\n{}", message.sequence, message.role, message.content);
            }

            let summaries = orchestrator.summary_history(&conversation_id).await?;
            if !summaries.is_empty() {
                println!("\n--- Summaries ---");
                for summary in summaries {
                    println!(
                        "messages {}-{} ({} tokens, {})",
                        summary.range_start,
                        summary.range_end,
                        summary.token_count,
                        summary.created_at.to_rfc3339()
                    );
                }
            }
        }
        Commands::Phase {
            conversation_id,
            phase,
        } => {
            let phase: ConversationPhase = phase.parse()?;
            let conversation = orchestrator.advance_phase(&conversation_id, phase).await?;
            println!("Conversation {} is now in phase {}", conversation.id, conversation.phase);
        }
        Commands::Check => {
            let config = orchestrator.config();
            if !orchestrator.check_model_connection().await? {
                return Err(format!("Model server at {} answered with an error", config.endpoint).into());
            }
            println!(
                "Model server at {} is reachable (model {})",
                config.endpoint, config.model
            );
        }
        Commands::Config => {}
    }

    Ok(())
}
