//! sortedchat application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize tracing
//! 3. Wire the session orchestrator over an in-process transport
//! 4. Run a scripted session: send messages, optionally create a project and
//!    poll its embedding job, optionally search

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use sortedchat_core::config::SortedChatConfig;
use sortedchat_core::events::SessionEvent;
use sortedchat_core::types::{DocumentRecord, EmbeddingStatus, Message};
use sortedchat_session::{SessionOrchestrator, StreamOutcome};
use sortedchat_transport::MemoryTransport;

use cli::CliArgs;

/// Transport seeded with a chat to search in.
fn demo_transport() -> MemoryTransport {
    let transport = MemoryTransport::new();
    let chat = transport.add_chat("welcome", "Welcome", None);
    transport.set_history(
        &chat,
        vec![
            Message::user("What can this client do?"),
            Message::assistant("Stream replies, keep chats apart and track document indexing."),
        ],
    );
    transport
}

/// Log every session event until the channel closes.
async fn log_events(mut events: tokio::sync::broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let rendered = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));
                tracing::debug!(event = %rendered, "Session event");
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagging");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn run_project(
    orchestrator: &SessionOrchestrator,
    transport: &MemoryTransport,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let project_id = orchestrator.create_project(name, "").await?;
    let files = ["notes.pdf", "paper.pdf"];
    let snapshot = |status: EmbeddingStatus| -> Vec<DocumentRecord> {
        files
            .iter()
            .enumerate()
            .map(|(i, f)| DocumentRecord::new(i.to_string(), *f, status))
            .collect()
    };
    transport.push_documents(&project_id, snapshot(EmbeddingStatus::Queued));
    transport.push_documents(&project_id, snapshot(EmbeddingStatus::Embedding));
    transport.push_documents(&project_id, snapshot(EmbeddingStatus::Success));

    let receipt = orchestrator.submit_embedding_job(&project_id).await?;
    println!("{}", receipt.message);
    if let Some(poll) = receipt.poll {
        let summary = poll.finished().await?;
        println!(
            "Embedding finished after {} attempt(s): {}",
            summary.attempts,
            if summary.all_succeeded { "all documents indexed" } else { "some documents pending" }
        );
    }
    for doc in orchestrator.view().documents.get() {
        let label = doc.embedding_status.label();
        println!("  {} {}", doc.file_name, if label.is_empty() { "ready" } else { label });
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config = if config_file.exists() {
        SortedChatConfig::load(&config_file)?
    } else {
        SortedChatConfig::default()
    };

    // Tracing.
    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    tracing::info!("Starting sortedchat v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), exists = config_file.exists(), "Configuration resolved");

    // Orchestrator.
    let transport = Arc::new(demo_transport());
    let orchestrator = SessionOrchestrator::new(&config, transport.clone());
    let logger = tokio::spawn(log_events(orchestrator.subscribe()));

    if let Some(ref model) = args.model {
        orchestrator.select_model(model);
    }
    orchestrator.refresh_models().await?;
    orchestrator.refresh_chat_list(None).await?;

    // Chat.
    orchestrator.create_chat(None).await?;
    for text in args.messages() {
        println!("> {}", text);
        match orchestrator.send_message(&text).await?.outcome().await? {
            StreamOutcome::Committed {
                assistant_text,
                chat_name,
                ..
            } => {
                println!("{}", assistant_text);
                if let Some(name) = chat_name {
                    println!("(chat named \"{}\")", name);
                }
            }
            StreamOutcome::Failed { reason, .. } => {
                tracing::error!(reason = %reason, "Reply failed");
            }
        }
    }

    // Project and embedding job.
    if let Some(ref name) = args.project {
        run_project(&orchestrator, &transport, name).await?;
    }

    // Search.
    if let Some(ref query) = args.search {
        orchestrator.open_search();
        orchestrator.search(query);
        tokio::time::sleep(config.search.debounce() + Duration::from_millis(200)).await;
        let results = orchestrator.view().search_results.get();
        println!("{} result(s) for \"{}\"", results.len(), query);
        for result in results {
            println!("  [{}] {}", result.chat_name, result.matched_text);
        }
        orchestrator.close_search();
    }

    orchestrator.shutdown();
    logger.abort();
    tracing::info!("sortedchat finished");
    Ok(())
}
