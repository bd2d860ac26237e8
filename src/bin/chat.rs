//! Interactive terminal client for the TruthLens assistant.
//! Run with: cargo run --bin truthlens

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use truthlens_agent::chat::{ChatConfig, ChatEngine, Conversation, RejectReason, SendOutcome};
use truthlens_agent::start_truthlens_agent;

const HELP: &str = "\
Type a claim to verify it. Commands:
  /new          start a new conversation
  /list         list conversations
  /open <n>     open conversation number n from /list
  /delete <n>   delete conversation number n from /list
  /clear        leave the current conversation
  /quit         exit";

fn pick(conversations: &[Conversation], arg: Option<&str>) -> Option<Conversation> {
    let index: usize = arg?.trim().parse().ok()?;
    conversations.get(index.checked_sub(1)?).cloned()
}

async fn handle_command(engine: &ChatEngine, line: &str) -> anyhow::Result<bool> {
    let mut parts = line.splitn(2, ' ');
    let command = parts.next().unwrap_or_default();
    let arg = parts.next();

    match command {
        "/quit" | "/exit" => return Ok(false),
        "/help" => println!("{HELP}"),
        "/new" => match engine.start_new_conversation().await? {
            Some(conversation) => println!("Started conversation {}", conversation.id),
            None => println!("A message is still being sent."),
        },
        "/list" => {
            let conversations = engine.conversations();
            if conversations.is_empty() {
                println!("No conversations yet.");
            }
            let selected = engine.selected();
            for (index, conversation) in conversations.iter().enumerate() {
                let marker = if Some(conversation.id) == selected { '*' } else { ' ' };
                println!(
                    "{marker} {:>3}. {} ({})",
                    index + 1,
                    conversation.title,
                    conversation.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        "/open" => match pick(&engine.conversations(), arg) {
            Some(conversation) => {
                engine.select_conversation(Some(conversation.id)).await?;
                for message in engine.messages() {
                    println!("[{}] {}", message.role, message.content);
                }
            }
            None => println!("Unknown conversation; see /list."),
        },
        "/delete" => match pick(&engine.conversations(), arg) {
            Some(conversation) => {
                engine.delete_conversation(conversation.id).await?;
                println!("Deleted {}", conversation.title);
            }
            None => println!("Unknown conversation; see /list."),
        },
        "/clear" => {
            engine.clear_selection();
            println!("Next message starts a new conversation.");
        }
        _ => println!("Unknown command; try /help."),
    }
    Ok(true)
}

async fn send(engine: &ChatEngine, line: &str) -> anyhow::Result<()> {
    let stored = engine.input().set(line);
    if stored < line.chars().count() {
        println!(
            "(message truncated to {} characters)",
            engine.input().max_chars()
        );
    }
    match engine.submit().await? {
        SendOutcome::Completed(exchange) => {
            if exchange.created_conversation {
                println!("(new conversation {})", exchange.conversation_id);
            }
            println!("\n{}\n", exchange.reply.content);
        }
        SendOutcome::Rejected(RejectReason::EmptyInput) => {}
        SendOutcome::Rejected(RejectReason::Busy) => {
            println!("A message is still being sent.");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(start_truthlens_agent::env_filter_or("warn"))
        .with_writer(std::io::stderr)
        .init();

    let config = ChatConfig::from_env().context("invalid configuration")?;
    let engine = start_truthlens_agent::start_engine(config).await?;
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('/') {
            if !handle_command(&engine, line).await? {
                break;
            }
        } else {
            send(&engine, line).await?;
        }
    }

    engine.shutdown();
    Ok(())
}
