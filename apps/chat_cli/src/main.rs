use anyhow::{anyhow, Result};
use chat_core::{ChatClient, ChatEvent, OutgoingMessage};
use clap::Parser;
use shared::domain::{ConversationId, Participant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

mod config;

use config::{load_settings, parse_participant_kind};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
    /// client, employee, or admin
    #[arg(long)]
    user_type: Option<String>,
    #[arg(long)]
    display_name: Option<String>,
    /// Conversation to open on startup; defaults to the most recently active.
    #[arg(long)]
    conversation: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();
    let settings = load_settings();

    let server_url = args.server_url.unwrap_or(settings.server_url);
    let user_id = args.user_id.unwrap_or(settings.user_id);
    if user_id.is_empty() {
        return Err(anyhow!("no user id; pass --user-id or set CHAT_USER_ID"));
    }
    let kind = parse_participant_kind(&args.user_type.unwrap_or(settings.user_type))?;
    let mut display_name = args.display_name.unwrap_or(settings.display_name);
    if display_name.is_empty() {
        display_name = user_id.clone();
    }

    let participant = Participant::new(user_id, kind, display_name);
    let client = ChatClient::new(&server_url, participant)?;
    client.start().await?;
    info!(%server_url, "chat client started");

    let conversations = client.conversations().await;
    for conversation in &conversations {
        println!(
            "{} [{:?}] last activity: {}",
            conversation.conversation_id,
            conversation.status,
            conversation
                .last_message_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "never".to_string()),
        );
    }

    let selected: ConversationId = match args
        .conversation
        .map(ConversationId)
        .or_else(|| conversations.first().map(|c| c.conversation_id.clone()))
    {
        Some(id) => id,
        None => {
            println!("no conversations yet; nothing to open");
            client.shutdown().await;
            return Ok(());
        }
    };
    client.select_conversation(selected.clone()).await?;
    println!("opened {selected}; type a message and press enter (ctrl-d to quit)");

    let mut events = client.subscribe_events();
    let printer_conversation = selected.clone();
    let printer = tokio::spawn(async move {
        let mut printed = 0usize;
        while let Ok(event) = events.recv().await {
            if let ChatEvent::MessagesUpdated {
                conversation_id,
                messages,
            } = event
            {
                if conversation_id != printer_conversation {
                    continue;
                }
                for message in messages.iter().skip(printed) {
                    println!("[{}] {}: {}", message.created_at.to_rfc3339(), message.sender_name, message.content);
                }
                printed = printed.max(messages.len());
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(err) = client
            .send_message(selected.clone(), OutgoingMessage::text(line))
            .await
        {
            eprintln!("send failed: {err}");
        }
    }

    printer.abort();
    client.shutdown().await;
    Ok(())
}
