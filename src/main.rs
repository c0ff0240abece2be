use std::error::Error;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use daemon_chat::config::EnvConfig;
use daemon_chat::logging;
use daemon_chat::{
    ConversationView, DaemonApiClient, DisplayMessage, Phase, Reconciler, Role,
};

const USAGE: &str = "usage: daemon-chat <conversation-id> <message...>\n       daemon-chat list";

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("daemon-chat: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Vec<String>) -> Result<(), Box<dyn Error>> {
    let config = EnvConfig::from_env()?;
    logging::init(config.log_filter.as_deref());

    let client = Arc::new(DaemonApiClient::new(config.api_config())?);

    match args.as_slice() {
        [command] if command == "list" => list_conversations(&client, &config.participant).await,
        [conversation_id, message @ ..] if !message.is_empty() => {
            let reconciler = Reconciler::new(client.clone(), client, config.policy);
            let result = send_and_wait(&reconciler, conversation_id, &message.join(" ")).await;
            reconciler.shutdown();
            result
        }
        _ => Err(USAGE.into()),
    }
}

async fn list_conversations(
    client: &DaemonApiClient,
    participant: &str,
) -> Result<(), Box<dyn Error>> {
    let conversations = client.fetch_conversations(Some(participant)).await?;
    let mut stdout = io::stdout().lock();
    for conversation in conversations {
        writeln!(
            stdout,
            "{}\t{}\t{} messages",
            conversation.id,
            conversation.name,
            conversation.messages.len()
        )?;
    }
    Ok(())
}

async fn send_and_wait(
    reconciler: &Arc<Reconciler>,
    conversation_id: &str,
    message: &str,
) -> Result<(), Box<dyn Error>> {
    let mut views = reconciler.subscribe(conversation_id);
    reconciler.load(conversation_id).await?;
    reconciler.send(conversation_id, message)?;

    let mut printed = String::new();
    loop {
        let view = Arc::clone(&*views.borrow_and_update());
        if view.phase == Phase::Streaming {
            print_live_delta(&view, &mut printed)?;
        }
        if view.phase == Phase::Idle {
            break;
        }
        if views.changed().await.is_err() {
            break;
        }
    }
    if !printed.is_empty() {
        println!();
    }

    for message in reconciler.view(conversation_id).trailing_reply() {
        print_message(message)?;
    }
    Ok(())
}

/// Prints whatever the live answer gained since the last call. A live text
/// that no longer extends what was printed starts a fresh line.
fn print_live_delta(view: &ConversationView, printed: &mut String) -> io::Result<()> {
    let Some(reply) = view
        .trailing_reply()
        .last()
        .filter(|message| message.role == Role::Assistant)
    else {
        return Ok(());
    };

    let text = reply.body.to_plain_text();
    let mut stdout = io::stdout().lock();
    match text.strip_prefix(printed.as_str()) {
        Some(delta) => write!(stdout, "{delta}")?,
        None => write!(stdout, "\n{text}")?,
    }
    stdout.flush()?;
    *printed = text;
    Ok(())
}

fn print_message(message: &DisplayMessage) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    writeln!(
        stdout,
        "[{}] {}",
        message.role.as_str(),
        message.body.to_plain_text()
    )
}
