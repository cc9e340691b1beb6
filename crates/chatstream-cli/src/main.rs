//! chatstream CLI - ask questions and stream answers in the terminal.
//!
//! This is the entry point for the `chatstream` binary.

mod render;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use chatstream_auth::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
use chatstream_client::{ChannelHandler, ChatClient, ClientConfig};
use chatstream_core::{ChatRequest, SessionId, UserId};

use render::{render, Target};

/// chatstream CLI - ask questions and stream answers in the terminal.
#[derive(Parser, Debug)]
#[command(name = "chatstream")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend base URL.
    #[arg(
        long,
        env = "CHATSTREAM_BACKEND_URL",
        default_value = "http://localhost:8000"
    )]
    backend: String,

    /// User to act as. Defaults to the user stored with the credentials.
    #[arg(long, env = "CHATSTREAM_USER_ID")]
    user_id: Option<String>,

    /// File to persist the API key in. Keys are kept in memory when unset.
    #[arg(long, env = "CHATSTREAM_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask a question and stream the answer.
    Ask {
        /// The question.
        message: String,

        /// Continue an existing session.
        #[arg(long)]
        session: Option<String>,

        /// Do not store this exchange in the session history.
        #[arg(long)]
        no_save: bool,
    },
    /// List stored sessions.
    Sessions,
    /// Show the messages of one session.
    History {
        /// Session ID.
        session_id: String,
    },
    /// Delete everything stored for the user.
    Forget,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt()
            .with_env_filter("chatstream=debug,chatstream_client=debug,chatstream_auth=debug,warn")
            .with_writer(std::io::stderr)
            .init();
    }

    let backend = args.backend.clone();
    let config = ClientConfig::from_lookup(|name| {
        if name == "CHATSTREAM_BACKEND_URL" {
            Some(backend.clone())
        } else {
            std::env::var(name).ok()
        }
    })?;

    let store: Arc<dyn CredentialStore> = match &args.credentials {
        Some(path) => Arc::new(FileCredentialStore::open(path)),
        None => Arc::new(MemoryCredentialStore::new()),
    };

    let user_id = match args.user_id.as_deref() {
        Some(id) => UserId::new(id).context("invalid user ID")?,
        None => store
            .user_id()
            .context("no user ID: pass --user-id or set CHATSTREAM_USER_ID")?,
    };

    let client = Arc::new(ChatClient::new(config, store)?);
    let cancel = CancellationToken::new();
    client.enroll(&user_id, &cancel).await;

    match args.command {
        Command::Ask {
            message,
            session,
            no_save,
        } => {
            let mut request = ChatRequest::new(user_id, message).save_history(!no_save);
            if let Some(session) = session {
                request = request.with_session(SessionId::new(session).context("invalid session ID")?);
            }
            ask(client, request).await
        }
        Command::Sessions => {
            let sessions = client.sessions().list_sessions(&user_id, &cancel).await?;
            if sessions.is_empty() {
                println!("No sessions.");
            }
            for session in sessions {
                println!(
                    "{}  {}",
                    session.session_id,
                    session.title.as_deref().unwrap_or("(untitled)")
                );
            }
            Ok(())
        }
        Command::History { session_id } => {
            let session_id = SessionId::new(session_id).context("invalid session ID")?;
            for message in client.sessions().history(&session_id, &cancel).await? {
                println!("{}: {}\n", message.role, message.content);
            }
            Ok(())
        }
        Command::Forget => {
            client.sessions().delete_user_data(&user_id, &cancel).await?;
            println!("Deleted stored data for {user_id}.");
            Ok(())
        }
    }
}

/// Stream one answer to the terminal. Ctrl-C aborts the stream.
async fn ask(client: Arc<ChatClient>, request: ChatRequest) -> anyhow::Result<()> {
    let (mut handler, mut events) = ChannelHandler::new();

    let stream = tokio::spawn({
        let client = client.clone();
        async move { client.ask(&request, &mut handler).await }
    });

    let mut stdout = io::stdout();
    let mut stderr = io::stderr();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if let Some((target, text)) = render(&event) {
                    match target {
                        Target::Stdout => {
                            write!(stdout, "{text}")?;
                            stdout.flush()?;
                        }
                        Target::Stderr => write!(stderr, "{text}")?,
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::debug!("Interrupted, aborting stream");
                client.abort();
                writeln!(stderr, "\n[aborted]")?;
            }
        }
    }

    stream.await.context("stream task panicked")??;
    Ok(())
}
