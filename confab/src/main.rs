mod settings;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

use confab_core::xmpp::stanza::{Presence, Stanza};
use settings::Settings;

type Error = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one chat message and disconnect.
    SendMessage { to: String, body: String },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();
    let settings = Settings::init()?;

    let cli = Cli::parse();
    let session =
        confab_outbound::connect(&settings.user, &settings.host, &settings.password).await?;
    info!(jid = ?session.jid().map(|jid| jid.to_string()), "connected");

    match cli.command {
        Some(Commands::SendMessage { to, body }) => {
            session.send_message("chat", &to, &body).await?;
            session.close().await?;
        }
        None => {
            let (sink, mut inbound) = mpsc::channel(100);
            session.subscribe(sink);
            session.send_presence(Presence::default()).await?;

            loop {
                tokio::select! {
                    stanza = inbound.recv() => {
                        match stanza {
                            Some(stanza) => print_stanza(&stanza),
                            None => break,
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        session.close().await?;
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_stanza(stanza: &Stanza) {
    match stanza {
        Stanza::Message(message) => {
            let from = message.header.from.as_deref().unwrap_or("<unknown>");
            let body = message.body.as_deref().unwrap_or("");
            println!("{from}: {body}");
        }
        Stanza::Presence(presence) => {
            let from = presence.header.from.as_deref().unwrap_or("<unknown>");
            let show = presence
                .header
                .kind
                .as_deref()
                .or(presence.show.as_deref())
                .unwrap_or("available");
            println!("* {from} is {show}");
        }
        other => println!("{other:?}"),
    }
}
