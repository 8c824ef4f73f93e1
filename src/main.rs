use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use pchat_lib::call_engine::{CallEvent, CallState};
use pchat_lib::config::AppConfig;
use pchat_lib::PchatApp;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pchat")]
#[command(about = "pchat: messaging with realtime AI voice calls", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in (mock); without email or phone a TikTok login is used
    Login {
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value = "")]
        password: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(short, long, default_value = "")]
        username: String,
    },
    Logout,
    /// List contacts, optionally filtered by name or username
    Contacts { search: Option<String> },
    /// Send a message and print the conversation
    Send {
        contact: String,
        text: String,
        #[arg(long)]
        image: Option<String>,
    },
    /// Call a contact until Ctrl+C (or for a fixed number of seconds)
    Call {
        contact: String,
        #[arg(short, long)]
        seconds: Option<u64>,
    },
    /// Show or clear the call history
    History {
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app = PchatApp::init(AppConfig::from_env())?;

    match cli.command {
        Commands::Login {
            email,
            password,
            phone,
            username,
        } => {
            let user = match (email, phone) {
                (Some(email), _) => app.login_with_email(&email, &password, &username).await?,
                (None, Some(phone)) => app.login_with_phone(&phone, &username).await?,
                (None, None) => app.login_with_tiktok(&username).await?,
            };
            println!("Signed in as {} (@{})", user.name, user.username);
        }

        Commands::Logout => {
            app.chat().logout()?;
            println!("Signed out.");
        }

        Commands::Contacts { search } => {
            let chat = app.chat();
            for user in chat.filtered_contacts(search.as_deref().unwrap_or("")) {
                let last = chat
                    .last_message_with(&user.id)
                    .map(|m| m.text.clone())
                    .unwrap_or_default();
                let muted = if chat.is_muted(&user.id) { " [muted]" } else { "" };
                println!(
                    "  {:<14} @{:<12} {:?}{}  {}",
                    user.name, user.username, user.status, muted, last
                );
            }
        }

        Commands::Send {
            contact,
            text,
            image,
        } => {
            let contact_id = resolve_contact(&app, &contact)?;
            let sent = app.send_message(&contact_id, &text, image).await?;
            println!("you: {}", sent.message.text);
            if let Some(reply) = sent.reply {
                println!("{}: {}", contact, reply.text);
            }
        }

        Commands::Call { contact, seconds } => {
            let contact_id = resolve_contact(&app, &contact)?;
            run_call(&app, &contact_id, seconds).await?;
        }

        Commands::History { clear } => {
            let mut chat = app.chat();
            if clear {
                chat.clear_call_history()?;
                println!("Call history cleared.");
            } else {
                for record in chat.call_history().iter().rev() {
                    let name = chat
                        .user(&record.user_id)
                        .map(|u| u.name.clone())
                        .unwrap_or_else(|| record.user_id.clone());
                    println!(
                        "  {:<14} {:?}  {}",
                        name,
                        record.kind,
                        record.format_duration()
                    );
                }
            }
        }
    }

    Ok(())
}

/// Kontakt per ID oder Username
fn resolve_contact(app: &PchatApp, contact: &str) -> Result<String> {
    let chat = app.chat();
    if let Some(user) = chat.user(contact) {
        return Ok(user.id.clone());
    }
    Ok(chat.find_contact(contact)?.id.clone())
}

async fn run_call(app: &PchatApp, contact_id: &str, seconds: Option<u64>) -> Result<()> {
    let mut events = app.call_engine().subscribe();
    app.start_call(contact_id)?;
    println!("Calling {}... Press Ctrl+C to hang up.", contact_id);

    let limit = async {
        match seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(limit);

    let mut hung_up = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(CallEvent::StateChanged(CallState::Connected { .. })) => println!("Connected."),
                Ok(CallEvent::Error(e)) => eprintln!("Call error: {}", e),
                Ok(CallEvent::Ended(record)) => {
                    println!("Call ended ({}).", record.format_duration());
                    break;
                }
                Ok(_) => {}
                Err(e) => return Err(anyhow!("Call event stream failed: {}", e)),
            },
            _ = tokio::signal::ctrl_c(), if !hung_up => {
                hung_up = true;
                let _ = app.hang_up();
            }
            _ = &mut limit, if !hung_up => {
                hung_up = true;
                let _ = app.hang_up();
            }
        }
    }

    // Record-Writer läuft im Hintergrund
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}
