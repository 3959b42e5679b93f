use agentchat::api::FallbackClient;
use agentchat::chat::{ChatHandle, ChatOptions, ChatSession, ChatView};
use agentchat::cli::Args;
use agentchat::config::Config;
use agentchat::engine::Watchdog;
use agentchat::models::Role;
use agentchat::session::{open_session, FilesystemIdentityStore, IdentityStore};
use agentchat::transport::{ChannelConfig, ChannelManager};
use agentchat::ui::{display_error, Renderer};
use clap::Parser;
use colored::*;
use std::process;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match Config::from_env_and_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Error:".red(), e);
            process::exit(1);
        }
    };

    init_tracing(config.verbose);

    let store = match FilesystemIdentityStore::new() {
        Ok(store) => store,
        Err(e) => {
            display_error("Could not open the identity store", &e);
            process::exit(1);
        }
    };

    // Handle --reset-identity option
    if args.reset_identity {
        match store.clear_user_id() {
            Ok(()) => println!("{}", "Stored user id removed.".green()),
            Err(e) => {
                display_error("Error resetting identity", &e);
                process::exit(1);
            }
        }
        if args.message.is_empty() && !args.health && !args.clear_history {
            return;
        }
    }

    let session = match open_session(&store) {
        Ok(session) => session,
        Err(e) => {
            display_error("Could not load the user id", &e);
            process::exit(1);
        }
    };

    let client = match FallbackClient::new(&config.base_url, Duration::from_secs(config.stream_timeout)) {
        Ok(client) => client,
        Err(e) => {
            display_error("Could not build the HTTP client", &e);
            process::exit(1);
        }
    };

    if config.verbose {
        eprintln!("{}", format!("[chat] Server: {}", config.base_url).dimmed());
        if config.persistent {
            eprintln!("{}", format!("[chat] Channel: {}", config.ws_url).dimmed());
        } else {
            eprintln!("{}", "[chat] Channel: disabled".dimmed());
        }
        eprintln!("{}", format!("[chat] User id: {}", session.user_id).dimmed());
    }

    // Handle --health option
    if args.health {
        match client.health().await {
            Ok(health) => {
                println!("{} {}", "Backend status:".green(), health.status);
                return;
            }
            Err(e) => {
                display_error("Backend is not reachable", &e);
                process::exit(1);
            }
        }
    }

    // Handle --clear option
    if args.clear_history {
        match client.clear_history(&session.user_id).await {
            Ok(()) => {
                println!("{}", "Conversation history cleared.".green());
                return;
            }
            Err(e) => {
                display_error("Error clearing history", &e);
                process::exit(1);
            }
        }
    }

    let channel = config.persistent.then(|| {
        ChannelManager::global(ChannelConfig {
            url: config.ws_url.clone(),
            policy: config.reconnect.clone(),
            heartbeat: config.heartbeat,
        })
    });

    let handle = ChatSession::spawn(ChatOptions {
        user_id: session.user_id.clone(),
        fallback: client,
        channel,
        watchdog: Watchdog::new(config.watchdog_interval, config.turn_timeout),
    });
    let mut renderer = Renderer::new(config.verbose);

    let outcome = if args.message.is_empty() {
        run_interactive(&handle, &mut renderer).await
    } else {
        run_once(&handle, &mut renderer, args.message.join(" ")).await
    };

    handle.shutdown().await;
    if let Err(e) = outcome {
        display_error("Chat failed", &e);
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "warn,agentchat=debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .ok();
}

/// The user's turn is over once its message is followed by a closed turn.
fn turn_settled(view: &ChatView, text: &str) -> bool {
    if view.turn_open() {
        return false;
    }
    let Some(position) = view
        .messages
        .iter()
        .rposition(|m| m.role == Role::User && m.content == text)
    else {
        return false;
    };
    position + 1 < view.messages.len()
}

async fn run_once(handle: &ChatHandle, renderer: &mut Renderer, text: String) -> agentchat::Result<()> {
    let text = text.trim().to_string();
    let mut views = handle.subscribe();
    renderer.note_submitted(&text);
    handle.submit(text.clone())?;

    let mut started = false;
    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                renderer.render(&view);
                started |= view.turn_open();
                if started && turn_settled(&view, &text) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("{}", "\nCancelling...".yellow());
                handle.cancel()?;
            }
        }
    }
    Ok(())
}

async fn run_interactive(handle: &ChatHandle, renderer: &mut Renderer) -> agentchat::Result<()> {
    let mut views: watch::Receiver<ChatView> = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut turn_open = false;

    println!(
        "{}",
        "Type a message and press Enter. /cancel stops a response, /clear resets the conversation, /quit exits."
            .dimmed()
    );
    print_prompt();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match line.trim() {
                    "" => print_prompt(),
                    "/quit" | "/exit" => break,
                    "/cancel" => handle.cancel()?,
                    "/clear" => {
                        handle.clear_history()?;
                        println!("{}", "Conversation cleared.".green());
                        print_prompt();
                    }
                    text => {
                        if turn_open {
                            println!("{}", "A response is still streaming; use /cancel first.".yellow());
                        } else {
                            renderer.note_submitted(text);
                            handle.submit(text)?;
                        }
                    }
                }
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                renderer.render(&view);
                let now_open = view.turn_open();
                if turn_open && !now_open {
                    print_prompt();
                }
                turn_open = now_open;
            }
            _ = tokio::signal::ctrl_c() => {
                if turn_open {
                    eprintln!("{}", "\nCancelling...".yellow());
                    handle.cancel()?;
                } else {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn print_prompt() {
    use std::io::Write;
    print!("{} ", ">".bold());
    let _ = std::io::stdout().flush();
}
