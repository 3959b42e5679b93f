use clap::Parser;

#[derive(Parser, Debug, Default)]
#[command(name = "agentchat")]
#[command(about = "Chat with a streaming agent backend from the terminal", long_about = None)]
pub struct Args {
    #[arg(long = "server", help = "Backend base URL (e.g., http://localhost:9876)")]
    pub server: Option<String>,

    #[arg(
        long = "ws-url",
        help = "Persistent channel URL (defaults to the server URL with /ws)"
    )]
    pub ws_url: Option<String>,

    #[arg(
        long = "no-socket",
        help = "Skip the persistent channel and use the HTTP fallback only"
    )]
    pub no_socket: bool,

    #[arg(long = "clear", help = "Clear the conversation history on the backend")]
    pub clear_history: bool,

    #[arg(long = "health", help = "Check that the backend is reachable and exit")]
    pub health: bool,

    #[arg(
        long = "reset-identity",
        help = "Forget the stored user id so the next run starts a new identity"
    )]
    pub reset_identity: bool,

    #[arg(short = 'v', long = "verbose", help = "Print connection and transport details")]
    pub verbose: bool,

    #[arg(help = "Message to send; starts an interactive session when omitted")]
    pub message: Vec<String>,
}
