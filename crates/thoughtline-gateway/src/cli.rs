use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "thoughtline", about = "Streaming LLM chat gateway with reasoning separation")]
pub struct Cli {
    /// Config file (default: ~/.thoughtline/thoughtline.toml)
    #[arg(long, global = true, env = "THOUGHTLINE_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the proxy gateway (default)
    Serve,
    /// Send one prompt through the gateway and stream the reply
    Chat {
        prompt: String,
        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,
        /// openai or anthropic
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
    },
    /// List stored conversations, most recent first
    Conversations {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Write a conversation as JSON
    Export {
        id: String,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Load a conversation from an export file
    Import { file: String },
}
