//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Data directory for the friends list
    #[arg(short, long, global = true)]
    pub data_dir: Option<String>,

    /// Port to listen for peers on
    #[arg(short, long, global = true)]
    pub port: Option<u16>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive chat mode
    Chat,
    /// Propose a conversation, send a single message, and leave
    Send {
        /// Recipient address, `ip` or `ip:port`
        #[arg(short, long)]
        to: String,
        /// Message content
        message: String,
    },
    /// List stored friends
    Friends,
    /// Print the address friends outside the local network can reach
    Whoami,
    /// Store a friend's address
    AddFriend {
        /// IPv4 address of the friend
        ip: String,
        /// Port the friend listens on
        port: Option<u16>,
    },
}
