//! Command handlers for the UChat CLI

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uchat_core::{SessionEvent, SessionHandle, SessionManager, DEFAULT_LISTEN_PORT};

use crate::address::{parse_ipv4, parse_peer_address};
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::external_ip::IpLookup;
use crate::friends::FriendsList;
use crate::port_mapping::ManualPortMapper;
use crate::terminal::TerminalInterface;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Chat => Self::handle_chat_command(config).await,
            Commands::Send { to, message } => {
                Self::handle_send_command(config, to, message).await
            }
            Commands::Friends => Self::handle_friends_command(config),
            Commands::Whoami => Self::handle_whoami_command(config).await,
            Commands::AddFriend { ip, port } => {
                Self::handle_add_friend_command(config, ip, port)
            }
        }
    }

    /// Start a session and hand the terminal to the interactive interface
    async fn handle_chat_command(config: AppConfig) -> Result<()> {
        let friends = FriendsList::load(config.friends_path())?;
        let lookup = IpLookup::from_config(&config.cli)?;
        let session_config = config.session_config();
        let (events_tx, events_rx) = mpsc::channel(session_config.event_buffer_size);

        let manager = SessionManager::bind(
            session_config,
            &config.account.username,
            config.account.color,
            events_tx,
        )
        .await?
        .with_port_mapper(ManualPortMapper::default());

        let listen_port = manager.local_address().port();
        info!(
            "Starting interactive chat as {} on port {}",
            config.account.username, listen_port
        );

        let (handle, session_task) = manager.spawn();
        let terminal = TerminalInterface::new(
            handle,
            events_rx,
            friends,
            config.cli.prompt.clone(),
            DEFAULT_LISTEN_PORT,
        )
        .with_lookup(lookup, listen_port);
        let outcome = terminal.run().await;

        if let Err(err) = session_task.await {
            warn!("Session task ended abnormally: {}", err);
        }
        outcome
    }

    /// Propose a conversation, send one message, and leave
    async fn handle_send_command(config: AppConfig, to: String, message: String) -> Result<()> {
        let peer = parse_peer_address(&to, DEFAULT_LISTEN_PORT)?;

        // Replies arrive on the outbound connection, so any local port will do
        let session_config = config.session_config().with_listen_port(0);
        let wait = session_config.connect_timeout() + session_config.io_timeout();
        let (events_tx, mut events_rx) = mpsc::channel(session_config.event_buffer_size);

        let manager = SessionManager::bind(
            session_config,
            &config.account.username,
            config.account.color,
            events_tx,
        )
        .await?;
        let (handle, session_task) = manager.spawn();

        let outcome = Self::deliver(&handle, &mut events_rx, peer, message, wait).await;

        if let Err(err) = handle.shutdown().await {
            warn!("Session stopped before shutdown: {}", err);
        }
        if let Err(err) = session_task.await {
            warn!("Session task ended abnormally: {}", err);
        }
        outcome
    }

    /// Propose, wait for the answer, then chat and say farewell
    async fn deliver(
        handle: &SessionHandle,
        events: &mut mpsc::Receiver<SessionEvent>,
        peer: SocketAddr,
        message: String,
        wait: Duration,
    ) -> Result<()> {
        handle.add_friend(peer).await?;
        handle.send_chat(peer, message.clone()).await?;

        tokio::time::timeout(wait, async {
            while let Some(event) = events.recv().await {
                if let Some(result) = Self::handshake_outcome(peer, event) {
                    return result;
                }
            }
            Err(CliError::Conversation("session stopped".to_string()))
        })
        .await
        .unwrap_or_else(|_| {
            Err(CliError::Conversation(format!(
                "{} did not answer within {:?}",
                peer, wait
            )))
        })?;

        handle.send_chat(peer, message).await?;
        handle.leave(peer).await?;
        println!("Message sent to {}", peer);
        Ok(())
    }

    /// Map an event to the end of the handshake with `peer`, if it is one
    fn handshake_outcome(peer: SocketAddr, event: SessionEvent) -> Option<Result<()>> {
        match event {
            SessionEvent::ConversationActive { peer: p, .. } if p == peer => Some(Ok(())),
            SessionEvent::ConversationRejected { peer: p } if p == peer => Some(Err(
                CliError::Conversation(format!("{} declined the conversation", peer)),
            )),
            SessionEvent::ConversationClosed { peer: p } if p == peer => Some(Err(
                CliError::Conversation(format!("{} closed the connection", peer)),
            )),
            SessionEvent::Notice { message, .. } => Some(Err(CliError::Conversation(message))),
            _ => None,
        }
    }

    /// Print the public address and listening port
    async fn handle_whoami_command(config: AppConfig) -> Result<()> {
        let lookup = IpLookup::from_config(&config.cli)?;
        let ip = lookup.external_ip().await?;
        println!("{}:{}", ip, config.session.listen_port);
        Ok(())
    }

    /// List stored friends
    fn handle_friends_command(config: AppConfig) -> Result<()> {
        let friends = FriendsList::load(config.friends_path())?;
        if friends.is_empty() {
            println!("No friends stored in {}", friends.path().display());
            return Ok(());
        }
        for friend in friends.friends() {
            println!("{}  {}", friend.color, friend.display_name());
        }
        Ok(())
    }

    /// Store a friend without starting a session
    fn handle_add_friend_command(config: AppConfig, ip: String, port: Option<u16>) -> Result<()> {
        let address = SocketAddr::from((
            parse_ipv4(&ip)?,
            port.unwrap_or(DEFAULT_LISTEN_PORT),
        ));
        let mut friends = FriendsList::load(config.friends_path())?;
        if friends.add(address)? {
            println!("Added friend {}", address);
        } else {
            println!("{} is already a friend", address);
        }
        Ok(())
    }
}
