//! Interactive terminal interface
//!
//! Reads commands and chat lines from stdin and prints session events. Plain
//! text goes to the focused conversation; lines starting with `/` are
//! commands.

use std::collections::VecDeque;
use std::io::Write;
use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uchat_core::{SessionEvent, SessionHandle};

use crate::address::parse_peer_address;
use crate::error::{CliError, Result};
use crate::external_ip::IpLookup;
use crate::friends::FriendsList;

// ----------------------------------------------------------------------------
// Input Parsing
// ----------------------------------------------------------------------------

/// A line typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Chat text for the focused conversation
    Say(String),
    AddFriend(SocketAddr),
    Focus(SocketAddr),
    /// Approve a pending connection, the oldest if none is named
    Accept(Option<SocketAddr>),
    Reject(Option<SocketAddr>),
    Leave,
    List,
    Friends,
    /// Show the address peers outside the local network can use
    WhoAmI,
    Help,
    Quit,
    Empty,
}

/// Parse one input line
pub fn parse_input(line: &str, default_port: u16) -> Result<Input> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Ok(if line.is_empty() {
            Input::Empty
        } else {
            Input::Say(line.to_string())
        });
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();
    let address = |args: &[&str]| -> Result<Option<SocketAddr>> {
        match args {
            [] => Ok(None),
            [addr] => parse_peer_address(addr, default_port).map(Some),
            [ip, port] => parse_peer_address(&format!("{}:{}", ip, port), default_port).map(Some),
            _ => Err(CliError::InvalidAddress(args.join(" "))),
        }
    };
    let required = |args: &[&str]| -> Result<SocketAddr> {
        address(args)?.ok_or_else(|| CliError::InvalidAddress("an address is required".into()))
    };

    Ok(match name {
        "add" => Input::AddFriend(required(&args)?),
        "focus" => Input::Focus(required(&args)?),
        "accept" => Input::Accept(address(&args)?),
        "reject" => Input::Reject(address(&args)?),
        "leave" => Input::Leave,
        "list" => Input::List,
        "friends" => Input::Friends,
        "whoami" => Input::WhoAmI,
        "quit" | "exit" => Input::Quit,
        _ => Input::Help,
    })
}

const HELP: &str = "\
Commands:
  /add <ip> [port]     add a friend and focus their conversation
  /focus <ip[:port]>   send subsequent lines to this peer
  /accept [ip:port]    approve a pending inbound connection
  /reject [ip:port]    decline a pending inbound connection
  /leave               say farewell to the focused peer
  /list                show all conversations
  /friends             show stored friends
  /whoami              show the address to give to friends
  /quit                leave every conversation and exit
Anything else is sent to the focused peer.";

// ----------------------------------------------------------------------------
// Terminal Interface
// ----------------------------------------------------------------------------

pub struct TerminalInterface {
    handle: SessionHandle,
    events: mpsc::Receiver<SessionEvent>,
    friends: FriendsList,
    prompt: String,
    default_port: u16,
    focused: Option<SocketAddr>,
    pending: VecDeque<SocketAddr>,
    /// Public address lookup and the port we listen on
    lookup: Option<(IpLookup, u16)>,
}

impl TerminalInterface {
    pub fn new(
        handle: SessionHandle,
        events: mpsc::Receiver<SessionEvent>,
        friends: FriendsList,
        prompt: String,
        default_port: u16,
    ) -> Self {
        Self {
            handle,
            events,
            friends,
            prompt,
            default_port,
            focused: None,
            pending: VecDeque::new(),
            lookup: None,
        }
    }

    /// Enable `/whoami` for a session listening on `listen_port`
    pub fn with_lookup(mut self, lookup: IpLookup, listen_port: u16) -> Self {
        self.lookup = Some((lookup, listen_port));
        self
    }

    /// Run until the user quits or stdin closes
    pub async fn run(self) -> Result<()> {
        self.run_with(BufReader::new(tokio::io::stdin())).await
    }

    /// Run on `input` lines. The session is told to shut down however the
    /// loop ends.
    pub async fn run_with<R>(mut self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let result = self.serve(input).await;
        if let Err(err) = self.handle.shutdown().await {
            debug!("Session already stopped: {}", err);
        }
        result
    }

    async fn serve<R>(&mut self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        for friend in self.friends.friends().to_vec() {
            self.handle.add_friend(friend.address).await?;
        }

        println!("{}", HELP);
        self.show_prompt();

        let mut lines = input.lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    match parse_input(&line, self.default_port) {
                        Ok(Input::Quit) => break,
                        Ok(input) => self.handle_input(input).await?,
                        Err(err) => println!("! {}", err),
                    }
                    self.show_prompt();
                }
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    self.handle_event(event).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_input(&mut self, input: Input) -> Result<()> {
        match input {
            Input::Say(text) => match self.focused {
                Some(peer) => self.handle.send_chat(peer, text).await?,
                None => println!("! No conversation focused; use /focus or /add first"),
            },
            Input::AddFriend(address) => {
                self.handle.add_friend(address).await?;
                self.focus(address).await?;
                println!("* Type a message to propose a conversation with {}", address);
            }
            Input::Focus(peer) => self.focus(peer).await?,
            Input::Accept(peer) => match self.take_pending(peer) {
                Some(peer) => {
                    self.handle.approve(peer).await?;
                    self.focus(peer).await?;
                }
                None => println!("! No pending connection"),
            },
            Input::Reject(peer) => match self.take_pending(peer) {
                Some(peer) => self.handle.reject(peer).await?,
                None => println!("! No pending connection"),
            },
            Input::Leave => match self.focused.take() {
                Some(peer) => self.handle.leave(peer).await?,
                None => println!("! No conversation focused"),
            },
            Input::List => {
                for summary in self.handle.list_conversations().await? {
                    let marker = if summary.focused { '*' } else { ' ' };
                    let name = if summary.username.is_empty() {
                        "?"
                    } else {
                        summary.username.as_str()
                    };
                    let pending = if summary.pending_approval {
                        " (pending)"
                    } else {
                        ""
                    };
                    println!(
                        "{} {:<21} {} {} messages{}",
                        marker, summary.peer, name, summary.chat_count, pending
                    );
                    println!("    state: {}", summary.state);
                }
            }
            Input::Friends => {
                for friend in self.friends.friends() {
                    println!("  {}", friend.display_name());
                }
            }
            Input::WhoAmI => match &self.lookup {
                Some((lookup, port)) => {
                    let (lookup, port) = (lookup.clone(), *port);
                    tokio::spawn(async move {
                        match lookup.external_ip().await {
                            Ok(ip) => println!("\n* Friends can reach you at {}:{}", ip, port),
                            Err(err) => println!("\n! Could not look up your address: {}", err),
                        }
                    });
                }
                None => println!("! Address lookup is not available"),
            },
            Input::Help => println!("{}", HELP),
            Input::Quit | Input::Empty => {}
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::InboundConnection { peer } => {
                self.pending.push_back(peer);
                println!("\n* {} wants to talk. /accept or /reject", peer);
            }
            SessionEvent::ConversationActive { peer, username } => {
                println!("\n* Now talking with {} ({})", username, peer);
                if self.focused.is_none() {
                    self.focus(peer).await?;
                }
            }
            SessionEvent::ConversationRejected { peer } => {
                println!("\n* {} declined the conversation", peer);
            }
            SessionEvent::ConversationClosed { peer } => {
                println!("\n* Conversation with {} ended", peer);
                if self.focused == Some(peer) {
                    self.focused = None;
                }
            }
            SessionEvent::ChatReceived {
                peer,
                username,
                color,
                text,
                focused,
                ..
            } => {
                if focused {
                    println!("\n[{} {}] {}", color, username, text);
                } else {
                    println!("\n* New message from {} ({})", username, peer);
                }
            }
            SessionEvent::PeerUpdated {
                peer,
                username,
                color,
            } => match self.friends.update(peer, &username, color) {
                Ok(true) => debug!("Updated friend {} as {}", peer, username),
                Ok(false) => {}
                Err(err) => self.report_unsaved(err),
            },
            SessionEvent::FriendAdded { peer } => match self.friends.add(peer) {
                Ok(true) => println!("\n* Added friend {}", peer),
                Ok(false) => {}
                Err(err) => self.report_unsaved(err),
            },
            SessionEvent::Notice { kind, message } => {
                warn!("{:?}: {}", kind, message);
                println!("\n! {}", message);
            }
        }
        self.show_prompt();
        Ok(())
    }

    /// The chat goes on when the friends file cannot be written
    fn report_unsaved(&self, err: CliError) {
        warn!("Failed to save friends to {}: {}", self.friends.path().display(), err);
        println!("\n! Friends list not saved: {}", err);
    }

    async fn focus(&mut self, peer: SocketAddr) -> Result<()> {
        self.handle.focus(peer).await?;
        self.focused = Some(peer);
        Ok(())
    }

    fn take_pending(&mut self, peer: Option<SocketAddr>) -> Option<SocketAddr> {
        match peer {
            Some(peer) => {
                let index = self.pending.iter().position(|p| *p == peer)?;
                self.pending.remove(index)
            }
            None => self.pending.pop_front(),
        }
    }

    fn show_prompt(&self) {
        print!("{}", self.prompt);
        if let Err(err) = std::io::stdout().flush() {
            debug!("Failed to flush stdout: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uchat_core::SessionCommand;

    const PORT: u16 = 52789;

    fn terminal_with(
        friends: FriendsList,
    ) -> (
        TerminalInterface,
        mpsc::Receiver<SessionCommand>,
        mpsc::Sender<SessionEvent>,
    ) {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::channel(16);
        let terminal = TerminalInterface::new(
            SessionHandle::new(commands_tx),
            events_rx,
            friends,
            String::new(),
            PORT,
        );
        (terminal, commands_rx, events_tx)
    }

    #[tokio::test]
    async fn test_unwritable_friends_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-directory");
        std::fs::write(&blocker, "").unwrap();
        let friends = FriendsList::load(blocker.join("friends.json")).unwrap();
        let (mut terminal, _commands, _events) = terminal_with(friends);
        let peer: SocketAddr = "10.0.0.2:52789".parse().unwrap();

        terminal
            .handle_event(SessionEvent::FriendAdded { peer })
            .await
            .unwrap();
        terminal
            .handle_event(SessionEvent::PeerUpdated {
                peer,
                username: "bob".into(),
                color: Default::default(),
            })
            .await
            .unwrap();
        assert_eq!(terminal.friends.get(peer).unwrap().username, "bob");
    }

    #[tokio::test]
    async fn test_session_is_shut_down_when_loop_fails() {
        let dir = tempfile::tempdir().unwrap();
        let friends = FriendsList::load(dir.path().join("friends.json")).unwrap();
        let (terminal, mut commands, _events) = terminal_with(friends);

        // Answering nothing makes the listing fail like a stopped session
        let session = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(command) = commands.recv().await {
                match command {
                    SessionCommand::ListConversations { reply } => drop(reply),
                    SessionCommand::Shutdown => {
                        seen.push("shutdown");
                        break;
                    }
                    _ => seen.push("other"),
                }
            }
            seen
        });

        let result = terminal.run_with(&b"/list\n"[..]).await;
        assert!(matches!(
            result,
            Err(CliError::Core(uchat_core::UchatError::SessionStopped))
        ));
        assert_eq!(session.await.unwrap(), vec!["shutdown"]);
    }

    #[test]
    fn test_plain_text_is_chat() {
        assert_eq!(
            parse_input("  hello there ", PORT).unwrap(),
            Input::Say("hello there".to_string())
        );
        assert_eq!(parse_input("   ", PORT).unwrap(), Input::Empty);
    }

    #[test]
    fn test_address_commands() {
        let addr: SocketAddr = "10.0.0.2:52789".parse().unwrap();
        assert_eq!(parse_input("/add 10.0.0.2", PORT).unwrap(), Input::AddFriend(addr));
        assert_eq!(
            parse_input("/add 10.0.0.2 4000", PORT).unwrap(),
            Input::AddFriend("10.0.0.2:4000".parse().unwrap())
        );
        assert_eq!(parse_input("/focus 10.0.0.2:52789", PORT).unwrap(), Input::Focus(addr));
        assert_eq!(parse_input("/accept", PORT).unwrap(), Input::Accept(None));
        assert_eq!(
            parse_input("/reject 10.0.0.2", PORT).unwrap(),
            Input::Reject(Some(addr))
        );
    }

    #[test]
    fn test_invalid_commands() {
        assert!(parse_input("/add", PORT).is_err());
        assert!(parse_input("/focus not-an-ip", PORT).is_err());
        assert_eq!(parse_input("/whatever", PORT).unwrap(), Input::Help);
        assert_eq!(parse_input("/quit", PORT).unwrap(), Input::Quit);
        assert_eq!(parse_input("/whoami", PORT).unwrap(), Input::WhoAmI);
    }
}
