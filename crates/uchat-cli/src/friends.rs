//! Persistent friends list
//!
//! Friends are stored as a JSON array in the data directory. The list is
//! appended to when a friend is added and rewritten when a friend announces a
//! new username or color.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uchat_core::PeerColor;

use crate::error::Result;

/// A stored peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    pub address: SocketAddr,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub color: PeerColor,
}

impl Friend {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            username: String::new(),
            color: PeerColor::default(),
        }
    }

    pub fn display_name(&self) -> String {
        if self.username.is_empty() {
            self.address.to_string()
        } else {
            format!("{} ({})", self.username, self.address)
        }
    }
}

/// Friends list backed by a JSON file
#[derive(Debug)]
pub struct FriendsList {
    path: PathBuf,
    friends: Vec<Friend>,
}

impl FriendsList {
    /// Load the list at `path`; a missing file is an empty list
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let friends = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Vec::new()
        };
        debug!("Loaded {} friends from {}", friends.len(), path.display());
        Ok(Self { path, friends })
    }

    /// Write the list, creating the data directory if needed
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.friends)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    /// Store a new friend. Returns false if the address is already known.
    pub fn add(&mut self, address: SocketAddr) -> Result<bool> {
        if self.get(address).is_some() {
            return Ok(false);
        }
        self.friends.push(Friend::new(address));
        self.save()?;
        Ok(true)
    }

    /// Record a friend's announced identity. Returns true if anything changed.
    pub fn update(&mut self, address: SocketAddr, username: &str, color: PeerColor) -> Result<bool> {
        let Some(friend) = self.friends.iter_mut().find(|f| f.address == address) else {
            return Ok(false);
        };
        if friend.username == username && friend.color == color {
            return Ok(false);
        }
        friend.username = username.to_string();
        friend.color = color;
        self.save()?;
        Ok(true)
    }

    pub fn get(&self, address: SocketAddr) -> Option<&Friend> {
        self.friends.iter().find(|f| f.address == address)
    }

    pub fn friends(&self) -> &[Friend] {
        &self.friends
    }

    pub fn is_empty(&self) -> bool {
        self.friends.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let list = FriendsList::load(dir.path().join("friends.json")).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_add_persists_and_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("friends.json");

        let mut list = FriendsList::load(&path).unwrap();
        assert!(list.add(addr("10.0.0.2:52789")).unwrap());
        assert!(!list.add(addr("10.0.0.2:52789")).unwrap());
        assert!(list.add(addr("10.0.0.3:52789")).unwrap());

        let reloaded = FriendsList::load(&path).unwrap();
        assert_eq!(reloaded.friends().len(), 2);
        assert_eq!(reloaded.friends()[0].address, addr("10.0.0.2:52789"));
    }

    #[test]
    fn test_update_known_friend_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("friends.json");
        let color: PeerColor = "#FAB".parse().unwrap();

        let mut list = FriendsList::load(&path).unwrap();
        list.add(addr("10.0.0.2:52789")).unwrap();

        assert!(list.update(addr("10.0.0.2:52789"), "bob", color).unwrap());
        assert!(!list.update(addr("10.0.0.2:52789"), "bob", color).unwrap());
        assert!(!list.update(addr("10.0.0.9:52789"), "eve", color).unwrap());

        let reloaded = FriendsList::load(&path).unwrap();
        let friend = reloaded.get(addr("10.0.0.2:52789")).unwrap();
        assert_eq!(friend.username, "bob");
        assert_eq!(friend.color, color);
        assert_eq!(friend.display_name(), "bob (10.0.0.2:52789)");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("friends.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FriendsList::load(&path),
            Err(crate::error::CliError::Serialization(_))
        ));
    }
}
