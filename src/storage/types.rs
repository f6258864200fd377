//! Typed identifiers and names used across the queue store.
//!
//! Git object ids are wrapped per object kind so a tree id can never be
//! handed to something expecting a commit. Names that end up in ref paths
//! or tree paths are validated once, at construction.

use std::fmt;
use std::path::PathBuf;

use git2::Oid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) Oid);

        impl $name {
            pub(crate) fn new(oid: Oid) -> Self {
                Self(oid)
            }

            pub(crate) fn raw(&self) -> Oid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

object_id!(
    /// A commit on `main` or on a transaction branch.
    CommitId
);
object_id!(BlobId);
object_id!(TreeId);

impl CommitId {
    pub fn from_hex(hex: &str) -> Result<Self, git2::Error> {
        Oid::from_str(hex).map(Self)
    }

    /// Seven hex digits, as `git log --oneline` prints.
    pub fn short(&self) -> String {
        let mut hex = self.0.to_string();
        hex.truncate(7);
        hex
    }
}

/// Name of a queue; also the name of its directory in the store tree.
///
/// At most [`QueueName::MAX_LEN`] ASCII letters, digits, `_` or `-`. A
/// leading `_` is refused so queue directories never collide with
/// bookkeeping entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    pub const MAX_LEN: usize = 64;

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        match name.chars().next() {
            None => return Err(InvalidNameError::Empty),
            Some('_') => return Err(InvalidNameError::InvalidStart('_')),
            Some(_) if name.len() > Self::MAX_LEN => return Err(InvalidNameError::TooLong(name.len())),
            Some(_) => {}
        }
        let bad = name
            .chars()
            .enumerate()
            .find(|&(_, c)| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        if let Some((position, char)) = bad {
            return Err(InvalidNameError::InvalidCharacter { char, position });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for QueueName {
    type Error = InvalidNameError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

impl std::str::FromStr for QueueName {
    type Err = InvalidNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for QueueName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of an item within its queue (1-based).
///
/// Stored as a zero-padded file name so git's sorted tree order
/// matches queue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemSeq(u64);

impl ItemSeq {
    pub const FIRST: ItemSeq = ItemSeq(1);

    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// file name for this item inside a queue directory
    pub fn file_name(&self) -> String {
        format!("{:08}.json", self.0)
    }

    /// parse a file name produced by [`ItemSeq::file_name`]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let digits = name.strip_suffix(".json")?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(Self)
    }
}

impl fmt::Display for ItemSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Full path to an item in the repository.
///
/// Format: `{queue}/{seq:08}.json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPath {
    pub queue: QueueName,
    pub seq: ItemSeq,
}

impl ItemPath {
    pub fn new(queue: QueueName, seq: ItemSeq) -> Self {
        Self { queue, seq }
    }

    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(self.to_string())
    }
}

impl fmt::Display for ItemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.queue, self.seq.file_name())
    }
}

/// Short name of a branch: `main`, or `tx/{id}` for an open transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchName(String);

impl BranchName {
    pub const MAIN: &'static str = "main";
    pub const TX_PREFIX: &'static str = "tx/";

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        if name.is_empty() {
            Err(InvalidNameError::Empty)
        } else if git2::Reference::is_valid_name(&format!("refs/heads/{}", name)) {
            Ok(Self(name))
        } else {
            Err(InvalidNameError::InvalidPath(name))
        }
    }

    pub fn main() -> Self {
        Self(Self::MAIN.into())
    }

    pub fn for_transaction(tx_id: &str) -> Self {
        Self([Self::TX_PREFIX, tx_id].concat())
    }

    pub fn is_transaction_branch(&self) -> bool {
        self.transaction_id().is_some()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.0.strip_prefix(Self::TX_PREFIX)
    }

    /// Full reference path, `refs/heads/...`.
    pub fn as_ref_path(&self) -> String {
        ["refs/heads/", &self.0].concat()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Author and committer stamped on every store commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self { name: name.into(), email: email.into() }
    }

    pub fn queuetx() -> Self {
        Self::new("queuetx", "queuetx@localhost")
    }

    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::queuetx()
    }
}

/// A queue or branch name was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidNameError {
    #[error("name is empty")]
    Empty,
    #[error("name is {0} characters long")]
    TooLong(usize),
    #[error("name starts with '{0}'")]
    InvalidStart(char),
    #[error("'{char}' at position {position} is not allowed")]
    InvalidCharacter { char: char, position: usize },
    #[error("'{0}' is not a valid branch name")]
    InvalidPath(String),
}
