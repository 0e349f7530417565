// clanwarden/src/error.rs
//
// Caller-visible outcomes of moderation actions plus the errors raised at
// the two external seams (user directory, record store).

use thiserror::Error;

/// Errors from the external user directory.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("directory lookup for {user} failed: {message}")]
    Lookup { user: String, message: String },

    #[error("blacklist update for {user} failed: {message}")]
    Blacklist { user: String, message: String },
}

/// Errors from the player record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("record store encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Rejections and failures surfaced to the command layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModError {
    #[error("unknown user {0}")]
    UnknownUser(String),

    #[error("{0} is already banned")]
    AlreadyBanned(String),

    #[error("{0} is not banned")]
    NotBanned(String),

    #[error("{0} has no active warnings")]
    NoActiveWarnings(String),

    #[error("{0} is immune to moderation")]
    ImmuneTarget(String),

    #[error("cannot target yourself")]
    SelfTarget,

    #[error("cannot target the bot")]
    BotTarget,

    #[error("{0} lacks permission {1}")]
    Forbidden(String, &'static str),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

pub type ModResult<T> = Result<T, ModError>;
