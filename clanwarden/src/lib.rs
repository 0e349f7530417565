// clanwarden/src/lib.rs
//
// Clanwarden: chat spam detection and escalating moderation for a managed
// clan. The binary in main.rs drives one ModerationSession from a JSONL
// event stream; everything else lives here so it can be tested directly.

pub mod config;
pub mod detector;
pub mod directory;
pub mod engine;
pub mod error;
pub mod events;
pub mod notify;
pub mod session;
pub mod state;

pub use config::Settings;
pub use error::{ModError, ModResult};
pub use session::ModerationSession;
