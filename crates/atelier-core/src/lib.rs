pub mod backends;
pub mod command;
pub mod config;
pub mod context;
pub mod conversation;
pub mod error;
pub mod history;
pub mod idle;
pub mod imagegen;
pub mod listen;
pub mod outbox;
pub mod process;
pub mod profiles;
pub mod runtime;
pub mod stats;
pub mod tokens;
pub mod tts_queue;
pub mod types;

#[cfg(test)]
mod test_support;

pub use error::{AtelierError, Result};
