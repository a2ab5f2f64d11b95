//! Notestream - streaming notebook Q&A client library
//!
//! This library provides the client engine for asking questions against a
//! notebook backend that streams its answer as `data:` frames, plus a
//! realtime room where several clients see each other and exchange
//! messages.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `stream`: Frame decoding and stream event parsing
//! - `transcript`: Messages, the observable transcript, and the assembler
//!   that turns stream events into assistant messages
//! - `session`: Per-conversation stream session controller
//! - `backend`: Question-answering backend abstraction and HTTP client
//! - `storage`: Conversation persistence (SQLite)
//! - `quota`: Token quota limits
//! - `realtime`: Room presence and broadcast
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface and handlers
//!
//! # Example
//!
//! ```no_run
//! use notestream::{commands, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let controller = commands::build_controller(&config)?;
//!     let id = controller.open_conversation(None).await?;
//!     controller.submit(&id, "What is osmosis?").await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod quota;
pub mod realtime;
pub mod session;
pub mod storage;
pub mod stream;
pub mod transcript;

// Re-export commonly used types
pub use config::Config;
pub use error::{NotestreamError, Result};
pub use session::{StreamController, TurnOutcome};
pub use transcript::{Message, Transcript, TranscriptHandle};
