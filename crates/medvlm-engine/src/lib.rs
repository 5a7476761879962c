//! MedVLM engine: the remote analysis client and the interactive studio
//! built on top of it.

pub mod client;
pub mod config;
pub mod error;
pub mod imaging;
pub mod screens;
pub mod studio;

pub use client::{ContentService, HttpContentService, MedVlmClient};
pub use config::EngineConfig;
pub use error::{EngineError, ErrorKind};
pub use studio::{new_session_id, Launch, Studio};
