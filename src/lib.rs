pub mod config;
pub mod crypto;
pub mod engine;
pub mod entry;
pub mod error;
pub mod keystore;
pub mod session;
pub mod table;

pub use config::ProtocolConfig;
pub use engine::LabelEngine;
pub use entry::Entry;
pub use error::{ErrorKind, OblivError, Result};
pub use keystore::{CheckpointStore, FileCheckpointStore, KeyStore, MemoryCheckpointStore};
pub use session::Session;
