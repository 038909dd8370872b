pub mod bencode;
pub mod config;
pub mod contact;
pub mod crypto;
pub mod path;
pub mod pathset;
pub mod routing;
pub mod types;

// Re-export primary public API
pub use crate::config::Config;
pub use crate::contact::{AddressInfo, ExitInfo, RouterContact, MAX_RC_SIZE, NICK_LEN};
pub use crate::crypto::Crypto;
pub use crate::path::{Introduction, Path, PathRef, PathRole, PathStatus};
pub use crate::pathset::PathSet;
pub use crate::routing::{InboundMessageParser, MessageHandler};
pub use crate::types::{Error, PathId, Result, RouterContext, RouterId};
