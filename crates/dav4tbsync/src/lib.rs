//! CalDAV/CardDAV provider for TbSync.
//!
//! [`DavProvider`] answers the host's provider commands; it is registered
//! with a [`tbsync_core::Channel`] through [`DavProvider::command_table`].

mod error;
pub mod folders;
pub mod locale;
pub mod prefs;
pub mod provider;
pub mod status;
pub mod stdio;

pub use error::ConfigError;
pub use prefs::Preferences;
pub use provider::DavProvider;
pub use status::{StatusData, StatusType};

/// Announce tag understood by hosts that predate provider info.
pub const LEGACY_PROVIDER_TAG: &str = "dav";
