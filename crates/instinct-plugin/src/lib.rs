//! `instinct-plugin`: actions that live in separate processes.
//!
//! The host side ([`PluginHost`], [`PluginAction`]) spawns plugin
//! executables, checks their handshake and exposes each one as an ordinary
//! [`instinct_core::Action`]. The plugin side ([`serve`]) is what a plugin
//! binary calls from `main` to answer the host.
//!
//! ```text
//! host                                  plugin
//!  │ spawn (env: cookie, version)  ──▶   │
//!  │ ◀── {"protocol_version":1,...}      │ handshake line
//!  │ {"method":"get_type"}          ──▶  │
//!  │ ◀── {"ok":true,"value":"ticket"}    │
//!  │ {"method":"execute","context":…} ─▶ │
//!  │ ◀── {"ok":true,"value":{…}}         │
//! ```

pub mod action;
pub mod error;
pub mod host;
pub mod process;
pub mod protocol;
pub mod serve;

pub use action::PluginAction;
pub use error::{PluginError, Result};
pub use host::{discover, PluginFailure, PluginHost, PluginInfo};
pub use process::{PluginCommand, PluginProcess};
pub use serve::{serve, serve_io};
