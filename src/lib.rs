#![allow(clippy::manual_unwrap_or_default)]
#![allow(clippy::manual_unwrap_or)]

pub mod client;
pub mod constants;
pub mod credentials;
pub mod hardening;
pub mod logging;
pub mod projections;
pub mod specs;
pub mod str_utils;
pub mod streaming;
pub mod think_split;
pub mod types;

pub use types::*;

pub use client::{AdapterConfig, ChatClient};
pub use credentials::{CredentialStore, MemoryCredentialStore};
