//! # Chatlog Core
//!
//! Core types shared by the chatlog crates.
//!
//! ## Key Types
//!
//! - [`Account`]: The messaging account whose conversations were logged
//! - [`Entity`]: A contact or chat room taking part in a conversation
//! - [`Event`]: A logged text message or call
//! - [`EventMask`]: Bitmask selecting which kinds of [`Event`] to read

pub mod account;
pub mod entity;
pub mod error;
pub mod event;
pub mod mask;

pub use account::*;
pub use entity::*;
pub use error::*;
pub use event::*;
pub use mask::*;
