//! # Chatlog Store
//!
//! Readers for instant-messaging log stores, and the machinery to walk
//! them as one time-ordered stream.
//!
//! Each store keeps the log of a conversation as one page per date. This
//! crate provides:
//!
//! - **PageSource trait**: Lists and loads the pages of one store
//! - **XmlLogStore**: Reader for the logger's own XML store
//! - **PidginLogStore**: Reader for Pidgin text and HTML transcripts
//! - **InMemoryPageSource**: In-memory source for testing/simulation
//! - **LogIter**: Rewindable cursor over one store, newest first
//! - **LogWalker**: Merge of several iterators with mask and filter
//! - **LogManager**: Queries and text search across every configured store
//!
//! ## Example
//!
//! ```rust,ignore
//! use chatlog_core::{Account, Entity, EventMask};
//! use chatlog_store::{LogManager, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = LogManager::new(StoreConfig::default());
//!     let account = Account::new("gabble/jabber/user_40collabora_2eco_2euk").unwrap();
//!     let target = Entity::contact("user2@collabora.co.uk");
//!
//!     let mut walker = manager
//!         .walk_filtered_events(&account, &target, EventMask::TEXT, None)
//!         .await
//!         .unwrap();
//!
//!     // Newest ten messages, then the ten before them
//!     let latest = walker.get_events(10).await.unwrap();
//!     let older = walker.get_events(10).await.unwrap();
//!
//!     // Step back and read the older batch again
//!     walker.rewind(older.len()).await.unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod iter;
pub mod manager;
pub mod memory;
pub mod pidgin;
pub mod source;
pub mod walker;
pub mod xml;

// Re-exports
pub use config::{DEFAULT_FETCH_BATCH, StoreConfig};
pub use error::StoreError;
pub use iter::LogIter;
pub use manager::LogManager;
pub use memory::InMemoryPageSource;
pub use pidgin::PidginLogStore;
pub use source::{LogStore, PageKey, PageSource, SearchHit};
pub use walker::{LogEventFilter, LogWalker, SharedLogWalker, WalkerConfig};
pub use xml::XmlLogStore;
