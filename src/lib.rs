mod bus;
mod config;
mod error;
mod index;
mod indexer;
mod links;
mod parse;
mod scan;
mod service;
mod snapshot;
mod store;
mod vault;

pub use crate::bus::{IndexBus, SubscriptionId};
pub use crate::config::IndexerConfig;
pub use crate::error::{Error, Result};
pub use crate::index::{Document, Index, build};
pub use crate::indexer::Indexer;
pub use crate::links::extract_links;
pub use crate::parse::{Header, ParsedDocument, parse_document};
pub use crate::scan::scan;
pub use crate::service::VaultWatcher;
pub use crate::snapshot::{read_snapshot, write_snapshot};
pub use crate::store::{NoteRow, SqliteIndexStore, WriteStats};
pub use crate::vault::{Vault, VaultPath};
