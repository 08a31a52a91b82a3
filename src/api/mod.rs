//! Torrent index clients and source selection
//!
//! - YTS: curated movie releases with quality and source labels
//! - Bay: apibay search, classified from release names
//! - Resolver: concurrent fan-out over the indexes and the selection policy

pub mod bay;
pub mod resolver;
pub mod yts;

pub use bay::BayClient;
pub use resolver::{select_candidate, SourceResolver, TorrentIndex};
pub use yts::YtsClient;
