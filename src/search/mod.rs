//! Search index production.
//!
//! The query engine is external; this module produces what it
//! consumes: tokenized per-post records with BM25 statistics, written
//! as a gzip-compressed msgpack array at `<output>/search.bin`.

pub mod analyzer;
pub mod index;

pub use analyzer::{ANALYZER, Analyzer};
pub use index::{IndexEntry, write_search_index};
