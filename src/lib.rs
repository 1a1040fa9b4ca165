//! # class-match
//!
//! Fast class-file inspection and rule matching for bytecode instrumentation agents.
//!
//! ## Architecture
//!
//! - **header**: Class-file header parsing (version, access, names, interfaces)
//! - **outline**: Continues the header scan through fields, methods and annotations
//! - **trie**: Byte-level prefix/suffix/exact class-name tries
//! - **filter**: Include/exclude/no-match decisions over a name trie
//! - **matcher**: Structural rules over headers and outlines
//! - **rules**: Compiled rule sets and the atomically swappable handle
//! - **loader**: Generation-checked loader keys for weak loader association
//! - **cache**: Per-loader memo of parse results and decisions
//! - **agent**: Host-facing facade and process-wide installation
//! - **config**: Rules files (JSON or line format) and their resolution
//! - **scan**: Discovery of jars and class files on disk
//! - **catalog**: Reading class entries out of jars
//! - **fixture**: Synthesised class-files for tests

pub mod access;
pub mod agent;
mod bytes;
pub mod cache;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod fixture;
pub mod header;
pub mod loader;
pub mod matcher;
pub mod names;
pub mod outline;
mod pool;
pub mod rules;
pub mod scan;
pub mod trie;

pub use bytes::encode_modified_utf8;
