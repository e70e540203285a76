//! # nskv
//!
//! A Redis-wire-compatible key-value server whose keyspace is split into
//! namespaces, each reached with its own token.
//!
//! The core is namespace isolation, resumable cursor-based enumeration
//! (SCAN and the collection scans) and the RDB snapshot codec behind
//! DUMP, RESTORE and RDB LOAD. Storage is an ordered in-memory engine
//! behind the [`store::Storage`] trait.

pub mod command;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod namespace;
pub mod rdb;
pub mod replication;
pub mod resp;
pub mod server;
pub mod slowlog;
pub mod store;
pub mod types;
