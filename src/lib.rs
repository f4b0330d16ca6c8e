//! Layered object-storage backend for an OCFL-compatible repository.
//!
//! A repository is stored as a stack of append-oriented filesystem layers.
//! Writes always land in the newest (top) layer; older layers are sealed and
//! read-only. A persistent listing index records every path in every layer so
//! that directory listings and visibility queries never have to walk disks.
//!
//! The main entry point is [`fs::LayeredStorage`], which presents the stack
//! as a single virtual filesystem.

pub mod config;
pub mod fs;
pub mod layer;
pub mod storage;
pub mod types;
