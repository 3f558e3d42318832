//! Content hashing and the block codec for Kiln.
//!
//! Provides domain-separated BLAKE3 hashing and [`Block`], the unit every
//! layer uses when it creates immutable, content-addressed data.

pub mod block;
pub mod hasher;

pub use block::Block;
pub use hasher::{ContentHasher, HasherError};
