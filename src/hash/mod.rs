//! Weak and strong hashing for block matching
//!
//! The weak checksum is a cheap rolling hash used to find candidate
//! blocks while sliding a window one byte at a time; the strong hash
//! confirms candidates so weak collisions never corrupt a transfer.

pub mod rolling;
pub mod strong;

pub use rolling::RollingChecksum;
pub use strong::StrongHash;
