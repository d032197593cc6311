//! Pure, deterministic logic: no filesystem or process access.

pub mod argv;
pub mod expand;
pub mod graph;
pub mod hashing;
pub mod invariants;
pub mod naming;
pub mod outputs;
pub mod template;
pub mod types;
pub mod validate;
