//! kargo: run a downloaded binary as a ReplicaSet, then scale, tail and
//! tear it down again.

pub mod cli;
pub mod cluster;
pub mod context;
