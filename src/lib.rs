//! msubstrate library crate — re-exports the four engines for integration tests and
//! for embedding the substrate in another tool's process instead of shelling out to
//! the CLI.

pub mod afs;
pub mod backup;
pub mod checksum;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod opm;
pub mod path_lock;
pub mod sge;
pub mod substrate;
pub mod telemetry;
