//! Components shared by the unit tests: mocked collaborators, an in-memory
//! cluster for multi-participant scenarios and logging setup.
mod common;
mod mock_builder;
mod mock_type_config;
mod sim_cluster;

pub use common::*;
pub use mock_builder::*;
pub use mock_type_config::*;
pub use sim_cluster::*;
