//! Core of the Data Hub: an in-process clearinghouse mediating timestamped
//! data between producers and consumers on an edge device.
//!
//! Provides the data sample model ([`sample`]), the hierarchical resource
//! tree ([`tree`]), the routing/filtering/push engine ([`hub`]), Observation
//! buffer backups ([`backup`]), and hub configuration ([`config`]).

pub mod backup;
pub mod config;
pub mod error;
pub mod hub;
pub mod resource;
pub mod sample;
pub mod tree;

pub use error::{HubError, Result};
pub use hub::DataHub;
