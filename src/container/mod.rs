//! Container management module for Dockside
//!
//! Handles all lifecycle interactions with the container engine:
//! - Listing images and containers
//! - Starting, stopping and removing containers
//! - Sampling resource usage
//! - Provisioning the Anaconda development container

mod error;
mod manager;
pub mod ports;
pub mod stats;

pub use error::{ContainerError, PortRole};
pub use manager::ContainerManager;
