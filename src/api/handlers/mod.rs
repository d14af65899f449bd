//! API request handlers

pub mod console;
pub mod containers;
pub mod health;
pub mod images;
