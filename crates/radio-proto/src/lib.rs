pub mod config;
pub mod error;
pub mod favorites;
pub mod identify;
pub mod library;
pub mod pick;
pub mod platform;
pub mod protocol;
pub mod search;
