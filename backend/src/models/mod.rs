pub mod config;
pub mod error;
pub mod imaging;
pub mod perception;
pub mod tryon;
