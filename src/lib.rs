//! MusicMetrics pipeline library: explore, clean and load a music catalog,
//! and extract personal listening data from Spotify.

pub mod clean;
pub mod config;
pub mod error;
pub mod explore;
pub mod extract;
pub mod load;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod safety;
pub mod spotify;
pub mod store;
pub mod table;
