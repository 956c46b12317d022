pub mod actions;
pub mod compilation;
pub mod config;
pub mod db;
pub mod inventory;
pub mod layout;
pub mod pool;
pub mod query;
pub mod scanner;
pub mod schedule;

/// Extensions counted as music (the `music_files` view uses the same list)
pub const MUSIC_EXTENSIONS: &[&str] = &["mp3", "ogg", "m4a", "m4b", "m4p"];

/// Application name for XDG paths
pub const APP_NAME: &str = "filescanner";
