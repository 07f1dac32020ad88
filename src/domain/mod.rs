pub mod debounce;
pub mod fusion;
pub mod models;
pub mod motion;
pub mod settings;
