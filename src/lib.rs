pub mod config;
pub mod core;
pub mod game;
pub mod ui;
pub mod vfx;
