#![warn(clippy::all, rust_2018_idioms)]

mod app;
pub mod config;
pub mod download;
pub mod submit;
pub mod transport;

pub use app::DeckgenApp;
