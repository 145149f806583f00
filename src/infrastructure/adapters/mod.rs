//! Session adapters

pub mod console;

pub use console::ConsoleSession;
