//! TUI debugger for the Octet emulator.
//!
//! Provides an interactive terminal-based debugger with:
//! - Real-time register and flags visualization
//! - Memory view with scrolling
//! - Step/run/breakpoint controls
//! - Disassembly and program output views

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
