//! OEC: an IBM 3174 style establishment controller
//!
//! Attaches a coax connected IBM 3270 terminal and bridges it to a host
//! session. This crate provides:
//!
//! - `coax` and `interface`: the coax command vocabulary and the interface wrapper
//! - `device`, `display`, `keyboard`, `terminal`: the attached terminal
//! - `session`: TN3270 and VT100 host sessions
//! - `vt100`: a minimal VT100 emulator
//! - `pty`: Linux PTY management for VT100 host processes
//! - `controller`: the POLL loop tying it together
//! - `config`, `app`: configuration and process wiring for an embedding program

pub mod app;
pub mod coax;
pub mod config;
pub mod controller;
pub mod device;
pub mod display;
pub mod ebcdic;
pub mod interface;
pub mod keyboard;
pub mod pty;
pub mod selector;
pub mod session;
pub mod terminal;
pub mod vt100;

#[cfg(test)]
mod mock;
