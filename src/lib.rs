//! GT-5x fingerprint image capture over serial.
//!
//! The sensor is driven by an Arduino sketch that prints status text, then a
//! tab byte, then the raw 160x120 grayscale plane. This crate turns that
//! stream into a 320x240 8-bit bitmap file.
//!
//! # Crate Structure
//!
//! - [`protocol`] — marker scanning, payload reception, trailer drain,
//!   GT-5x sensor packets
//! - [`image`] — geometry, 2x block upscaling, bitmap encoding and decoding
//! - [`capture`] — acquisition state machine and failure types
//! - [`settings`] — TOML settings file
//! - [`serial`] — serial port access (behind `serial` feature)

pub mod capture;
pub mod image;
pub mod protocol;
#[cfg(feature = "serial")]
pub mod serial;
pub mod settings;
