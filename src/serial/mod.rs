//! Serial port access for the sensor bridge
//!
//! This module provides functionality for:
//! - Listing available serial ports (Arduino boards, USB-to-serial adapters)
//! - Opening the bridge port with a per-read timeout

pub mod port;

pub use port::{PortConfig, SerialConnection};
