#![no_std]
//! Blocking driver for AT-command ESP8266-class WiFi modems on a serial
//! line (115200 baud 8N1).
//!
//! The heart of the crate is the AT-protocol engine: a byte-at-a-time
//! receive state machine run from the UART interrupt, a one-byte-per-
//! callback transmit pump, and a sticky event latch that lets one blocked
//! client task wait out each step of a command with a deadline.
//!
//! ## Wiring
//! The application places a [`WifiState`] in a static, implements the
//! [`port`] traits for its kernel and HAL, and calls [`split`]:
//!
//! ```ignore
//! static STATE: WifiState<Rtos> = WifiState::new();
//!
//! let (mut wifi, mut isr) = esp8266_wifi::split(&STATE, uart, pins, on_data);
//! // Route the UART interrupt callbacks to `isr.on_rx` / `isr.on_tx` /
//! // `isr.on_error`, then drive the modem from one task:
//! wifi.init()?;
//! wifi.network_connect("ssid", "password")?;
//! wifi.server_connect("example.com", 80)?;
//! wifi.transmit(b"hello")?;
//! ```
//!
//! ## Execution model
//! Exactly two contexts run driver code: one client task at a time and the
//! UART interrupt. The interrupt never blocks and never allocates; the
//! task blocks only on the kernel's wait primitive. A `critical-section`
//! implementation must be present (most HALs provide one; host tests use
//! the `std` feature of the `critical-section` crate).
//!
//! ## Non-goals
//! No TLS, no multi-link (`AT+CIPMUX`), no reconnect policy, no outbound
//! buffering beyond the single in-flight send. Inbound payload bytes are
//! delivered to the receive sink verbatim, one at a time, in interrupt
//! context.

#[cfg(test)]
extern crate std;

pub mod error;
pub mod port;

mod driver;
mod event;
mod link;
mod parser;
mod transmit;

pub use driver::{split, ReceiveSink, Wifi, WifiIsr, WifiState, MAX_TRANSMIT};
pub use error::{Error, Result};
pub use link::VersionInfo;
