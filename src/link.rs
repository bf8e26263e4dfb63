//! Link status and firmware version words published by the receive ISR.
//!
//! The ISR is the only writer; the client task reads snapshots through the
//! query methods. `WIFI DISCONNECT` and `no ip` clear the dependent flags
//! in the same interrupt that parses them, so the invariant
//! "has IP implies associated" holds at every observation point.

use core::fmt;

use portable_atomic::{AtomicBool, AtomicU32, Ordering};

/// Connection state as last reported by the modem.
pub(crate) struct LinkStatus {
	wifi_associated: AtomicBool,
	wifi_has_ip: AtomicBool,
	tcp_open: AtomicBool,
	/// Outbound segments acknowledged as received but not yet settled.
	segments: AtomicU32,
	/// UART error callbacks observed. Advisory only.
	uart_errors: AtomicU32,
}

impl LinkStatus {
	pub(crate) const fn new() -> Self {
		Self {
			wifi_associated: AtomicBool::new(false),
			wifi_has_ip: AtomicBool::new(false),
			tcp_open: AtomicBool::new(false),
			segments: AtomicU32::new(0),
			uart_errors: AtomicU32::new(0),
		}
	}

	pub(crate) fn reset(&self) {
		self.wifi_associated.store(false, Ordering::Release);
		self.wifi_has_ip.store(false, Ordering::Release);
		self.tcp_open.store(false, Ordering::Release);
		self.segments.store(0, Ordering::Release);
		self.uart_errors.store(0, Ordering::Release);
	}

	pub(crate) fn on_wifi_connected(&self) {
		self.wifi_associated.store(true, Ordering::Release);
	}

	pub(crate) fn on_wifi_disconnect(&self) {
		self.wifi_associated.store(false, Ordering::Release);
		self.wifi_has_ip.store(false, Ordering::Release);
		self.tcp_open.store(false, Ordering::Release);
	}

	pub(crate) fn on_got_ip(&self) {
		self.wifi_has_ip.store(true, Ordering::Release);
	}

	/// `no ip`: the address is gone but the association may survive.
	pub(crate) fn on_no_ip(&self) {
		self.wifi_has_ip.store(false, Ordering::Release);
		self.tcp_open.store(false, Ordering::Release);
	}

	pub(crate) fn on_tcp_connect(&self) {
		self.tcp_open.store(true, Ordering::Release);
	}

	pub(crate) fn on_tcp_closed(&self) {
		self.tcp_open.store(false, Ordering::Release);
	}

	pub(crate) fn is_associated(&self) -> bool {
		self.wifi_associated.load(Ordering::Acquire)
	}

	pub(crate) fn is_network_connected(&self) -> bool {
		self.wifi_associated.load(Ordering::Acquire) && self.wifi_has_ip.load(Ordering::Acquire)
	}

	pub(crate) fn is_tcp_open(&self) -> bool {
		self.tcp_open.load(Ordering::Acquire)
	}

	pub(crate) fn add_segment(&self) {
		self.segments.fetch_add(1, Ordering::AcqRel);
	}

	/// `<n>,SEND OK`: one segment settled.
	pub(crate) fn settle_segment(&self) {
		self.segments.fetch_sub(1, Ordering::AcqRel);
	}

	pub(crate) fn segment_count(&self) -> u32 {
		self.segments.load(Ordering::Acquire)
	}

	pub(crate) fn count_error(&self) {
		self.uart_errors.fetch_add(1, Ordering::AcqRel);
	}

	pub(crate) fn error_count(&self) -> u32 {
		self.uart_errors.load(Ordering::Acquire)
	}
}

/// Firmware versions reported by `AT+GMR`, four dotted components packed
/// big-endian into one word each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VersionInfo {
	/// `AT version:` line.
	pub at: u32,
	/// `SDK version:` line.
	pub sdk: u32,
}

impl fmt::Display for VersionInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"AT {}.{}.{}.{} / SDK {}.{}.{}.{}",
			self.at >> 24 & 0xff,
			self.at >> 16 & 0xff,
			self.at >> 8 & 0xff,
			self.at & 0xff,
			self.sdk >> 24 & 0xff,
			self.sdk >> 16 & 0xff,
			self.sdk >> 8 & 0xff,
			self.sdk & 0xff,
		)
	}
}

/// Version accumulators written component by component as the parser scans
/// the `AT+GMR` response.
pub(crate) struct VersionWords {
	at: AtomicU32,
	sdk: AtomicU32,
}

impl VersionWords {
	pub(crate) const fn new() -> Self {
		Self {
			at: AtomicU32::new(0),
			sdk: AtomicU32::new(0),
		}
	}

	pub(crate) fn reset_at(&self) {
		self.at.store(0, Ordering::Release);
	}

	pub(crate) fn reset_sdk(&self) {
		self.sdk.store(0, Ordering::Release);
	}

	pub(crate) fn shift_at(&self, component: u8) {
		let word = self.at.load(Ordering::Acquire);
		self.at.store(word << 8 | component as u32, Ordering::Release);
	}

	pub(crate) fn shift_sdk(&self, component: u8) {
		let word = self.sdk.load(Ordering::Acquire);
		self.sdk.store(word << 8 | component as u32, Ordering::Release);
	}

	pub(crate) fn snapshot(&self) -> VersionInfo {
		VersionInfo {
			at: self.at.load(Ordering::Acquire),
			sdk: self.sdk.load(Ordering::Acquire),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn disconnect_clears_ip_and_tcp() {
		let link = LinkStatus::new();
		link.on_wifi_connected();
		link.on_got_ip();
		link.on_tcp_connect();
		assert!(link.is_network_connected());
		assert!(link.is_tcp_open());

		link.on_wifi_disconnect();
		assert!(!link.is_associated());
		assert!(!link.is_network_connected());
		assert!(!link.is_tcp_open());
	}

	#[test]
	fn no_ip_keeps_association() {
		let link = LinkStatus::new();
		link.on_wifi_connected();
		link.on_got_ip();
		link.on_tcp_connect();

		link.on_no_ip();
		assert!(link.is_associated());
		assert!(!link.is_network_connected());
		assert!(!link.is_tcp_open());
	}

	#[test]
	fn version_components_pack_big_endian() {
		let words = VersionWords::new();
		words.shift_at(1);
		words.shift_at(2);
		words.shift_at(3);
		words.shift_at(4);
		assert_eq!(words.snapshot().at, 0x01020304);
	}

	#[test]
	fn version_display_unpacks_components() {
		let info = VersionInfo {
			at: 0x01020304,
			sdk: 0x02010000,
		};
		assert_eq!(
			std::format!("{}", info),
			"AT 1.2.3.4 / SDK 2.1.0.0"
		);
	}
}
