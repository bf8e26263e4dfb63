//! Command coordination and modem lifecycle.
//!
//! One client task at a time drives the modem through [`Wifi`]; the UART
//! interrupt handlers feed [`WifiIsr`]. Both halves share a [`WifiState`]
//! placed in a static by the embedding application.
//!
//! Every command is the same shape: clear the event latch, push an AT line
//! through the transmit pump, then block on the latch for the flags that
//! settle the command, step by step, each step with its own deadline.

use core::cell::RefCell;
use core::fmt::Write as _;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::{String, Vec};

use crate::error::{Error, Result};
use crate::event::{Event, EventLatch, EventMask};
use crate::link::{LinkStatus, VersionInfo, VersionWords};
use crate::parser::Parser;
use crate::port::{Kernel, WifiPins, WifiUart};
use crate::transmit::{TxShared, MAX_SEGMENTS};

/// Largest payload a single `AT+CIPSEND` accepts.
pub const MAX_TRANSMIT: usize = 1024;

const BAUD: u32 = 115_200;

const COMMAND_FAILURES: EventMask = EventMask::of(Event::Error).with(Event::Fail);

const JOIN_FAILURES: EventMask = EventMask::of(Event::ConnectionTimeout)
	.with(Event::ConnectionWrongPassword)
	.with(Event::ConnectionMissingAp)
	.with(Event::ConnectionFailed)
	.with(Event::AlreadyConnected)
	.with(Event::WifiDisconnect);

const CONNECT_FAILURES: EventMask = EventMask::of(Event::ConnectionTimeout)
	.with(Event::ConnectionWrongPassword)
	.with(Event::ConnectionMissingAp)
	.with(Event::ConnectionFailed)
	.with(Event::WifiDisconnect)
	.with(Event::Closed)
	.with(Event::DnsFail);

/// Called once per inbound TCP payload byte, in interrupt context.
pub type ReceiveSink = fn(u8);

fn discard_sink(_byte: u8) {}

/// Driver state shared between the task and ISR halves.
///
/// Place one in a static (a `static_cell::StaticCell` works well) and hand
/// it to [`split`].
pub struct WifiState<K: Kernel> {
	pub(crate) latch: EventLatch<K>,
	pub(crate) link: LinkStatus,
	pub(crate) versions: VersionWords,
	pub(crate) tx: TxShared,
	parser: Mutex<CriticalSectionRawMutex, RefCell<Parser>>,
}

impl<K: Kernel> WifiState<K> {
	pub const fn new() -> Self {
		Self {
			latch: EventLatch::new(),
			link: LinkStatus::new(),
			versions: VersionWords::new(),
			tx: TxShared::new(),
			parser: Mutex::new(RefCell::new(Parser::new())),
		}
	}
}

impl<K: Kernel> Default for WifiState<K> {
	fn default() -> Self {
		Self::new()
	}
}

/// Split shared state into the blocking task half and the interrupt half.
///
/// # Arguments
/// * `state` - Shared driver state, typically in a static
/// * `uart` - Modem UART lifecycle control
/// * `pins` - ENABLE / BOOT_MODE / RESET outputs
/// * `sink` - Receiver for inbound TCP payload bytes; use
///   [`Wifi::DISCARD_SINK`] to drop them
pub fn split<K, U, P>(
	state: &'static WifiState<K>,
	uart: U,
	pins: P,
	sink: ReceiveSink,
) -> (Wifi<K, U, P>, WifiIsr<K>)
where
	K: Kernel,
	U: WifiUart,
	P: WifiPins,
{
	(
		Wifi { state, uart, pins },
		WifiIsr { state, sink },
	)
}

/// Interrupt half: wire these three methods to the UART interrupt
/// handlers. They never block and never allocate.
pub struct WifiIsr<K: Kernel + 'static> {
	state: &'static WifiState<K>,
	sink: ReceiveSink,
}

impl<K: Kernel + 'static> WifiIsr<K> {
	/// Feed one received byte to the protocol engine.
	pub fn on_rx(&mut self, byte: u8) {
		self.state
			.parser
			.lock(|parser| parser.borrow_mut().feed(byte, self.state, self.sink));
	}

	/// Fetch the next outbound byte, or `None` when the pump is idle.
	pub fn on_tx(&mut self) -> Option<u8> {
		let (byte, drained) = self.state.tx.next_byte()?;
		if drained {
			// Wake the submitter; a drain latches no event.
			self.state.latch.wake();
		}
		Some(byte)
	}

	/// UART error notification. Advisory: counted, never fails the
	/// in-flight command on its own.
	pub fn on_error(&mut self, _status: u32) {
		self.state.link.count_error();
	}
}

/// Task half: lifecycle, link management, and data transfer.
///
/// All methods block the calling task; exactly one task may use the driver
/// at a time.
pub struct Wifi<K: Kernel + 'static, U: WifiUart, P: WifiPins> {
	state: &'static WifiState<K>,
	uart: U,
	pins: P,
}

impl<K: Kernel + 'static, U: WifiUart, P: WifiPins> Wifi<K, U, P> {
	/// Sink that drops inbound payload bytes.
	pub const DISCARD_SINK: ReceiveSink = discard_sink;

	/// Power-cycle the modem and run the handshake batch.
	///
	/// Drives the reset sequence (boot-mode high, reset released after
	/// 10 ms, one second of boot time), brings the UART up at 115200 8N1,
	/// then pings the modem, disables command echo, disables automatic
	/// reconnect, and selects normal transfer mode.
	///
	/// # Errors
	/// Returns the first handshake step's error; the modem is left
	/// powered but unconfigured.
	pub fn init(&mut self) -> Result<()> {
		if self.uart.is_init() {
			self.uart.deinit();
		}

		self.pins.setup();
		self.pins.set_enable(false);
		self.pins.set_boot_mode(false);
		self.pins.set_reset(false);

		self.state.tx.clear();
		self.state.link.reset();
		self.state.parser.lock(|parser| parser.borrow_mut().reset());

		self.pins.set_boot_mode(true);
		self.pins.set_reset(false);
		self.pins.set_enable(true);
		K::delay_ms(10);

		self.pins.set_reset(true);
		K::delay_ms(990);

		self.uart.init(BAUD);

		self.command(b"AT", "ping", 100)?;
		self.command(b"ATE0", "disable_echo", 1000)?;
		self.command(b"AT+CWAUTOCONN=0", "manual_connect", 1000)?;
		self.command(b"AT+CIPMODE=0", "transfer_mode", 1000)?;
		Ok(())
	}

	/// Tear the UART down and park the modem pins low.
	pub fn deinit(&mut self) {
		self.uart.deinit();

		self.pins.set_enable(false);
		self.pins.set_boot_mode(false);
		self.pins.set_reset(false);
		self.pins.teardown();
	}

	/// Whether the driver has been initialized.
	pub fn is_init(&self) -> bool {
		self.uart.is_init()
	}

	/// Query firmware versions (`AT+GMR`).
	///
	/// The version words are decoded by the receive engine as the reply
	/// streams in; this returns the snapshot once the modem says `OK`.
	pub fn get_version(&mut self) -> Result<VersionInfo> {
		self.command(b"AT+GMR", "get_version", 1000)?;
		Ok(self.state.versions.snapshot())
	}

	/// Join an access point.
	///
	/// Disconnects from any current access point first, then waits in
	/// turn for command acknowledgement, association, and an IP address.
	///
	/// # Errors
	/// `Error::AtCommand` on any modem-reported failure (bad password,
	/// missing AP, dropped association), `Error::Timeout` if a step's
	/// deadline expires.
	pub fn network_connect(&mut self, ssid: &str, password: &str) -> Result<()> {
		self.network_disconnect();

		let state = self.state;
		state.latch.begin();
		self.submit(&[
			b"AT+CWJAP_CUR=\"",
			ssid.as_bytes(),
			b"\",\"",
			password.as_bytes(),
			b"\"",
		]);
		let result = state
			.latch
			.wait("network_connect_ack", 30_000, EventMask::of(Event::Ok), COMMAND_FAILURES)
			.and_then(|_| {
				state.latch.wait(
					"network_connect_join",
					30_000,
					EventMask::of(Event::WifiConnected),
					JOIN_FAILURES,
				)
			})
			.and_then(|_| {
				state.latch.wait(
					"network_connect_ip",
					30_000,
					EventMask::of(Event::WifiGotIp),
					JOIN_FAILURES,
				)
			});
		state.latch.end();
		result
	}

	/// Leave the access point, if associated. Best effort; outcomes are
	/// only logged.
	pub fn network_disconnect(&mut self) {
		let state = self.state;
		state.latch.begin();
		if state.link.is_associated() {
			self.submit(&[b"AT+CWQAP"]);
			let _ = state
				.latch
				.wait("network_disconnect_ack", 1000, EventMask::of(Event::Ok), COMMAND_FAILURES)
				.and_then(|_| {
					state.latch.wait(
						"network_disconnect_drop",
						1000,
						EventMask::of(Event::WifiDisconnect),
						EventMask::NONE,
					)
				});
		}
		state.latch.end();
	}

	/// Whether the modem is associated and holds an IP address.
	pub fn is_network_connected(&self) -> bool {
		self.state.link.is_network_connected()
	}

	/// Open a TCP connection to `host:port`.
	///
	/// Closes any open connection first. `host` may be a hostname (the
	/// modem resolves it) or a dotted address.
	pub fn server_connect(&mut self, host: &str, port: u16) -> Result<()> {
		self.server_disconnect();

		let mut digits: String<5> = String::new();
		let _ = write!(&mut digits, "{}", port);

		let state = self.state;
		state.latch.begin();
		self.submit(&[
			b"AT+CIPSTART=\"TCP\",\"",
			host.as_bytes(),
			b"\",",
			digits.as_bytes(),
		]);
		let result = state
			.latch
			.wait("server_connect_ack", 30_000, EventMask::of(Event::Ok), COMMAND_FAILURES)
			.and_then(|_| {
				state.latch.wait(
					"server_connect_link",
					30_000,
					EventMask::of(Event::Connect),
					CONNECT_FAILURES,
				)
			});
		state.latch.end();
		result
	}

	/// Close the TCP connection, if open. Best effort; outcomes are only
	/// logged.
	pub fn server_disconnect(&mut self) {
		let state = self.state;
		state.latch.begin();
		if state.link.is_tcp_open() {
			self.submit(&[b"AT+CIPCLOSE"]);
			let _ = state
				.latch
				.wait("server_disconnect_ack", 1000, EventMask::of(Event::Ok), COMMAND_FAILURES)
				.and_then(|_| {
					state.latch.wait(
						"server_disconnect_drop",
						1000,
						EventMask::of(Event::Closed),
						EventMask::NONE,
					)
				});
		}
		state.latch.end();
	}

	/// Whether a TCP connection is open.
	pub fn is_server_connected(&self) -> bool {
		self.state.link.is_tcp_open()
	}

	/// Send `data` over the open TCP connection.
	///
	/// The payload is limited to [`MAX_TRANSMIT`] bytes; the flow is
	/// `AT+CIPSEND=<n>`, the `>` prompt, the raw bytes, then the modem's
	/// receive acknowledgement and `SEND OK`.
	///
	/// # Errors
	/// `Error::PayloadSize` without touching the modem if `data` is empty
	/// or oversized; otherwise the first failing step's error.
	pub fn transmit(&mut self, data: &[u8]) -> Result<()> {
		if data.is_empty() || data.len() > MAX_TRANSMIT {
			return Err(Error::PayloadSize);
		}

		let mut digits: String<5> = String::new();
		let _ = write!(&mut digits, "{}", data.len());

		let state = self.state;
		state.latch.begin();
		self.submit(&[b"AT+CIPSEND=", digits.as_bytes()]);
		let result = state
			.latch
			.wait("transmit_ack", 10_000, EventMask::of(Event::Ok), COMMAND_FAILURES)
			.and_then(|_| {
				state.latch.wait(
					"transmit_prompt",
					10_000,
					EventMask::of(Event::GoAhead),
					COMMAND_FAILURES,
				)
			})
			.and_then(|_| {
				self.submit_raw(data);
				state.latch.wait(
					"transmit_recv",
					10_000,
					EventMask::of(Event::BytesReceived),
					COMMAND_FAILURES,
				)
			})
			.and_then(|_| {
				state.latch.wait(
					"transmit_sent",
					10_000,
					EventMask::of(Event::SendOk),
					COMMAND_FAILURES.with(Event::SendFail),
				)
			});
		state.latch.end();
		result
	}

	/// Outbound segments the modem has acknowledged but not yet settled.
	/// Diagnostic.
	pub fn segment_count(&self) -> u32 {
		self.state.link.segment_count()
	}

	/// UART error callbacks observed since init. Diagnostic.
	pub fn error_count(&self) -> u32 {
		self.state.link.error_count()
	}

	/// Send one AT line and wait for `OK`.
	fn command(&mut self, line: &[u8], action: &'static str, timeout_ms: u32) -> Result<()> {
		let state = self.state;
		state.latch.begin();
		self.submit(&[line]);
		let result = state
			.latch
			.wait(action, timeout_ms, EventMask::of(Event::Ok), COMMAND_FAILURES);
		state.latch.end();
		result
	}

	/// Queue the line segments plus CRLF and block until the interrupt
	/// drains them.
	fn submit(&mut self, segments: &[&[u8]]) {
		let mut parts: Vec<&[u8], MAX_SEGMENTS> = Vec::new();
		for &segment in segments {
			let _ = parts.push(segment);
		}
		let _ = parts.push(b"\r\n");

		let state = self.state;
		state.tx.start_text(&parts);
		self.uart.ensure_transmit();
		while state.tx.is_busy() {
			K::take();
		}
	}

	/// Queue a raw payload and block until the interrupt drains it.
	fn submit_raw(&mut self, data: &[u8]) {
		if data.is_empty() {
			return;
		}
		let state = self.state;
		state.tx.start_raw(data);
		self.uart.ensure_transmit();
		while state.tx.is_busy() {
			K::take();
		}
	}
}
