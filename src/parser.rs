//! Receive-side protocol engine.
//!
//! [`Parser::feed`] consumes exactly one byte per UART receive interrupt.
//! It never blocks, never allocates, and never backtracks; everything the
//! modem says is classified on the fly into event latches, link status
//! updates, version words, or payload bytes for the receive sink.
//!
//! ## Regimes
//! Each byte lands in one of three regimes:
//! 1. **Literal expectation** - a pending literal installed by an earlier
//!    dispatch byte must match verbatim; a mismatch abandons the line.
//! 2. **Bulk data** - `+IPD` payload bytes stream to the sink uninspected.
//! 3. **FSM dispatch** - a single match on the current state.
//!
//! A desynchronized stream parks the machine in `Invalid` until the next
//! CR or LF; the in-flight command's deadline is the safety net.

use crate::driver::WifiState;
use crate::event::Event;
use crate::port::Kernel;

#[cfg(feature = "defmt")]
use defmt::{error, info};
#[cfg(not(feature = "defmt"))]
use log::{error, info};

/// Receiver position, one tag per recognized token prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
	Initial,
	/// Desynchronized; waiting for CR or LF.
	Invalid,
	/// Streaming `+IPD` payload to the sink.
	ReadData,
	/// Discard through the end of the following line.
	IgnoreNextLine,
	/// Discard through the end of the current line.
	End,
	/// `A` seen: `AT`, `ALREADY CONNECT`, or the `Ai-Thinker` banner.
	A,
	AlreadyConnect,
	At,
	AtVersion,
	/// `busy ` seen, mode byte pending.
	Busy,
	BusyProcessing,
	BusySending,
	/// `C` seen: `CLOSED` or `CONNECT`.
	C,
	Closed,
	Connect,
	/// Digit run: `<n>,SEND OK` candidate.
	Digits,
	DigitsSendOk,
	DnsFail,
	Error,
	Fail,
	/// `+IPD,` seen, accumulating the payload length.
	IpdLength,
	/// `+CWJAP:` seen, reason digit pending.
	JoinFailReason,
	NoIp,
	Ok,
	/// `+` seen: `+IPD` or `+C...`.
	Plus,
	PlusC,
	RecvDigits,
	RecvBytes,
	/// `S` seen: `SEND `, `SDK version:`, or `STATUS:`.
	S,
	SdkVersion,
	Send,
	SendFail,
	SendOk,
	/// `WIFI ` seen, event word pending.
	Wifi,
	WifiConnected,
	WifiDisconnect,
	WifiGotIp,
}

#[cfg(feature = "diagnostics")]
struct Diag {
	ring: [u8; 32],
	len: usize,
	last_valid: State,
	invalid_count: u32,
}

#[cfg(feature = "diagnostics")]
impl Diag {
	const fn new() -> Self {
		Self {
			ring: [0; 32],
			len: 0,
			last_valid: State::Invalid,
			invalid_count: 0,
		}
	}

	/// Accumulate bytes consumed while `Invalid` and emit one log line per
	/// burst, on recovery or when the ring fills.
	fn track(&mut self, x: u8, next: State) {
		if self.len > 0 && (next != State::Invalid || self.len + 2 >= self.ring.len()) {
			let text = core::str::from_utf8(&self.ring[..self.len]).unwrap_or("<binary>");
			error!(
				"invalid input after state {}: {}",
				self.last_valid as u8, text
			);
			self.len = 0;
		}
		if next != State::Invalid {
			self.last_valid = next;
		} else {
			self.ring[self.len] = x;
			self.len += 1;
			self.invalid_count = self.invalid_count.wrapping_add(1);
		}
	}
}

/// The receive finite-state machine. Owned by the driver, written only
/// from the receive interrupt.
pub(crate) struct Parser {
	state: State,
	/// Pending literal; while set, FSM dispatch is suppressed.
	expected: Option<&'static [u8]>,
	/// Digit accumulator for the current dotted version component.
	sub_version: u8,
	/// Payload bytes still owed to the sink while in `ReadData`.
	receive_length: u32,
	#[cfg(feature = "diagnostics")]
	diag: Diag,
}

impl Parser {
	pub(crate) const fn new() -> Self {
		Self {
			state: State::Initial,
			expected: None,
			sub_version: 0,
			receive_length: 0,
			#[cfg(feature = "diagnostics")]
			diag: Diag::new(),
		}
	}

	pub(crate) fn reset(&mut self) {
		*self = Self::new();
	}

	fn expect(&mut self, literal: &'static [u8]) {
		self.expected = Some(literal);
	}

	/// Consume one received byte.
	pub(crate) fn feed<K: Kernel>(&mut self, x: u8, shared: &WifiState<K>, sink: fn(u8)) {
		// Regime 1: a pending literal must match verbatim.
		if let Some(expected) = self.expected.take() {
			let head = expected[0];
			if x != head {
				error!(
					"expected byte {} got {} in state {}",
					head, x, self.state as u8
				);
				self.state = State::Invalid;
			} else if expected.len() > 1 {
				self.expected = Some(&expected[1..]);
			}
			return;
		}

		let next = match self.state {
			State::Invalid => match x {
				b'\r' | b'\n' => State::Initial,
				_ => State::Invalid,
			},

			State::End => match x {
				b'\n' => State::Initial,
				_ => State::End,
			},

			State::IgnoreNextLine => match x {
				b'\n' => State::End,
				_ => State::IgnoreNextLine,
			},

			// Regime 2: bulk data to the sink.
			State::ReadData => {
				sink(x);
				self.receive_length = self.receive_length.wrapping_sub(1);
				if self.receive_length == 0 {
					State::Initial
				} else {
					State::ReadData
				}
			}

			State::Initial => match x {
				b' ' | b'\r' | b'\n' | 0xfe | 0xff => State::Initial,
				b'>' => {
					shared.latch.latch(Event::GoAhead);
					State::Initial
				}
				b'+' => State::Plus,
				b'A' => State::A,
				b'B' => {
					self.expect(b"in version");
					State::End
				}
				b'b' => {
					self.expect(b"usy ");
					State::Busy
				}
				b'c' => {
					self.expect(b"ompile time");
					State::End
				}
				b'C' => State::C,
				b'D' => {
					self.expect(b"NS Fail");
					State::DnsFail
				}
				b'E' => {
					self.expect(b"RROR");
					State::Error
				}
				b'F' => {
					self.expect(b"AIL");
					State::Fail
				}
				b'n' => {
					self.expect(b"o ip");
					State::NoIp
				}
				b'O' => {
					self.expect(b"K");
					State::Ok
				}
				b'R' => {
					self.expect(b"ecv ");
					State::RecvDigits
				}
				b'S' => State::S,
				b'W' => {
					self.expect(b"IFI ");
					State::Wifi
				}
				b'0'..=b'9' => State::Digits,
				_ => State::Invalid,
			},

			State::Plus => match x {
				b'I' => {
					self.expect(b"PD,");
					self.receive_length = 0;
					State::IpdLength
				}
				b'C' => State::PlusC,
				_ => State::Invalid,
			},

			State::A => match x {
				b'T' => State::At,
				b'L' => {
					self.expect(b"READY CONNECT");
					State::AlreadyConnect
				}
				b'i' => {
					self.expect(b"-Thinker");
					State::IgnoreNextLine
				}
				_ => State::Invalid,
			},

			// `AT ` opens the version line; any other continuation is the
			// echo of our own command, discarded.
			State::At => {
				if x == b' ' {
					self.expect(b"version:");
					shared.versions.reset_at();
					self.sub_version = 0;
					State::AtVersion
				} else {
					State::End
				}
			}

			State::AtVersion => match x {
				b'0'..=b'9' => {
					self.sub_version = self.sub_version.wrapping_mul(10).wrapping_add(x - b'0');
					State::AtVersion
				}
				b'v' => State::AtVersion,
				b'.' => {
					shared.versions.shift_at(self.sub_version);
					self.sub_version = 0;
					State::AtVersion
				}
				b'(' | b'-' | b'\r' => {
					shared.versions.shift_at(self.sub_version);
					self.sub_version = 0;
					State::End
				}
				_ => State::Invalid,
			},

			State::AlreadyConnect => match x {
				b'\r' => {
					shared.latch.latch(Event::AlreadyConnected);
					State::End
				}
				_ => State::Invalid,
			},

			State::Busy => match x {
				b's' => {
					self.expect(b"...");
					State::BusySending
				}
				b'p' => {
					self.expect(b"...");
					State::BusyProcessing
				}
				_ => State::Invalid,
			},

			State::BusySending => {
				info!("busy sending, {} segments pending", shared.link.segment_count());
				match x {
					b'\r' => State::End,
					_ => State::Invalid,
				}
			}

			State::BusyProcessing => {
				info!("busy with command");
				match x {
					b'\r' => State::End,
					_ => State::Invalid,
				}
			}

			State::C => match x {
				b'L' => {
					self.expect(b"OSED");
					State::Closed
				}
				b'O' => {
					self.expect(b"NNECT");
					State::Connect
				}
				_ => State::Invalid,
			},

			State::Closed => match x {
				b'\r' => {
					shared.link.on_tcp_closed();
					shared.latch.latch(Event::Closed);
					State::End
				}
				_ => State::Invalid,
			},

			State::Connect => match x {
				b'\r' => {
					shared.link.on_tcp_connect();
					shared.latch.latch(Event::Connect);
					State::End
				}
				_ => State::Invalid,
			},

			State::DnsFail => match x {
				b'\r' => {
					shared.latch.latch(Event::DnsFail);
					State::End
				}
				_ => State::Invalid,
			},

			State::Error => match x {
				b'\r' => {
					shared.latch.latch(Event::Error);
					State::End
				}
				_ => State::Invalid,
			},

			State::Fail => match x {
				b'\r' => {
					shared.latch.latch(Event::Fail);
					State::End
				}
				_ => State::Invalid,
			},

			State::NoIp => match x {
				b'\r' => {
					shared.link.on_no_ip();
					State::End
				}
				_ => State::Invalid,
			},

			State::Ok => match x {
				b'\r' => {
					shared.latch.latch(Event::Ok);
					State::End
				}
				_ => State::Invalid,
			},

			State::RecvDigits => match x {
				b'0'..=b'9' => State::RecvDigits,
				b' ' => {
					self.expect(b"bytes");
					State::RecvBytes
				}
				_ => State::Invalid,
			},

			State::RecvBytes => match x {
				b'\r' => {
					shared.link.add_segment();
					shared.latch.latch(Event::BytesReceived);
					State::End
				}
				_ => State::Invalid,
			},

			State::S => match x {
				b'E' => {
					self.expect(b"ND ");
					State::Send
				}
				b'D' => {
					self.expect(b"K version:");
					shared.versions.reset_sdk();
					self.sub_version = 0;
					State::SdkVersion
				}
				b'T' => {
					self.expect(b"ATUS:");
					State::End
				}
				_ => State::Invalid,
			},

			State::Send => match x {
				b'O' => {
					self.expect(b"K");
					State::SendOk
				}
				b'F' => {
					self.expect(b"AIL");
					State::SendFail
				}
				_ => State::Invalid,
			},

			State::SendOk => match x {
				b'\r' => {
					shared.latch.latch(Event::SendOk);
					State::End
				}
				_ => State::Invalid,
			},

			State::SendFail => match x {
				b'\r' => {
					shared.latch.latch(Event::SendFail);
					State::End
				}
				_ => State::Invalid,
			},

			State::SdkVersion => match x {
				b'0'..=b'9' => {
					self.sub_version = self.sub_version.wrapping_mul(10).wrapping_add(x - b'0');
					State::SdkVersion
				}
				b'v' => State::SdkVersion,
				b'.' => {
					shared.versions.shift_sdk(self.sub_version);
					self.sub_version = 0;
					State::SdkVersion
				}
				b'(' | b'-' | b'\r' => {
					shared.versions.shift_sdk(self.sub_version);
					self.sub_version = 0;
					State::End
				}
				_ => State::Invalid,
			},

			State::IpdLength => match x {
				b'0'..=b'9' => {
					self.receive_length = self
						.receive_length
						.wrapping_mul(10)
						.wrapping_add((x - b'0') as u32);
					State::IpdLength
				}
				b':' => State::ReadData,
				_ => State::Invalid,
			},

			State::PlusC => match x {
				b'I' => State::End,
				b'W' => {
					self.expect(b"JAP:");
					State::JoinFailReason
				}
				_ => State::Invalid,
			},

			// The reason digit is terminal on its own; the rest of the
			// line is discarded. Unknown codes read as a timeout.
			State::JoinFailReason => {
				let event = match x {
					b'1' => Event::ConnectionTimeout,
					b'2' => Event::ConnectionWrongPassword,
					b'3' => Event::ConnectionMissingAp,
					b'4' => Event::ConnectionFailed,
					_ => Event::ConnectionTimeout,
				};
				shared.latch.latch(event);
				State::End
			}

			State::Wifi => match x {
				b'C' => {
					self.expect(b"ONNECTED");
					State::WifiConnected
				}
				b'D' => {
					self.expect(b"ISCONNECT");
					State::WifiDisconnect
				}
				b'G' => {
					self.expect(b"OT IP");
					State::WifiGotIp
				}
				_ => State::Invalid,
			},

			State::WifiConnected => match x {
				b'\r' => {
					shared.link.on_wifi_connected();
					shared.latch.latch(Event::WifiConnected);
					State::End
				}
				_ => State::Invalid,
			},

			State::WifiDisconnect => match x {
				b'\r' => {
					shared.link.on_wifi_disconnect();
					shared.latch.latch(Event::WifiDisconnect);
					State::End
				}
				_ => State::Invalid,
			},

			State::WifiGotIp => match x {
				b'\r' => {
					shared.link.on_got_ip();
					shared.latch.latch(Event::WifiGotIp);
					State::End
				}
				_ => State::Invalid,
			},

			State::Digits => match x {
				b'0'..=b'9' => State::Digits,
				b',' => {
					self.expect(b"SEND OK");
					State::DigitsSendOk
				}
				_ => State::Invalid,
			},

			State::DigitsSendOk => match x {
				b'\r' => {
					shared.link.settle_segment();
					State::End
				}
				_ => State::Invalid,
			},
		};

		#[cfg(feature = "diagnostics")]
		self.diag.track(x, next);

		self.state = next;
	}
}
