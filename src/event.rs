//! Sticky command-event latch shared between the receive ISR and the
//! client task.
//!
//! Each command clears the latch, then waits for specific events with a
//! deadline. Events latched by the ISR stay set until the next command
//! begins, so a flow that inspects several flags in sequence (join, then
//! got-IP) observes flags that arrived before it started waiting for them.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use portable_atomic::{AtomicU32, Ordering};

#[cfg(feature = "defmt")]
use defmt::warn;
#[cfg(not(feature = "defmt"))]
use log::warn;

use crate::error::{Error, Result};
use crate::port::Kernel;

/// Modem utterances a command can wait on. One latch bit each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Event {
	/// `OK`
	Ok,
	/// `ERROR`
	Error,
	/// `FAIL`
	Fail,
	/// `+CWJAP:1`
	ConnectionTimeout,
	/// `+CWJAP:2`
	ConnectionWrongPassword,
	/// `+CWJAP:3`
	ConnectionMissingAp,
	/// `+CWJAP:4`
	ConnectionFailed,
	/// `SEND OK`
	SendOk,
	/// `SEND FAIL`
	SendFail,
	/// `>` prompt during CIPSEND
	GoAhead,
	/// `ALREADY CONNECT`
	AlreadyConnected,
	/// `WIFI CONNECTED`
	WifiConnected,
	/// `WIFI DISCONNECT`
	WifiDisconnect,
	/// `WIFI GOT IP`
	WifiGotIp,
	/// `CLOSED`
	Closed,
	/// `CONNECT`
	Connect,
	/// `Recv <n> bytes`
	BytesReceived,
	/// `DNS Fail`
	DnsFail,
}

impl Event {
	pub(crate) const fn bit(self) -> u32 {
		1 << self as u32
	}
}

/// A set of events a wait step passes or fails on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct EventMask(u32);

impl EventMask {
	pub(crate) const NONE: EventMask = EventMask(0);

	pub(crate) const fn of(event: Event) -> Self {
		EventMask(event.bit())
	}

	pub(crate) const fn with(self, event: Event) -> Self {
		EventMask(self.0 | event.bit())
	}

	const fn union(self, other: EventMask) -> EventMask {
		EventMask(self.0 | other.0)
	}

	const fn matches(self, bits: u32) -> bool {
		self.0 & bits != 0
	}
}

/// Sticky event bitset plus the handle of the task running the current
/// command.
///
/// The ISR is the only writer of the bitset between `begin` and `end`; the
/// client task only reads it. The task handle lives behind a critical
/// section because task handles are not word-sized on every kernel.
pub(crate) struct EventLatch<K: Kernel> {
	bits: AtomicU32,
	client: Mutex<CriticalSectionRawMutex, Cell<Option<K::Task>>>,
}

impl<K: Kernel> EventLatch<K> {
	pub(crate) const fn new() -> Self {
		Self {
			bits: AtomicU32::new(0),
			client: Mutex::new(Cell::new(None)),
		}
	}

	/// Clear the latch and take ownership for the calling task.
	///
	/// Exactly one command may be in flight; a second caller is a contract
	/// violation and panics.
	pub(crate) fn begin(&self) {
		let already_owned = self.client.lock(|client| {
			if client.get().is_some() {
				return true;
			}
			self.bits.store(0, Ordering::Release);
			client.set(Some(K::current_task()));
			false
		});
		assert!(!already_owned, "wifi command already in flight");
	}

	/// Release ownership. Latched bits stay readable until the next `begin`.
	pub(crate) fn end(&self) {
		self.client.lock(|client| client.set(None));
	}

	/// Latch `event` and wake the waiting task. ISR context.
	pub(crate) fn latch(&self, event: Event) {
		self.bits.fetch_or(event.bit(), Ordering::AcqRel);
		self.wake();
	}

	/// Wake the waiting task without latching anything. ISR context.
	///
	/// Used by the transmit pump when a job drains.
	pub(crate) fn wake(&self) {
		self.client.lock(|client| {
			if let Some(task) = client.get() {
				K::give_from_isr(task);
			}
		});
	}

	/// Block until a `pass` or `fail` event is latched or `timeout_ms`
	/// elapses.
	///
	/// The deadline is anchored once, at entry: spurious wakeups re-enter
	/// the block with the same deadline. Classification order is fail
	/// first, then pass, then timeout.
	pub(crate) fn wait(
		&self,
		action: &'static str,
		timeout_ms: u32,
		pass: EventMask,
		fail: EventMask,
	) -> Result<()> {
		let start = K::now();
		let monitored = pass.union(fail);
		while !monitored.matches(self.bits.load(Ordering::Acquire))
			&& K::take_until(start, timeout_ms)
		{}

		let bits = self.bits.load(Ordering::Acquire);
		if fail.matches(bits) {
			warn!("{} failed, events {}", action, bits);
			return Err(Error::AtCommand);
		}
		if !pass.matches(bits) {
			warn!("{} timed out, events {}", action, bits);
			return Err(Error::Timeout);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct InstantKernel;

	impl Kernel for InstantKernel {
		type Task = ();
		type Instant = u32;

		fn current_task() -> Self::Task {}
		fn now() -> u32 {
			0
		}
		fn take() {}
		fn take_until(_since: u32, _timeout_ms: u32) -> bool {
			// Deadline passes immediately; tests latch before waiting.
			false
		}
		fn give_from_isr(_task: Self::Task) {}
		fn delay_ms(_ms: u32) {}
	}

	type Latch = EventLatch<InstantKernel>;

	const PASS: EventMask = EventMask::of(Event::Ok);
	const FAIL: EventMask = EventMask::of(Event::Error).with(Event::Fail);

	#[test]
	fn latched_flag_satisfies_a_later_wait() {
		let latch = Latch::new();
		latch.begin();
		latch.latch(Event::Ok);
		assert_eq!(latch.wait("test", 100, PASS, FAIL), Ok(()));
		// Sticky: a second wait on the same flag still passes.
		assert_eq!(latch.wait("test", 100, PASS, FAIL), Ok(()));
		latch.end();
	}

	#[test]
	fn fail_flag_wins_over_pass_flag() {
		let latch = Latch::new();
		latch.begin();
		latch.latch(Event::Ok);
		latch.latch(Event::Error);
		assert_eq!(latch.wait("test", 100, PASS, FAIL), Err(Error::AtCommand));
		latch.end();
	}

	#[test]
	fn empty_latch_times_out() {
		let latch = Latch::new();
		latch.begin();
		assert_eq!(latch.wait("test", 100, PASS, FAIL), Err(Error::Timeout));
		latch.end();
	}

	#[test]
	fn unrelated_flags_do_not_satisfy_a_wait() {
		let latch = Latch::new();
		latch.begin();
		latch.latch(Event::WifiConnected);
		latch.latch(Event::GoAhead);
		assert_eq!(latch.wait("test", 100, PASS, FAIL), Err(Error::Timeout));
		latch.end();
	}

	#[test]
	fn begin_clears_leftover_flags() {
		let latch = Latch::new();
		latch.begin();
		latch.latch(Event::Ok);
		latch.end();

		latch.begin();
		assert_eq!(latch.wait("test", 100, PASS, FAIL), Err(Error::Timeout));
		latch.end();
	}

	#[test]
	#[should_panic(expected = "already in flight")]
	fn overlapping_commands_panic() {
		let latch = Latch::new();
		latch.begin();
		latch.begin();
	}
}
