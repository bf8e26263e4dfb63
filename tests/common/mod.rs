//! Scripted single-threaded simulation of the kernel, UART, and GPIO.
//!
//! A test queues a script of expected transmit lines, modem replies, and
//! virtual delays, then drives the public API. Transmits are checked the
//! moment the driver asks the UART to send; replies and delays are played
//! back while the driver blocks inside the kernel wait primitive, exactly
//! where a real interrupt would preempt the task. The virtual clock only
//! advances through delays and expired deadlines, so timeout paths run
//! instantly.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use esp8266_wifi::port::{Kernel, WifiPins, WifiUart};
use esp8266_wifi::{split, Wifi, WifiIsr, WifiState};

enum Step {
	/// The driver must transmit exactly these bytes next.
	Expect(Vec<u8>),
	/// The modem sends these bytes while the driver waits.
	Receive(Vec<u8>),
	/// The clock advances while the driver waits.
	Delay(u64),
}

struct Sim {
	now: Cell<u64>,
	/// Outstanding ISR wakeups not yet consumed by a wait.
	pending: Cell<u32>,
	steps: RefCell<VecDeque<Step>>,
	isr: RefCell<Option<WifiIsr<SimKernel>>>,
	/// Bytes delivered to the receive sink.
	received: RefCell<Vec<u8>>,
	uart_on: Cell<bool>,
	baud: Cell<u32>,
	pins_setup: Cell<bool>,
	enable: Cell<bool>,
	boot_mode: Cell<bool>,
	reset: Cell<bool>,
}

impl Sim {
	fn new() -> Self {
		Self {
			now: Cell::new(0),
			pending: Cell::new(0),
			steps: RefCell::new(VecDeque::new()),
			isr: RefCell::new(None),
			received: RefCell::new(Vec::new()),
			uart_on: Cell::new(false),
			baud: Cell::new(0),
			pins_setup: Cell::new(false),
			enable: Cell::new(false),
			boot_mode: Cell::new(false),
			reset: Cell::new(false),
		}
	}
}

thread_local! {
	static SIM: Sim = Sim::new();
}

/// Build a fresh driver wired to the simulator. Call first in every test.
pub fn setup() -> Wifi<SimKernel, SimUart, SimPins> {
	SIM.with(|sim| {
		sim.now.set(0);
		sim.pending.set(0);
		sim.steps.borrow_mut().clear();
		sim.received.borrow_mut().clear();
		sim.uart_on.set(false);
		sim.baud.set(0);
		sim.pins_setup.set(false);
		sim.enable.set(false);
		sim.boot_mode.set(false);
		sim.reset.set(false);
		*sim.isr.borrow_mut() = None;
	});

	// Each test leaks one state block; tests are short-lived processes.
	let state: &'static WifiState<SimKernel> = Box::leak(Box::new(WifiState::new()));
	let (wifi, isr) = split(state, SimUart, SimPins, capture_sink);
	SIM.with(|sim| *sim.isr.borrow_mut() = Some(isr));
	wifi
}

pub fn expect_transmit(text: &str) {
	SIM.with(|sim| {
		sim.steps
			.borrow_mut()
			.push_back(Step::Expect(text.as_bytes().to_vec()))
	});
}

pub fn expect_transmit_bytes(bytes: &[u8]) {
	SIM.with(|sim| sim.steps.borrow_mut().push_back(Step::Expect(bytes.to_vec())));
}

pub fn receive(text: &str) {
	SIM.with(|sim| {
		sim.steps
			.borrow_mut()
			.push_back(Step::Receive(text.as_bytes().to_vec()))
	});
}

pub fn add_delay(ms: u64) {
	SIM.with(|sim| sim.steps.borrow_mut().push_back(Step::Delay(ms)));
}

/// Feed bytes straight into the receive interrupt, outside any wait.
pub fn inject_rx(bytes: &[u8]) {
	deliver_rx(bytes);
}

/// Raise the UART error callback.
pub fn inject_error(status: u32) {
	SIM.with(|sim| {
		let mut isr = sim.isr.borrow_mut();
		let isr = isr.as_mut().expect("driver not set up");
		isr.on_error(status);
	});
}

/// Everything the receive sink has been handed so far.
pub fn received() -> Vec<u8> {
	SIM.with(|sim| sim.received.borrow().clone())
}

/// (enable, boot_mode, reset) pin levels.
pub fn pin_levels() -> (bool, bool, bool) {
	SIM.with(|sim| (sim.enable.get(), sim.boot_mode.get(), sim.reset.get()))
}

pub fn pins_configured() -> bool {
	SIM.with(|sim| sim.pins_setup.get())
}

pub fn uart_baud() -> u32 {
	SIM.with(|sim| sim.baud.get())
}

/// Assert the whole script was consumed.
pub fn assert_script_done() {
	let remaining = SIM.with(|sim| sim.steps.borrow().len());
	assert_eq!(remaining, 0, "{} scripted steps never ran", remaining);
}

fn capture_sink(byte: u8) {
	SIM.with(|sim| sim.received.borrow_mut().push(byte));
}

fn deliver_rx(bytes: &[u8]) {
	SIM.with(|sim| {
		let mut isr = sim.isr.borrow_mut();
		let isr = isr.as_mut().expect("driver not set up");
		for &byte in bytes {
			isr.on_rx(byte);
		}
	});
}

/// Play scripted receive/delay steps until a wakeup is available or the
/// deadline passes. Expected-transmit steps block playback: if the driver
/// waits for a reply it can only earn by transmitting first, the script
/// has deadlocked and the wait times out.
fn pump_until_wake(deadline: Option<u64>) -> bool {
	loop {
		let pending = SIM.with(|sim| sim.pending.get());
		if pending > 0 {
			SIM.with(|sim| sim.pending.set(pending - 1));
			return true;
		}

		if let Some(deadline) = deadline {
			if SIM.with(|sim| sim.now.get()) >= deadline {
				return false;
			}
		}

		let step = SIM.with(|sim| {
			let mut steps = sim.steps.borrow_mut();
			match steps.front() {
				Some(Step::Receive(_)) | Some(Step::Delay(_)) => steps.pop_front(),
				_ => None,
			}
		});

		match step {
			Some(Step::Receive(bytes)) => deliver_rx(&bytes),
			Some(Step::Delay(ms)) => SIM.with(|sim| sim.now.set(sim.now.get() + ms)),
			_ => match deadline {
				Some(deadline) => {
					SIM.with(|sim| sim.now.set(deadline));
					return false;
				}
				None => panic!("deadlocked waiting for a wakeup with no script left"),
			},
		}
	}
}

pub struct SimKernel;

impl Kernel for SimKernel {
	type Task = ();
	type Instant = u64;

	fn current_task() -> Self::Task {}

	fn now() -> u64 {
		SIM.with(|sim| sim.now.get())
	}

	fn take() {
		if !pump_until_wake(None) {
			unreachable!();
		}
	}

	fn take_until(since: u64, timeout_ms: u32) -> bool {
		pump_until_wake(Some(since + timeout_ms as u64))
	}

	fn give_from_isr(_task: ()) {
		SIM.with(|sim| sim.pending.set(sim.pending.get() + 1));
	}

	fn delay_ms(ms: u32) {
		SIM.with(|sim| sim.now.set(sim.now.get() + ms as u64));
	}
}

pub struct SimUart;

impl WifiUart for SimUart {
	fn init(&mut self, baud: u32) {
		SIM.with(|sim| {
			sim.uart_on.set(true);
			sim.baud.set(baud);
		});
	}

	fn deinit(&mut self) {
		SIM.with(|sim| sim.uart_on.set(false));
	}

	fn is_init(&self) -> bool {
		SIM.with(|sim| sim.uart_on.get())
	}

	/// Drain the pump synchronously, one byte per callback as the
	/// hardware would, and check the result against the script.
	fn ensure_transmit(&mut self) {
		let mut out = Vec::new();
		SIM.with(|sim| {
			let mut isr = sim.isr.borrow_mut();
			let isr = isr.as_mut().expect("driver not set up");
			while let Some(byte) = isr.on_tx() {
				out.push(byte);
			}
		});
		assert!(!out.is_empty(), "ensure_transmit with an idle pump");

		let step = SIM.with(|sim| sim.steps.borrow_mut().pop_front());
		match step {
			Some(Step::Expect(expected)) => assert_eq!(
				out,
				expected,
				"transmitted {:?}, script wanted {:?}",
				String::from_utf8_lossy(&out),
				String::from_utf8_lossy(&expected)
			),
			_ => panic!(
				"unexpected transmit: {:?}",
				String::from_utf8_lossy(&out)
			),
		}
	}
}

pub struct SimPins;

impl WifiPins for SimPins {
	fn setup(&mut self) {
		SIM.with(|sim| sim.pins_setup.set(true));
	}

	fn set_enable(&mut self, high: bool) {
		SIM.with(|sim| sim.enable.set(high));
	}

	fn set_boot_mode(&mut self, high: bool) {
		SIM.with(|sim| sim.boot_mode.set(high));
	}

	fn set_reset(&mut self, high: bool) {
		SIM.with(|sim| sim.reset.set(high));
	}

	fn teardown(&mut self) {
		SIM.with(|sim| sim.pins_setup.set(false));
	}
}
