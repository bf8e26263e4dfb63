//! Platform interfaces consumed by the driver.
//!
//! The driver never touches hardware or the scheduler directly. The
//! embedding application implements these traits for its RTOS and HAL and
//! wires the UART interrupt handlers to [`WifiIsr`](crate::WifiIsr); host
//! tests implement them with a scripted simulator.
//!
//! ## Execution contexts
//! Exactly two contexts ever run driver code: one client task at a time
//! (everything on [`Wifi`](crate::Wifi)) and the UART interrupt (everything
//! on [`WifiIsr`](crate::WifiIsr)). The `Kernel` wake primitive is the only
//! bridge between them.

/// Scheduler primitives: task identity, time, and ISR-safe wakeups.
///
/// Modeled on the task-notification style of RTOS kernels: a blocked task
/// is woken by a counting notification, and every wait carries a deadline
/// anchored at the start of the command step.
pub trait Kernel {
	/// Handle identifying a task to the scheduler.
	type Task: Copy + Send;
	/// Monotonic timestamp with millisecond resolution.
	type Instant: Copy;

	/// Handle of the calling task.
	fn current_task() -> Self::Task;

	/// Current monotonic time.
	fn now() -> Self::Instant;

	/// Block the calling task until a wakeup arrives.
	fn take();

	/// Block the calling task until a wakeup arrives or `timeout_ms`
	/// milliseconds have elapsed since `since`.
	///
	/// Returns `false` once the deadline has passed, `true` otherwise.
	/// Spurious wakeups are allowed; callers re-check their condition.
	fn take_until(since: Self::Instant, timeout_ms: u32) -> bool;

	/// Wake `task` from interrupt context.
	///
	/// Must establish release/acquire ordering between the interrupt and
	/// the woken task so that state written before the wake is visible
	/// after it.
	fn give_from_isr(task: Self::Task);

	/// Busy-wait or sleep for `ms` milliseconds.
	fn delay_ms(ms: u32);
}

/// Lifecycle control of the modem UART (115200 baud 8N1).
///
/// The data path itself is callback-driven: the UART interrupt feeds
/// received bytes to [`WifiIsr::on_rx`](crate::WifiIsr::on_rx) and pulls
/// outbound bytes from [`WifiIsr::on_tx`](crate::WifiIsr::on_tx).
pub trait WifiUart {
	/// Bring the peripheral up at the given baud rate.
	fn init(&mut self, baud: u32);

	/// Tear the peripheral down.
	fn deinit(&mut self);

	/// Whether the peripheral is currently up.
	fn is_init(&self) -> bool;

	/// Ask the peripheral to start (or keep) draining the transmit path.
	///
	/// After this call the peripheral keeps invoking
	/// [`WifiIsr::on_tx`](crate::WifiIsr::on_tx) until it returns `None`.
	fn ensure_transmit(&mut self);
}

/// The three output pins wired to the modem.
///
/// ENABLE is active high, RESET is active low, BOOT_MODE selects run mode
/// when held high.
pub trait WifiPins {
	/// Enable the GPIO bank and configure all three pins as push-pull
	/// outputs.
	fn setup(&mut self);

	/// Drive the ENABLE pin.
	fn set_enable(&mut self, high: bool);

	/// Drive the BOOT_MODE pin.
	fn set_boot_mode(&mut self, high: bool);

	/// Drive the RESET pin.
	fn set_reset(&mut self, high: bool);

	/// Release the pins.
	fn teardown(&mut self);
}
