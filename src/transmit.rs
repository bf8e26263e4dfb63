//! Outbound byte pump.
//!
//! A command line is queued as a short list of borrowed text segments; a
//! raw payload is queued as a single counted buffer. The UART transmit
//! interrupt drains one byte per callback and the submitting task blocks
//! until the job empties, so the borrowed buffers never outlive their
//! owners while the ISR can still read them.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use portable_atomic::{AtomicBool, Ordering};

/// Command-line pieces plus the CRLF terminator.
pub(crate) const MAX_SEGMENTS: usize = 8;

/// One borrowed byte range, never empty while queued.
#[derive(Clone, Copy)]
struct Segment {
	ptr: *const u8,
	len: usize,
}

impl Segment {
	const EMPTY: Segment = Segment {
		ptr: core::ptr::null(),
		len: 0,
	};
}

/// The in-flight outbound job.
enum TxJob {
	/// AT command line: consecutive text segments sent back to back.
	Text {
		segments: [Segment; MAX_SEGMENTS],
		count: usize,
		index: usize,
		offset: usize,
	},
	/// Raw payload: one counted buffer, `remaining` never zero while queued.
	Raw { ptr: *const u8, remaining: usize },
}

// SAFETY: the pointers reference caller-owned buffers. The submitter blocks
// until the ISR clears the job, so the ISR never reads a pointer whose
// buffer has gone out of scope.
unsafe impl Send for TxJob {}

/// Job slot shared between the submitting task and the transmit ISR.
///
/// The task installs a job and blocks; only the ISR advances and finally
/// clears it. `busy` is what the task spins on between wakeups.
pub(crate) struct TxShared {
	job: Mutex<CriticalSectionRawMutex, RefCell<Option<TxJob>>>,
	busy: AtomicBool,
}

impl TxShared {
	pub(crate) const fn new() -> Self {
		Self {
			job: Mutex::new(RefCell::new(None)),
			busy: AtomicBool::new(false),
		}
	}

	/// True while a job is queued and not yet drained.
	pub(crate) fn is_busy(&self) -> bool {
		self.busy.load(Ordering::Acquire)
	}

	/// Drop any queued job. Used when the modem is power-cycled.
	pub(crate) fn clear(&self) {
		self.job.lock(|slot| slot.borrow_mut().take());
		self.busy.store(false, Ordering::Release);
	}

	/// Queue a text job built from `segments`, skipping empty ones.
	pub(crate) fn start_text(&self, segments: &[&[u8]]) {
		debug_assert!(segments.len() <= MAX_SEGMENTS);
		let mut slots = [Segment::EMPTY; MAX_SEGMENTS];
		let mut count = 0;
		for segment in segments {
			if segment.is_empty() {
				continue;
			}
			slots[count] = Segment {
				ptr: segment.as_ptr(),
				len: segment.len(),
			};
			count += 1;
		}
		if count == 0 {
			return;
		}
		let job = TxJob::Text {
			segments: slots,
			count,
			index: 0,
			offset: 0,
		};
		self.job.lock(|slot| slot.borrow_mut().replace(job));
		self.busy.store(true, Ordering::Release);
	}

	/// Queue a raw payload job. `data` must not be empty.
	pub(crate) fn start_raw(&self, data: &[u8]) {
		debug_assert!(!data.is_empty());
		let job = TxJob::Raw {
			ptr: data.as_ptr(),
			remaining: data.len(),
		};
		self.job.lock(|slot| slot.borrow_mut().replace(job));
		self.busy.store(true, Ordering::Release);
	}

	/// Advance the job by one byte. ISR context.
	///
	/// Returns the byte to send plus `true` when that byte drained the
	/// job, or `None` when the pump is idle.
	pub(crate) fn next_byte(&self) -> Option<(u8, bool)> {
		self.job.lock(|slot| {
			let mut job = slot.borrow_mut();
			let (byte, drained) = match job.as_mut()? {
				TxJob::Raw { ptr, remaining } => {
					// SAFETY: `remaining` bytes starting at `ptr` are
					// still borrowed by the blocked submitter.
					let byte = unsafe { ptr.read() };
					*ptr = unsafe { ptr.add(1) };
					*remaining -= 1;
					(byte, *remaining == 0)
				}
				TxJob::Text {
					segments,
					count,
					index,
					offset,
				} => {
					let segment = segments[*index];
					// SAFETY: as above; `offset` stays below the
					// segment length by construction.
					let byte = unsafe { segment.ptr.add(*offset).read() };
					*offset += 1;
					if *offset >= segment.len {
						*index += 1;
						*offset = 0;
					}
					(byte, *index >= *count)
				}
			};
			if drained {
				*job = None;
				self.busy.store(false, Ordering::Release);
			}
			Some((byte, drained))
		})
	}
}
