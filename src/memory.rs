//! The memory growth probe.
//!
//! [`run()`] allocates a [`GrowthBuffer`] of [`CAPACITY`] bytes and rewrites all of it on every pass, forever. Each
//! byte is set to the wrapping sum of the two before it, which forces every page of the buffer to be faulted in and
//! kept resident, and keeps the process permanently runnable so it can't be mistaken for one that has already stopped.
//!
//! There is no way out of the loop: the probe is finished when something external kills it.
//!
//! The `debug!` and `trace!` records here only reach a sink when a library caller installs a logger. `memory_probe`
//! reads no environment and installs none.

use log::{debug, trace};
use std::{fmt, hint};

/// Size of the buffer the probe allocates and keeps touching: 5 MiB.
pub const CAPACITY: usize = 5 << 20;

/// A contiguous byte region that lives for the rest of the process.
///
/// The first two bytes are `1`; each pass then writes `bytes[i] = bytes[i - 1] + bytes[i - 2]` for every `i` from `2`
/// up, with `u8` wrapping arithmetic.
pub struct GrowthBuffer {
	bytes: &'static mut [u8],
	passes: u64,
}
impl GrowthBuffer {
	/// Allocate the probe's buffer of [`CAPACITY`] bytes.
	///
	/// The allocation is never freed. If the allocator can't satisfy it the process aborts, which is one of the ways a
	/// limiting mechanism is expected to stop the probe.
	pub fn new() -> Self {
		Self::with_capacity(CAPACITY)
	}

	/// Allocate a buffer of `capacity` bytes.
	///
	/// # Panics
	/// If `capacity` is less than 2.
	pub fn with_capacity(capacity: usize) -> Self {
		assert!(
			capacity >= 2,
			"GrowthBuffer needs at least 2 bytes, got {}",
			capacity
		);
		let bytes = Box::leak(vec![0_u8; capacity].into_boxed_slice());
		bytes[0] = 1;
		bytes[1] = 1;
		debug!("allocated growth buffer of {} bytes", capacity);
		Self { bytes, passes: 0 }
	}

	/// Rewrite every byte from index 2 to the end.
	pub fn fill_pass(&mut self) {
		fill(self.bytes);
		// Nothing ever reads the buffer back; stop the writes being optimised away.
		let _ = hint::black_box(&mut *self.bytes);
		self.passes = self.passes.wrapping_add(1);
	}

	/// Make exactly `passes` passes. Only the tests have a reason to stop.
	pub fn run_passes(&mut self, passes: u64) {
		for _ in 0..passes {
			self.fill_pass();
		}
	}

	/// Make passes forever.
	pub fn run(mut self) -> ! {
		loop {
			self.fill_pass();
			trace!("growth buffer pass {} complete", self.passes);
		}
	}

	/// Size of the buffer in bytes.
	pub fn len(&self) -> usize {
		self.bytes.len()
	}

	/// Always false, as a buffer has at least its two seed bytes.
	pub fn is_empty(&self) -> bool {
		self.bytes.is_empty()
	}

	/// The buffer's current contents.
	pub fn as_bytes(&self) -> &[u8] {
		&*self.bytes
	}

	/// Number of completed passes.
	pub fn passes(&self) -> u64 {
		self.passes
	}
}
impl Default for GrowthBuffer {
	fn default() -> Self {
		Self::new()
	}
}
impl fmt::Debug for GrowthBuffer {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("GrowthBuffer")
			.field("len", &self.bytes.len())
			.field("passes", &self.passes)
			.finish()
	}
}

#[allow(clippy::needless_range_loop)]
fn fill(bytes: &mut [u8]) {
	for i in 2..bytes.len() {
		bytes[i] = bytes[i - 1].wrapping_add(bytes[i - 2]);
	}
}

/// Run the memory growth probe. Never returns.
pub fn run() -> ! {
	GrowthBuffer::new().run()
}
