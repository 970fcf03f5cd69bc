//! # `memory_probe`
//! Allocate a 5 MiB buffer and rewrite every byte of it, forever.
//!
//! ## Usage
//! ```text
//! memory_probe
//! ```
//!
//! Takes no arguments and reads no environment. It never exits by itself: run it under the limit being tested, and
//! expect it to be killed.

#![warn(
	missing_copy_implementations,
	missing_debug_implementations,
	missing_docs,
	trivial_numeric_casts,
	unused_extern_crates,
	unused_import_braces,
	unused_qualifications,
	unused_results,
	clippy::pedantic
)] // from https://github.com/rust-unofficial/patterns/blob/master/anti_patterns/deny-warnings.md

use resource_probes::memory;

fn main() {
	resource_probes::set_panic_hook();
	memory::run()
}
