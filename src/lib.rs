//! Resource-exhaustion probes.
//!
//! This library holds the logic behind two tiny fixture binaries used to check that a resource-limiting mechanism
//! (rlimits, cgroup controllers, container quotas, or a supervising harness) notices and stops a process that exceeds
//! its bound:
//!
//!  * **`memory_probe`:** [`memory::run()`](memory::run) allocates a fixed [`GrowthBuffer`](memory::GrowthBuffer) and
//!    rewrites every byte of it, forever. It never returns; it expects to be killed.
//!  * **`fork_probe <max_proc>`:** [`fork::run()`](fork::run) forks `max_proc` children that each print their index
//!    and exit, then reaps with a single blocking wait. A failed `fork()` is fatal and reported, never retried.
//!
//! Neither probe handles the signal that ends it: being killed is the expected outcome of the scenario under test.

#![doc(html_root_url = "https://docs.rs/resource-probes/0.1.0")]
#![warn(
	missing_copy_implementations,
	missing_debug_implementations,
	missing_docs,
	trivial_casts,
	trivial_numeric_casts,
	unused_import_braces,
	unused_qualifications,
	unused_results,
	clippy::pedantic
)] // from https://github.com/rust-unofficial/patterns/blob/master/anti_patterns/deny-warnings.md
#![allow(
	clippy::if_not_else,
	clippy::module_name_repetitions,
	clippy::must_use_candidate,
	clippy::missing_errors_doc,
	clippy::missing_panics_doc
)]

pub mod fork;
pub mod memory;

use log::LevelFilter;
use std::{env, panic, path::Path, process, thread};

pub use probes_internal::{Envs, ExitStatus, Mem};

/// Install the panic hook shared by both probes.
///
/// A panic prints the thread, message and a backtrace to stderr and then aborts, so a bug in a probe surfaces as
/// `SIGABRT` rather than as an unwinding exit code that a harness could confuse with a reported failure.
pub fn set_panic_hook() {
	env::set_var("RUST_BACKTRACE", "full");
	panic::set_hook(Box::new(|info| {
		eprintln!(
			"thread '{}' {}",
			thread::current().name().unwrap_or("<unnamed>"),
			info
		);
		eprintln!("{:?}", backtrace::Backtrace::new());
		process::abort();
	}));
}

/// Initialise a probe that is allowed to look at its environment: install the panic hook, then the file logger if
/// `PROBES_LOG` names a path.
///
/// Log records never go to stdout or stderr, as those are the probes' observable output. For the same reason an
/// invalid variable, or a log file that can't be created, just leaves logging off.
pub fn init() {
	set_panic_hook();
	let envs = Envs::from_env();
	if let Some((path, level)) = log_target(&envs) {
		let _ = simple_logging::log_to_file(path, level);
	}
}

/// Where to log to and at what level, if logging is on. An unparseable level falls back to `trace`.
fn log_target(envs: &Envs) -> Option<(&Path, LevelFilter)> {
	let path = envs.log.as_ref()?.as_deref()?;
	let level = envs.log_level.flatten().unwrap_or(LevelFilter::Trace);
	Some((path, level))
}

/// The name this process was invoked as, without any leading directories, as `err(3)` prints it.
pub fn program_name() -> String {
	env::args_os()
		.next()
		.as_ref()
		.and_then(|arg0| Path::new(arg0).file_name())
		.map_or_else(
			|| String::from(env!("CARGO_PKG_NAME")),
			|name| name.to_string_lossy().into_owned(),
		)
}
