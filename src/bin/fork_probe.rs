//! # `fork_probe`
//! Fork a number of children that each print their index, then exit.
//!
//! ## Usage
//! ```text
//! fork_probe <max_proc>
//! ```
//!
//! `max_proc` is read like C's `atoi`: non-numeric input is 0, and 0 or less forks nothing. Each child writes its
//! zero-based index and a space to stdout, in no particular order. Exits 0, or 1 with a message on stderr if the
//! argument is missing or a `fork()` fails.
//!
//! Setting `PROBES_LOG=<path>` logs what the probe does to that file (level from `PROBES_LOG_LEVEL`, default `trace`).

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

use std::{env, process};

use resource_probes::{
	fork::{self, Args}, program_name, ExitStatus
};

fn main() {
	resource_probes::init();
	let result = Args::from_args(
		env::args_os()
			.skip(1)
			.map(|arg| arg.to_string_lossy().into_owned()),
	)
	.and_then(fork::run);
	let exit = match result {
		Ok(()) => ExitStatus::Success,
		Err(err) => {
			eprintln!("{}: {}", program_name(), err);
			ExitStatus::from_unix_status(1)
		}
	};
	process::exit(exit.into());
}
