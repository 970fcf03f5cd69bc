//! The process fork probe.
//!
//! [`run()`] forks `max_proc` children. Child `i` writes `"{i} "` to stdout and exits 0; the parent keeps forking, then
//! makes one blocking [`wait()`](nix::sys::wait::wait) and returns. `SIGCHLD` is ignored before the first fork, so the
//! kernel discards exited children instead of leaving them as zombies, and on Linux that single wait only returns once
//! every child has gone.
//!
//! The first failed `fork()` ends the probe with [`ProbeError::Fork`]. Children already running are left alone: the
//! failure is the signal the test is looking for, and retrying or cleaning up would hide it.

use log::{debug, trace};
use nix::{
	errno::Errno, libc, sys::{
		signal::{self, SaFlags, SigAction, SigHandler, SigSet}, wait::{self, WaitStatus}
	}, unistd::{self, ForkResult}
};
use std::{
	error, ffi::CStr, fmt, io::{self, Write}, process
};

/// The probe's single argument.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Args {
	/// How many children to fork. Zero or negative forks none.
	pub max_proc: i32,
}
impl Args {
	/// Parse the arguments following the program name.
	///
	/// The first argument is read with [`atoi()`] semantics, so it is never rejected, only possibly read as 0. Any
	/// further arguments are ignored.
	pub fn from_args(mut args: impl Iterator<Item = String>) -> Result<Self, ProbeError> {
		let max_proc = args.next().ok_or(ProbeError::Usage)?;
		Ok(Self {
			max_proc: atoi(&max_proc),
		})
	}
}

/// Why the probe stopped early.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ProbeError {
	/// No `max_proc` argument was given. Nothing has been forked.
	Usage,
	/// `SIGCHLD` couldn't be set to ignored. Nothing has been forked.
	Sigaction(Errno),
	/// `fork()` failed, typically with `EAGAIN` once a process limit is hit. Earlier children may still be running.
	Fork(Errno),
}
impl fmt::Display for ProbeError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			ProbeError::Usage => write!(f, "not enough arguments"),
			ProbeError::Sigaction(err) => write!(f, "sigaction(): {}", strerror(err)),
			ProbeError::Fork(err) => write!(f, "fork(): {}", strerror(err)),
		}
	}
}
impl error::Error for ProbeError {
	fn source(&self) -> Option<&(dyn error::Error + 'static)> {
		match self {
			ProbeError::Usage => None,
			ProbeError::Sigaction(err) | ProbeError::Fork(err) => Some(err),
		}
	}
}

/// The C library's description of `err`, as `err(3)` prints it.
fn strerror(err: Errno) -> String {
	let mut buf: [libc::c_char; 128] = [0; 128];
	// SAFETY: the buffer is valid for its whole length, and is NUL terminated on success.
	let ret = unsafe { libc::strerror_r(err as libc::c_int, buf.as_mut_ptr(), buf.len()) };
	if ret != 0 {
		return String::from(err.desc());
	}
	// SAFETY: as above.
	unsafe { CStr::from_ptr(buf.as_ptr()) }
		.to_string_lossy()
		.into_owned()
}

/// Parse a decimal integer the way C's `atoi` does.
///
/// Leading whitespace is skipped, then an optional sign, then as many digits as follow. Whatever comes after is
/// ignored, and a string with no digits is 0. Values beyond the range of `i32` saturate.
#[allow(clippy::cast_possible_truncation)]
pub fn atoi(s: &str) -> i32 {
	let s = s.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == '\x0b');
	let (negative, digits) = match s.as_bytes().first() {
		Some(b'-') => (true, &s[1..]),
		Some(b'+') => (false, &s[1..]),
		_ => (false, s),
	};
	let mut value: i64 = 0;
	for digit in digits.bytes().take_while(u8::is_ascii_digit) {
		value = value * 10 + i64::from(digit - b'0');
		if value > i64::from(i32::MAX) + 1 {
			break;
		}
	}
	let value = if negative { -value } else { value };
	value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Set `SIGCHLD` to be ignored, so that exited children are reaped by the kernel. Idempotent.
pub fn ignore_child_exits() -> Result<(), Errno> {
	let action = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
	// SAFETY: SIG_IGN installs no handler code.
	let _previous = unsafe { signal::sigaction(signal::SIGCHLD, &action)? };
	Ok(())
}

/// Fork `max_proc` children, stopping at the first failure. Returns the number forked.
///
/// Must be called while the process is single threaded.
pub fn spawn_children(max_proc: i32) -> Result<u32, ProbeError> {
	let mut spawned = 0;
	for index in 0..max_proc {
		// SAFETY: the probe has one thread, and the child only writes to stdout before exiting.
		match unsafe { unistd::fork() } {
			Ok(ForkResult::Child) => child(index),
			Ok(ForkResult::Parent { child: pid }) => {
				trace!("forked child {} as {}", index, pid);
				spawned += 1;
			}
			Err(err) => {
				debug!("fork() failed after {} children: {}", spawned, err);
				return Err(ProbeError::Fork(err));
			}
		}
	}
	Ok(spawned)
}

fn child(index: i32) -> ! {
	let stdout = io::stdout();
	let mut stdout = stdout.lock();
	// Errors are ignored, as printf's would be: whoever ran us may have closed stdout.
	let _ = write!(stdout, "{} ", index).and_then(|()| stdout.flush());
	process::exit(0)
}

/// Block until a child exits. Only `EINTR` is retried.
///
/// With `SIGCHLD` ignored this returns `ECHILD` once every child has exited, rather than a child's status.
pub fn reap_one() -> Result<WaitStatus, Errno> {
	loop {
		match wait::wait() {
			Err(Errno::EINTR) => (),
			status => break status,
		}
	}
}

/// Run the process fork probe.
///
/// With no children to wait for, the wait is skipped and this returns immediately.
pub fn run(args: Args) -> Result<(), ProbeError> {
	ignore_child_exits().map_err(ProbeError::Sigaction)?;
	let spawned = spawn_children(args.max_proc)?;
	if spawned > 0 {
		let status = reap_one();
		debug!("waited after forking {} children: {:?}", spawned, status);
	} else {
		debug!("no children forked; not waiting");
	}
	Ok(())
}
