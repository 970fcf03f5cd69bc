#![warn(
	// missing_copy_implementations,
	missing_debug_implementations,
	// missing_docs,
	trivial_numeric_casts,
	unused_extern_crates,
	unused_import_braces,
	unused_qualifications,
	unused_results,
	clippy::pedantic,
)] // from https://github.com/rust-unofficial/patterns/blob/master/anti_patterns/deny-warnings.md
#![allow(
	clippy::if_not_else,
	clippy::module_name_repetitions,
	clippy::must_use_candidate,
	clippy::missing_errors_doc,
	clippy::missing_panics_doc
)]

mod units;

use log::LevelFilter;
#[cfg(unix)]
use nix::sys::signal;
use serde::{Deserialize, Serialize};
use std::{
	convert::TryFrom, env, ffi::{OsStr, OsString}, path::PathBuf, process, str::FromStr
};

pub use units::Mem;

#[cfg(target_family = "unix")]
pub type Fd = std::os::unix::io::RawFd;

pub const STDOUT: Fd = 1;
pub const STDERR: Fd = 2;

/// The configuration the probes accept from their environment.
///
/// Each field is `None` if the variable is unset, and `Some(None)` if it is set but couldn't be parsed.
#[derive(Clone, PartialEq, Debug)]
pub struct Envs {
	pub log: Option<Option<PathBuf>>,
	pub log_level: Option<Option<LevelFilter>>,
}
impl Envs {
	pub fn from_env() -> Self {
		Self::from(&env::vars_os().collect::<Vec<_>>())
	}

	pub fn from(env: &[(OsString, OsString)]) -> Self {
		let var = |name: &str| {
			env.iter()
				.rev()
				.find(|(key, _)| key == name)
				.map(|(_, value)| value.as_os_str())
		};
		let log = var("PROBES_LOG").map(|x: &OsStr| {
			if !x.is_empty() {
				Some(PathBuf::from(x))
			} else {
				None
			}
		});
		let log_level = var("PROBES_LOG_LEVEL").map(|x: &OsStr| {
			x.to_str()
				.and_then(|x| LevelFilter::from_str(x).ok())
		});
		Self { log, log_level }
	}
}

//////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// How a process ended.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum ExitStatus {
	Success,
	Error(ExitStatusError),
}
impl ExitStatus {
	pub fn success(&self) -> bool {
		*self == ExitStatus::Success
	}
	pub fn from_unix_status(s: u8) -> Self {
		if s == 0 {
			ExitStatus::Success
		} else {
			ExitStatus::Error(ExitStatusError::Unix(ExitStatusUnix::Status(s)))
		}
	}
	#[cfg(unix)]
	pub fn from_unix_signal(s: signal::Signal) -> Self {
		ExitStatus::Error(ExitStatusError::Unix(ExitStatusUnix::Signal(s.into())))
	}
	/// The signal that terminated the process, if any.
	pub fn signal(&self) -> Option<Signal> {
		if let ExitStatus::Error(ExitStatusError::Unix(ExitStatusUnix::Signal(signal))) = *self {
			Some(signal)
		} else {
			None
		}
	}
}
#[cfg(unix)]
impl From<process::ExitStatus> for ExitStatus {
	fn from(status: process::ExitStatus) -> Self {
		use std::os::unix::process::ExitStatusExt;
		if let Some(code) = status.code() {
			u8::try_from(code).map_or(
				ExitStatus::Error(ExitStatusError::Indeterminate),
				Self::from_unix_status,
			)
		} else if let Some(number) = status.signal() {
			signal::Signal::try_from(number).map_or(
				ExitStatus::Error(ExitStatusError::Unix(ExitStatusUnix::Signal(
					Signal::Other(number),
				))),
				Self::from_unix_signal,
			)
		} else {
			ExitStatus::Error(ExitStatusError::Indeterminate)
		}
	}
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum ExitStatusError {
	Unix(ExitStatusUnix),
	Indeterminate,
}
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum ExitStatusUnix {
	Status(u8),
	Signal(Signal),
}

/// The portable subset of [nix's `Signal`](nix::sys::signal::Signal); anything platform specific is carried by number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum Signal {
	SIGHUP,
	SIGINT,
	SIGQUIT,
	SIGILL,
	SIGTRAP,
	SIGABRT,
	SIGBUS,
	SIGFPE,
	SIGKILL,
	SIGUSR1,
	SIGSEGV,
	SIGUSR2,
	SIGPIPE,
	SIGALRM,
	SIGTERM,
	SIGCHLD,
	SIGCONT,
	SIGSTOP,
	SIGTSTP,
	SIGTTIN,
	SIGTTOU,
	SIGURG,
	SIGXCPU,
	SIGXFSZ,
	SIGVTALRM,
	SIGPROF,
	SIGWINCH,
	SIGIO,
	SIGSYS,
	Other(i32),
}
#[cfg(unix)]
impl From<signal::Signal> for Signal {
	#[allow(unreachable_patterns)]
	fn from(signal: signal::Signal) -> Self {
		match signal {
			signal::Signal::SIGHUP => Signal::SIGHUP,
			signal::Signal::SIGINT => Signal::SIGINT,
			signal::Signal::SIGQUIT => Signal::SIGQUIT,
			signal::Signal::SIGILL => Signal::SIGILL,
			signal::Signal::SIGTRAP => Signal::SIGTRAP,
			signal::Signal::SIGABRT => Signal::SIGABRT,
			signal::Signal::SIGBUS => Signal::SIGBUS,
			signal::Signal::SIGFPE => Signal::SIGFPE,
			signal::Signal::SIGKILL => Signal::SIGKILL,
			signal::Signal::SIGUSR1 => Signal::SIGUSR1,
			signal::Signal::SIGSEGV => Signal::SIGSEGV,
			signal::Signal::SIGUSR2 => Signal::SIGUSR2,
			signal::Signal::SIGPIPE => Signal::SIGPIPE,
			signal::Signal::SIGALRM => Signal::SIGALRM,
			signal::Signal::SIGTERM => Signal::SIGTERM,
			signal::Signal::SIGCHLD => Signal::SIGCHLD,
			signal::Signal::SIGCONT => Signal::SIGCONT,
			signal::Signal::SIGSTOP => Signal::SIGSTOP,
			signal::Signal::SIGTSTP => Signal::SIGTSTP,
			signal::Signal::SIGTTIN => Signal::SIGTTIN,
			signal::Signal::SIGTTOU => Signal::SIGTTOU,
			signal::Signal::SIGURG => Signal::SIGURG,
			signal::Signal::SIGXCPU => Signal::SIGXCPU,
			signal::Signal::SIGXFSZ => Signal::SIGXFSZ,
			signal::Signal::SIGVTALRM => Signal::SIGVTALRM,
			signal::Signal::SIGPROF => Signal::SIGPROF,
			signal::Signal::SIGWINCH => Signal::SIGWINCH,
			signal::Signal::SIGIO => Signal::SIGIO,
			signal::Signal::SIGSYS => Signal::SIGSYS,
			other => Signal::Other(other as i32),
		}
	}
}
#[cfg(unix)]
impl From<Signal> for i32 {
	fn from(signal: Signal) -> Self {
		let signal = match signal {
			Signal::SIGHUP => signal::Signal::SIGHUP,
			Signal::SIGINT => signal::Signal::SIGINT,
			Signal::SIGQUIT => signal::Signal::SIGQUIT,
			Signal::SIGILL => signal::Signal::SIGILL,
			Signal::SIGTRAP => signal::Signal::SIGTRAP,
			Signal::SIGABRT => signal::Signal::SIGABRT,
			Signal::SIGBUS => signal::Signal::SIGBUS,
			Signal::SIGFPE => signal::Signal::SIGFPE,
			Signal::SIGKILL => signal::Signal::SIGKILL,
			Signal::SIGUSR1 => signal::Signal::SIGUSR1,
			Signal::SIGSEGV => signal::Signal::SIGSEGV,
			Signal::SIGUSR2 => signal::Signal::SIGUSR2,
			Signal::SIGPIPE => signal::Signal::SIGPIPE,
			Signal::SIGALRM => signal::Signal::SIGALRM,
			Signal::SIGTERM => signal::Signal::SIGTERM,
			Signal::SIGCHLD => signal::Signal::SIGCHLD,
			Signal::SIGCONT => signal::Signal::SIGCONT,
			Signal::SIGSTOP => signal::Signal::SIGSTOP,
			Signal::SIGTSTP => signal::Signal::SIGTSTP,
			Signal::SIGTTIN => signal::Signal::SIGTTIN,
			Signal::SIGTTOU => signal::Signal::SIGTTOU,
			Signal::SIGURG => signal::Signal::SIGURG,
			Signal::SIGXCPU => signal::Signal::SIGXCPU,
			Signal::SIGXFSZ => signal::Signal::SIGXFSZ,
			Signal::SIGVTALRM => signal::Signal::SIGVTALRM,
			Signal::SIGPROF => signal::Signal::SIGPROF,
			Signal::SIGWINCH => signal::Signal::SIGWINCH,
			Signal::SIGIO => signal::Signal::SIGIO,
			Signal::SIGSYS => signal::Signal::SIGSYS,
			Signal::Other(number) => return number,
		};
		signal as Self
	}
}

/// The conventional shell exit code: the status itself, or 128 plus the signal number.
#[cfg(unix)]
impl From<ExitStatus> for i32 {
	fn from(exit_status: ExitStatus) -> Self {
		match exit_status {
			ExitStatus::Success => 0,
			ExitStatus::Error(error) => match error {
				ExitStatusError::Unix(ExitStatusUnix::Signal(signal)) => {
					Self::from(signal) | (1 << 7)
				}
				ExitStatusError::Unix(ExitStatusUnix::Status(status)) => Self::from(status),
				ExitStatusError::Indeterminate => 101,
			},
		}
	}
}

//////////////////////////////////////////////////////////////////////////////////////////////////////////////////
