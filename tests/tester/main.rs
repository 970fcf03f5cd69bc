//! This is the testsuite for the probes. It runs each scenario in `tests/scenarios/` a number of times (the first
//! argument, default 3) against the freshly built `memory_probe` and `fork_probe`, under whatever limits the scenario
//! asks for, and checks what they did.
//!
//! A scenario is a JSON file. `expect.output` is a hashmap of file descriptor to a regex the whole of that output must
//! match. As it is a regex ensure that any literal `\.+*?()|[]{}^$#&-~` are escaped. `expect.outcome` lists the
//! outcomes that are acceptable, as more than one way of being stopped is often fine.
//!
//! The tester makes itself a child subreaper, so children a probe leaves running are reparented here and counted.

#![warn(
	missing_copy_implementations,
	missing_debug_implementations,
	trivial_numeric_casts,
	unused_extern_crates,
	unused_import_braces,
	unused_qualifications,
	unused_results,
	clippy::pedantic,
)] // from https://github.com/rust-unofficial/patterns/blob/master/anti_patterns/deny-warnings.md
#![allow(clippy::if_not_else, clippy::cast_possible_truncation)]


use multiset::HashMultiSet;
use nix::{
	errno::Errno, libc, sys::{
		resource::{setrlimit, Resource}, wait
	}, unistd
};
use serde::{Deserialize, Serialize};
use std::{
	collections::HashMap, env, fs::{self, File}, io::{self, BufReader, Read}, os::unix::process::CommandExt, path::{Path, PathBuf}, process, str, thread, time::{self, Duration}
};

use ext::{serde_regex::SerdeRegex, serialize_as_regex_string::SerializeAsRegexString};
use probes_internal::{ExitStatus, Fd, Mem, STDERR, STDOUT};

const SCENARIOS: &str = "tests/scenarios";
const DEFAULT_ITERATIONS: usize = 3;
/// Tasks that exist once a probe is running besides those counted beforehand: the probe and our two output readers.
const SPAWN_TASKS: u64 = 3;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
enum Probe {
	MemoryProbe,
	ForkProbe,
}
impl Probe {
	fn path(self) -> &'static Path {
		Path::new(match self {
			Probe::MemoryProbe => env!("CARGO_BIN_EXE_memory_probe"),
			Probe::ForkProbe => env!("CARGO_BIN_EXE_fork_probe"),
		})
	}
}

#[derive(Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct Limits {
	/// Address space, applied as `RLIMIT_AS`.
	#[serde(default)]
	mem: Option<Mem>,
	/// How many children the probe may have alive at once, applied as `RLIMIT_NPROC` on top of the tasks our user
	/// already runs.
	#[serde(default)]
	procs: Option<u64>,
}
impl Limits {
	/// Work out the absolute rlimits now, as nothing but `setrlimit` is safe between `fork` and `exec`.
	fn resolve(self) -> io::Result<Rlimits> {
		Ok(Rlimits {
			address_space: self.mem.map(Mem::bytes),
			processes: match self.procs {
				Some(procs) => Some(user_tasks()? + SPAWN_TASKS + procs),
				None => None,
			},
		})
	}
}

#[derive(Copy, Clone, Debug)]
struct Rlimits {
	address_space: Option<u64>,
	processes: Option<u64>,
}
impl Rlimits {
	fn apply(self) -> io::Result<()> {
		if let Some(bytes) = self.address_space {
			setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
		}
		if let Some(count) = self.processes {
			setrlimit(Resource::RLIMIT_NPROC, count, count)?;
		}
		Ok(())
	}
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct Scenario {
	probe: Probe,
	#[serde(default)]
	args: Vec<String>,
	/// Set in the probe's environment, on top of ours with the logging variables removed.
	#[serde(default)]
	env: HashMap<String, String>,
	#[serde(default)]
	limits: Limits,
	/// Seconds before the probe is killed with `SIGKILL`.
	#[serde(default = "default_timeout")]
	timeout: u64,
	/// `RLIMIT_NPROC` isn't enforced for root, so such scenarios are skipped there.
	#[serde(default)]
	unprivileged: bool,
	expect: Expect,
}
fn default_timeout() -> u64 {
	30
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
enum Outcome {
	NoError,
	RunTimeError,
	KilledBySignal,
	Timeout,
	SpawnFailed,
}
impl Outcome {
	fn of(exit: ExitStatus, timed_out: bool) -> Self {
		if timed_out {
			Outcome::Timeout
		} else if exit.success() {
			Outcome::NoError
		} else if exit.signal().is_some() {
			Outcome::KilledBySignal
		} else {
			Outcome::RunTimeError
		}
	}
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct Expect {
	#[serde(default)]
	output: HashMap<Fd, SerdeRegex>,
	/// stdout must hold each of `0..indices` exactly once.
	#[serde(default)]
	indices: Option<u32>,
	#[serde(default)]
	exit: Option<ExitStatus>,
	outcome: Vec<Outcome>,
	#[serde(default)]
	no_orphans: bool,
}
impl Expect {
	fn check(&self, actual: &Actual) -> Result<(), String> {
		if !self.outcome.contains(&actual.outcome) {
			return Err(format!(
				"outcome {:?} is not one of {:?}",
				actual.outcome, self.outcome
			));
		}
		if self.exit.is_some() && self.exit != actual.exit {
			return Err(format!(
				"exit {:?} is not {:?}",
				actual.exit,
				self.exit.unwrap()
			));
		}
		for (fd, test) in &self.output {
			match actual.output.get(fd) {
				Some(output) if test.is_match(&output.0) => (),
				_ => return Err(format!("output on fd {} doesn't match", fd)),
			}
		}
		if let Some(count) = self.indices {
			let printed = indices(&actual.output[&STDOUT].0)?;
			if printed != (0..count).collect::<HashMultiSet<_>>() {
				let mut printed = printed.iter().collect::<Vec<_>>();
				printed.sort();
				return Err(format!(
					"printed indices {} rather than each of 0..{} once",
					itertools::join(printed, " "),
					count
				));
			}
		}
		if self.no_orphans && actual.orphans != 0 {
			return Err(format!("{} children outlived the probe", actual.orphans));
		}
		Ok(())
	}
}

#[derive(Serialize, Debug)]
struct Actual {
	output: HashMap<Fd, SerializeAsRegexString>,
	exit: Option<ExitStatus>,
	outcome: Outcome,
	orphans: usize,
	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<String>,
}

fn indices(stdout: &[u8]) -> Result<HashMultiSet<u32>, String> {
	str::from_utf8(stdout)
		.map_err(|err| err.to_string())?
		.split_whitespace()
		.map(|index| {
			index
				.parse()
				.map_err(|_| format!("{:?} is not an index", index))
		})
		.collect()
}

/// Count the tasks (threads, as the kernel counts them against `RLIMIT_NPROC`) belonging to our real user.
fn user_tasks() -> io::Result<u64> {
	let uid = u64::from(unistd::getuid().as_raw());
	let mut tasks = 0;
	for entry in fs::read_dir("/proc")? {
		let entry = entry?;
		if !entry
			.file_name()
			.to_str()
			.map_or(false, |name| name.bytes().all(|c| c.is_ascii_digit()))
		{
			continue;
		}
		// The process may have exited since the directory was listed.
		let status = match fs::read_to_string(entry.path().join("status")) {
			Ok(status) => status,
			Err(_) => continue,
		};
		let field = |name: &str| {
			status
				.lines()
				.find_map(|line| line.strip_prefix(name))
				.and_then(|rest| rest.split_whitespace().next())
				.and_then(|value| value.parse::<u64>().ok())
		};
		if field("Uid:") == Some(uid) {
			tasks += field("Threads:").unwrap_or(1);
		}
	}
	Ok(tasks)
}

/// Reap everything reparented to us, blocking until the last of them exits.
fn reap_orphans() -> usize {
	let mut orphans = 0;
	loop {
		match wait::wait() {
			Ok(_) => orphans += 1,
			Err(Errno::EINTR) => (),
			Err(Errno::ECHILD) => break orphans,
			Err(err) => panic!("wait(): {}", err),
		}
	}
}

fn forward(mut reader: impl Read + Send + 'static) -> thread::JoinHandle<Vec<u8>> {
	thread::spawn(move || {
		let mut output = Vec::new();
		let _ = reader.read_to_end(&mut output).unwrap();
		output
	})
}

fn run(scenario: &Scenario) -> Actual {
	let limits = scenario.limits.resolve().unwrap();
	let mut command = process::Command::new(scenario.probe.path());
	let _ = command
		.args(&scenario.args)
		.env_remove("PROBES_LOG")
		.env_remove("PROBES_LOG_LEVEL")
		.envs(&scenario.env)
		.stdin(process::Stdio::null())
		.stdout(process::Stdio::piped())
		.stderr(process::Stdio::piped());
	unsafe {
		let _ = command.pre_exec(move || limits.apply());
	}
	let start = time::Instant::now();
	let mut child = match command.spawn() {
		Ok(child) => child,
		Err(err) => {
			return Actual {
				output: vec![(STDOUT, Vec::new()), (STDERR, Vec::new())]
					.into_iter()
					.map(|(fd, output)| (fd, SerializeAsRegexString(output)))
					.collect(),
				exit: None,
				outcome: Outcome::SpawnFailed,
				orphans: reap_orphans(),
				error: Some(err.to_string()),
			}
		}
	};
	let stdout = forward(child.stdout.take().unwrap());
	let stderr = forward(child.stderr.take().unwrap());
	let timeout = Duration::from_secs(scenario.timeout);
	let mut timed_out = false;
	let status = loop {
		if let Some(status) = child.try_wait().unwrap() {
			break status;
		}
		if start.elapsed() > timeout {
			timed_out = true;
			child.kill().unwrap();
			break child.wait().unwrap();
		}
		thread::sleep(Duration::from_millis(1));
	};
	// Orphans hold the write ends too, so these return once they've all exited.
	let output = vec![(STDOUT, stdout), (STDERR, stderr)]
		.into_iter()
		.map(|(fd, output)| (fd, SerializeAsRegexString(output.join().unwrap())))
		.collect();
	let exit = ExitStatus::from(status);
	Actual {
		output,
		exit: Some(exit),
		outcome: Outcome::of(exit, timed_out),
		orphans: reap_orphans(),
		error: None,
	}
}

fn main() {
	let start = time::Instant::now();
	env::set_var("RUST_BACKTRACE", "full");
	std::panic::set_hook(Box::new(|info| {
		eprintln!(
			"thread '{}' {}",
			thread::current().name().unwrap_or("<unnamed>"),
			info
		);
		eprintln!("{:?}", backtrace::Backtrace::new());
		process::abort();
	}));
	let _ = thread::Builder::new()
		.spawn(move || loop {
			thread::sleep(Duration::new(10, 0));
			println!("{:?}", start.elapsed());
		})
		.unwrap();
	let err = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1) };
	assert_eq!(err, 0, "prctl(PR_SET_CHILD_SUBREAPER): {}", Errno::last());
	let iterations = env::args()
		.nth(1)
		.and_then(|arg| arg.parse::<usize>().ok())
		.unwrap_or(DEFAULT_ITERATIONS);
	let root = unistd::geteuid().is_root();

	let mut scenarios = fs::read_dir(Path::new(env!("CARGO_MANIFEST_DIR")).join(SCENARIOS))
		.unwrap()
		.map(|entry| entry.unwrap().path())
		.filter(|path| path.extension().map_or(false, |ext| ext == "json"))
		.collect::<Vec<PathBuf>>();
	scenarios.sort();

	let (mut succeeded, mut failed, mut skipped) = (0, 0, 0);
	for src in scenarios {
		println!("{}", src.display());
		let scenario: Result<Scenario, _> =
			serde_json::from_reader(BufReader::new(File::open(&src).unwrap()));
		let scenario = match scenario {
			Ok(scenario) => scenario,
			Err(e) => {
				println!("Error in {:?}", src);
				println!("Documented:\nInvalid result JSON: {:?}\n", e);
				failed += 1;
				continue;
			}
		};
		if scenario.unprivileged && root {
			println!("    skipped: process limits don't apply to root");
			skipped += 1;
			continue;
		}
		for i in 0..iterations {
			println!("    {}", i);
			let actual = run(&scenario);
			match scenario.expect.check(&actual) {
				Ok(()) => succeeded += 1,
				Err(reason) => {
					println!("Error in {:?}: {}", src, reason);
					println!(
						"Documented:\n{}",
						serde_json::to_string_pretty(&scenario).unwrap()
					);
					println!(
						"Actual:\n{}",
						serde_json::to_string_pretty(&actual).unwrap()
					);
					failed += 1;
				}
			}
		}
	}

	println!(
		"{}/{} succeeded, {} skipped, in {:?}",
		succeeded,
		succeeded + failed,
		skipped,
		start.elapsed()
	);
	if failed > 0 {
		process::exit(1);
	}
}
