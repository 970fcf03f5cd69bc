use serde::{de, de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use std::{
	convert::TryInto, fmt::{self, Display}, ops::Mul, str::FromStr
};

/// A quantity of memory in bytes.
///
/// Parses from strings such as `"4MiB"`, `"1.5 GiB"` or a plain byte count.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Mem(pub(super) u64);
impl Mem {
	pub const B: Mem = Mem(1);
	pub const KIB: Mem = Mem(1024);
	pub const MIB: Mem = Mem(1024 * 1024);
	pub const GIB: Mem = Mem(1024 * 1024 * 1024);

	pub const fn from_bytes(bytes: u64) -> Self {
		Mem(bytes)
	}

	pub const fn bytes(self) -> u64 {
		self.0
	}
}
impl FromStr for Mem {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut index = s
			.chars()
			.position(|c| !c.is_ascii_digit())
			.unwrap_or(s.len());
		if index == 0 {
			return Err(());
		}
		let a: u64 = s[..index].parse().map_err(|_| ())?;
		if index == s.len() {
			return Ok(Mem(a));
		}
		let (b, b1): (u64, u32) = if s[index..].starts_with('.') {
			index += 1;
			let index1 = index;
			index += s[index..]
				.chars()
				.position(|c| !c.is_ascii_digit())
				.unwrap_or(s.len() - index);
			if index != index1 {
				(
					s[index1..index].parse().map_err(|_| ())?,
					(index - index1).try_into().map_err(|_| ())?,
				)
			} else {
				(0, 0)
			}
		} else {
			(0, 0)
		};
		if index + 1 < s.len() && s[index..].starts_with(' ') {
			index += 1;
		}
		let c: u64 = match &s[index..] {
			"" | "B" => 1,
			"KiB" => 1024,
			"MiB" => 1024_u64.pow(2),
			"GiB" => 1024_u64.pow(3),
			"TiB" => 1024_u64.pow(4),
			"PiB" => 1024_u64.pow(5),
			"EiB" => 1024_u64.pow(6),
			_ => return Err(()),
		};
		let fraction = 10_u64.checked_pow(b1).ok_or(())?;
		a.checked_mul(c)
			.and_then(|whole| whole.checked_add(b.checked_mul(c)? / fraction))
			.map(Mem)
			.ok_or(())
	}
}
impl Display for Mem {
	fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
		const UNITS: [(&str, u64); 4] = [
			("GiB", 1024 * 1024 * 1024),
			("MiB", 1024 * 1024),
			("KiB", 1024),
			("B", 1),
		];
		for &(unit, size) in &UNITS {
			if self.0 >= size && self.0 % size == 0 {
				return write!(f, "{}{}", self.0 / size, unit);
			}
		}
		write!(f, "{}B", self.0)
	}
}
impl Mul<u64> for Mem {
	type Output = Self;

	fn mul(self, rhs: u64) -> Self {
		Mem(self
			.0
			.checked_mul(rhs)
			.expect("overflow when multiplying mem by scalar"))
	}
}
impl Mul<Mem> for u64 {
	type Output = Mem;

	fn mul(self, rhs: Mem) -> Mem {
		rhs * self
	}
}

impl Serialize for Mem {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		if serializer.is_human_readable() {
			self.to_string().serialize(serializer)
		} else {
			self.0.serialize(serializer)
		}
	}
}
impl<'de> Deserialize<'de> for Mem {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		if deserializer.is_human_readable() {
			deserializer.deserialize_any(MemVisitor)
		} else {
			u64::deserialize(deserializer).map(Mem)
		}
	}
}
struct MemVisitor;
impl<'de> Visitor<'de> for MemVisitor {
	type Value = Mem;

	fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
		formatter.write_str("a memory size, like \"4 MiB\" or \"6GiB\"")
	}

	fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
	where
		E: de::Error,
	{
		Mem::from_str(value)
			.map_err(|()| E::custom(format!("couldn't parse memory size: {}", value)))
	}

	fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
	where
		E: de::Error,
	{
		Ok(Mem(value))
	}
}

//////////////////////////////////////////////////////////////////////////////////////////////////////////////////
