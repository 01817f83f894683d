use std::{fmt, str::FromStr};

/// One scripted operation of the demo.
///
/// Written on the command line as `a<bytes>` to allocate and `f<slot>` to
/// release the allocation stored in a slot. Slots are numbered in the order
/// the allocations were made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Allocate(usize),
    Release(usize),
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s
            .split_at_checked(1)
            .ok_or_else(|| format!("invalid step `{s}`"))?;
        let value = value
            .parse::<usize>()
            .map_err(|err| format!("invalid step `{s}`: {err}"))?;
        match kind {
            "a" | "A" => Ok(Self::Allocate(value)),
            "f" | "F" => Ok(Self::Release(value)),
            _ => Err(format!("invalid step `{s}`: expected `a<bytes>` or `f<slot>`")),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocate(nbytes) => write!(f, "allocate {nbytes} bytes"),
            Self::Release(slot) => write!(f, "release slot {slot}"),
        }
    }
}
