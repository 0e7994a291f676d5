use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::StrandError;

/// Debug/profile bitmask recognized by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DebugFlags(u32);

impl DebugFlags {
    pub const NONE: DebugFlags = DebugFlags(0);
    pub const SHOW_ERRORS: DebugFlags = DebugFlags(1);
    pub const SHOW_WARNINGS: DebugFlags = DebugFlags(2);
    pub const TRACE_CALLS: DebugFlags = DebugFlags(8);
    pub const PROFILE_ONLY: DebugFlags = DebugFlags(16);
    pub const TRACE_TAINT: DebugFlags = DebugFlags(128);

    const NAMED: [(&'static str, DebugFlags); 5] = [
        ("show_errors", Self::SHOW_ERRORS),
        ("show_warnings", Self::SHOW_WARNINGS),
        ("trace_calls", Self::TRACE_CALLS),
        ("profile_only", Self::PROFILE_ONLY),
        ("trace_taint", Self::TRACE_TAINT),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn contains(self, other: DebugFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: DebugFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: DebugFlags) {
        self.0 &= !other.0;
    }

    /// Calls are timed whenever call tracing or profiling is requested.
    pub const fn is_profiling(self) -> bool {
        self.0 & (Self::TRACE_CALLS.0 | Self::PROFILE_ONLY.0) != 0
    }

    /// Trace lines are suppressed in profile-only mode.
    pub const fn is_tracing_calls(self) -> bool {
        self.contains(Self::TRACE_CALLS) && !self.contains(Self::PROFILE_ONLY)
    }

    pub fn parse_name(name: &str) -> Result<Self, StrandError> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        Self::NAMED
            .iter()
            .find(|(candidate, _)| *candidate == normalized)
            .map(|(_, flag)| *flag)
            .ok_or_else(|| {
                StrandError::new(
                    "CONFIG_DEBUG_FLAG_UNKNOWN",
                    format!("Unknown debug flag \"{}\".", name),
                )
            })
    }

    pub fn parse_list(list: &str) -> Result<Self, StrandError> {
        let mut flags = Self::NONE;
        for name in list.split(',').filter(|name| !name.trim().is_empty()) {
            flags.insert(Self::parse_name(name)?);
        }
        Ok(flags)
    }
}

impl BitOr for DebugFlags {
    type Output = DebugFlags;

    fn bitor(self, rhs: DebugFlags) -> DebugFlags {
        DebugFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for DebugFlags {
    fn bitor_assign(&mut self, rhs: DebugFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for DebugFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = Self::NAMED
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect::<Vec<_>>();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_only_suppresses_call_trace_lines() {
        let flags = DebugFlags::TRACE_CALLS | DebugFlags::PROFILE_ONLY;
        assert!(flags.is_profiling());
        assert!(!flags.is_tracing_calls());
        assert!(DebugFlags::TRACE_CALLS.is_tracing_calls());
        assert!(!DebugFlags::TRACE_TAINT.is_profiling());
    }

    #[test]
    fn parse_list_accepts_names_and_dashes() {
        let flags = DebugFlags::parse_list("trace-calls, TRACE_TAINT").expect("parse");
        assert!(flags.contains(DebugFlags::TRACE_CALLS));
        assert!(flags.contains(DebugFlags::TRACE_TAINT));
        assert_eq!(flags.to_string(), "trace_calls,trace_taint");

        let error = DebugFlags::parse_list("verbose").expect_err("unknown flag");
        assert_eq!(error.code, "CONFIG_DEBUG_FLAG_UNKNOWN");
    }

    #[test]
    fn flags_serialize_as_bits() {
        let flags = DebugFlags::SHOW_ERRORS | DebugFlags::TRACE_TAINT;
        let json = serde_json::to_string(&flags).expect("json");
        assert_eq!(json, "129");
        let back: DebugFlags = serde_json::from_str(&json).expect("back");
        assert_eq!(back, flags);
    }
}
