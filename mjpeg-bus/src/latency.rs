use std::{fmt, str::FromStr, sync::Arc};

use crate::error::{BusError, BusResult};

/// How aggressively the transcoder trades start-up probing and internal
/// buffering for latency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LatencyLevel {
    None,
    Medium,
    #[default]
    High,
}

impl fmt::Display for LatencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LatencyLevel::None => "none",
            LatencyLevel::Medium => "medium",
            LatencyLevel::High => "high",
        };
        f.write_str(name)
    }
}

impl FromStr for LatencyLevel {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "1" => Ok(LatencyLevel::None),
            "medium" | "2" => Ok(LatencyLevel::Medium),
            "high" | "3" => Ok(LatencyLevel::High),
            other => Err(BusError::config(format!("unknown latency level: {:?}", other))),
        }
    }
}

impl TryFrom<u8> for LatencyLevel {
    type Error = BusError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(LatencyLevel::None),
            2 => Ok(LatencyLevel::Medium),
            3 => Ok(LatencyLevel::High),
            other => Err(BusError::config(format!("unknown latency level code: {}", other))),
        }
    }
}

const MEDIUM_FLAGS: &[&str] = &[
    "-fflags",
    "nobuffer+discardcorrupt",
    "-flags",
    "low_delay",
    "-strict",
    "experimental",
    "-probesize",
    "3M",
];

const HIGH_FLAGS: &[&str] = &[
    "-fflags",
    "nobuffer+discardcorrupt",
    "-flags",
    "low_delay",
    "-strict",
    "experimental",
    "-thread_queue_size",
    "1MB",
    "-probesize",
    "128",
    "-analyzeduration",
    "0",
    "-avioflags",
    "direct",
];

const RTSP_HIGH_FLAGS: &[&str] = &["-reorder_queue_size", "0", "-buffer_size", "8192"];

/// Input-side transcoder flags for one latency level.
///
/// Built once per session and shared read-only afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LatencyProfile {
    level: LatencyLevel,
    flags: Arc<[String]>,
}

impl LatencyProfile {
    pub fn new(level: LatencyLevel) -> Self {
        Self::build(level, false)
    }

    /// Profile for an RTSP input, which at `High` also disables the
    /// reorder queue and shrinks the socket buffer.
    pub fn rtsp(level: LatencyLevel) -> Self {
        Self::build(level, true)
    }

    /// Replaces the value of every `-probesize` flag. Levels that set no
    /// probe size are left as they are.
    pub fn with_probe_size(self, probe_size: u32) -> BusResult<Self> {
        if probe_size == 0 {
            return Err(BusError::config("probe size must be positive"));
        }
        let mut flags = self.flags.to_vec();
        for i in 1..flags.len() {
            if flags[i - 1] == "-probesize" {
                flags[i] = probe_size.to_string();
            }
        }
        Ok(Self {
            level: self.level,
            flags: flags.into(),
        })
    }

    pub fn level(&self) -> LatencyLevel {
        self.level
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    fn build(level: LatencyLevel, rtsp: bool) -> Self {
        let mut flags: Vec<&str> = Vec::new();
        match level {
            LatencyLevel::None => {}
            LatencyLevel::Medium => flags.extend_from_slice(MEDIUM_FLAGS),
            LatencyLevel::High => {
                flags.extend_from_slice(HIGH_FLAGS);
                if rtsp {
                    flags.extend_from_slice(RTSP_HIGH_FLAGS);
                }
            }
        }
        Self {
            level,
            flags: flags.into_iter().map(str::to_string).collect(),
        }
    }
}

impl Default for LatencyProfile {
    fn default() -> Self {
        Self::new(LatencyLevel::default())
    }
}
