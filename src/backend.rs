//! Compute placement.
//!
//! # Supported Devices
//!
//! - `Cpu` — plain sequential loops (default).
//! - `Rayon` — element-wise reductions over flat vectors split across the
//!   rayon thread pool.
//!
//! There is no global device state. A [`Device`] is part of the experiment
//! configuration and is handed to every component that does vector math, so
//! two experiments in the same process can run with different placements.

use core::convert::TryFrom;
use core::fmt;
use core::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Where vector math runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Device {
    /// Sequential CPU loops.
    #[default]
    Cpu = 0,
    /// Data-parallel CPU loops on the rayon pool.
    Rayon,
}

impl TryFrom<u8> for Device {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Rayon),
            _ => Err(()),
        }
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "rayon" | "parallel" => Ok(Self::Rayon),
            other => Err(format!("unknown device '{other}'")),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Rayon => f.write_str("rayon"),
        }
    }
}

impl Device {
    /// `Σ a_i · b_i`. Callers guarantee equal lengths.
    pub fn dot(self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Self::Cpu => a.iter().zip(b).map(|(x, y)| x * y).sum(),
            Self::Rayon => a.par_iter().zip(b.par_iter()).map(|(x, y)| x * y).sum(),
        }
    }

    /// `Σ (a_i - b_i)²`. Callers guarantee equal lengths.
    pub fn squared_distance(self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Self::Cpu => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            Self::Rayon => a
                .par_iter()
                .zip(b.par_iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum(),
        }
    }
}
