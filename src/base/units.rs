use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail};
use phf::phf_map;
use serde::Deserialize;

use crate::timeq::SimTime;

static PREFIXES: phf::Map<&'static str, f64> = phf_map! {
    "k" => 1e3,
    "K" => 1e3,
    "M" => 1e6,
    "G" => 1e9,
    "T" => 1e12,
    "Ki" => 1024.0,
    "Mi" => 1048576.0,
    "Gi" => 1073741824.0,
    "Ti" => 1099511627776.0,
};

/// Longest suffixes first so that `B/s` is not mistaken for `B`.
const SUFFIXES: [(&str, Unit); 4] = [
    ("b/s", Unit::BitsPerSec),
    ("B/s", Unit::BytesPerSec),
    ("b", Unit::Bits),
    ("B", Unit::Bytes),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Bits,
    Bytes,
    BitsPerSec,
    BytesPerSec,
}

impl Unit {
    fn symbol(self) -> &'static str {
        match self {
            Unit::Bits => "b",
            Unit::Bytes => "B",
            Unit::BitsPerSec => "b/s",
            Unit::BytesPerSec => "B/s",
        }
    }
}

/// A value with a data-size or bandwidth unit, e.g. `"64b"`, `"8B"`, `"1GB/s"`.
/// Prefixes are applied at parse time, so `value` is always in the base unit.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct Quantity {
    value: f64,
    unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    pub fn bits(value: u64) -> Self {
        Self::new(value as f64, Unit::Bits)
    }

    pub fn has_units(&self, unit: Unit) -> bool {
        self.unit == unit
    }

    /// Normalizes byte-based units to bit-based ones.
    pub fn in_bits(self) -> Self {
        match self.unit {
            Unit::Bytes => Self::new(self.value * 8.0, Unit::Bits),
            Unit::BytesPerSec => Self::new(self.value * 8.0, Unit::BitsPerSec),
            _ => self,
        }
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self::new(self.value * factor, self.unit)
    }

    /// Rounded size in bits. Fails for bandwidths.
    pub fn to_bits(&self) -> anyhow::Result<u64> {
        let q = self.in_bits();
        if q.unit != Unit::Bits {
            bail!("{} must be specified in either bits or bytes", self);
        }
        if q.value < 0.0 {
            bail!("{} must not be negative", self);
        }
        Ok(q.value.round() as u64)
    }

    /// Bandwidth in bits per second. Fails for sizes.
    pub fn to_bits_per_sec(&self) -> anyhow::Result<f64> {
        let q = self.in_bits();
        if q.unit != Unit::BitsPerSec {
            bail!("{} must be specified in either b/s or B/s", self);
        }
        if q.value <= 0.0 {
            bail!("{} must be positive", self);
        }
        Ok(q.value)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.symbol())
    }
}

impl FromStr for Quantity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e'))
            .ok_or_else(|| anyhow!("quantity '{}' has no units", s))?;
        let (number, units) = s.split_at(split);
        let value: f64 = number
            .parse()
            .map_err(|_| anyhow!("cannot parse number in quantity '{}'", s))?;
        let units = units.trim();

        for (suffix, unit) in SUFFIXES {
            if let Some(prefix) = units.strip_suffix(suffix) {
                let scale = if prefix.is_empty() {
                    1.0
                } else {
                    *PREFIXES
                        .get(prefix)
                        .ok_or_else(|| anyhow!("unknown unit prefix '{}' in '{}'", prefix, s))?
                };
                return Ok(Quantity::new(value * scale, unit));
            }
        }
        bail!("unsupported units '{}' in quantity '{}'", units, s)
    }
}

impl TryFrom<String> for Quantity {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Duration of one cycle of a clock that moves one flit per cycle over a link.
pub fn flit_period(link_bw: &Quantity, flit_size: &Quantity) -> anyhow::Result<SimTime> {
    let bps = link_bw.to_bits_per_sec()?;
    let flit_bits = flit_size.to_bits()?;
    if flit_bits == 0 {
        bail!("flit size must be non-zero");
    }
    let period = (flit_bits as f64 / bps * 1e12).round() as SimTime;
    Ok(period.max(1))
}
