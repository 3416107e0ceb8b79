use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single port or an inclusive `lo-hi` range, as used both in firewall
/// `allowed[].ports` and in whitelist entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PortSpec {
    Single(u16),
    Range(u16, u16),
}

impl PortSpec {
    /// Every port. Used when a rule or whitelist entry names no ports.
    pub const ALL: PortSpec = PortSpec::Range(0, 65535);

    fn bounds(self) -> (u16, u16) {
        match self {
            PortSpec::Single(p) => (p, p),
            PortSpec::Range(lo, hi) => (lo, hi),
        }
    }

    /// Whether `granted` is allowed by this whitelisted spec.
    ///
    /// A single whitelisted port only covers an exact match; a whitelisted
    /// range covers anything that lies entirely inside it.
    pub fn covers(self, granted: PortSpec) -> bool {
        if self == granted {
            return true;
        }
        match self {
            PortSpec::Single(_) => false,
            PortSpec::Range(lo, hi) => {
                let (glo, ghi) = granted.bounds();
                glo >= lo && ghi <= hi
            }
        }
    }
}

/// True when every granted spec is covered by at least one whitelisted spec.
pub fn all_covered(whitelisted: &[PortSpec], granted: &[PortSpec]) -> bool {
    granted
        .iter()
        .all(|g| whitelisted.iter().any(|w| w.covers(*g)))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortSpecError {
    #[error("empty port")]
    Empty,
    #[error("invalid port number: {0}")]
    InvalidNumber(String),
    #[error("port range {0}-{1} is reversed")]
    Reversed(u16, u16),
}

fn parse_port(s: &str) -> Result<u16, PortSpecError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(PortSpecError::Empty);
    }
    s.parse()
        .map_err(|_| PortSpecError::InvalidNumber(s.to_string()))
}

impl FromStr for PortSpec {
    type Err = PortSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((lo, hi)) => {
                let lo = parse_port(lo)?;
                let hi = parse_port(hi)?;
                if lo > hi {
                    return Err(PortSpecError::Reversed(lo, hi));
                }
                Ok(PortSpec::Range(lo, hi))
            }
            None => Ok(PortSpec::Single(parse_port(s)?)),
        }
    }
}

impl TryFrom<String> for PortSpec {
    type Error = PortSpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortSpec> for String {
    fn from(spec: PortSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Single(p) => write!(f, "{}", p),
            PortSpec::Range(lo, hi) => write!(f, "{}-{}", lo, hi),
        }
    }
}
