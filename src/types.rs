// src/types.rs
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Proof-of-work families the pool layer can hand out work for
///
/// The pool layer never hashes anything itself; the pow type only decides
/// which job payload a pool produces and which solution payload it accepts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowType {
    /// Ethash (Ethereum classic style DAG based pow)
    ///
    /// Work is a header hash, seed hash and target; a solution is a
    /// nonce with the resulting pow and mix hashes.
    #[clap(name = "ethash")]
    Ethash,

    /// Cuckatoo31 (Grin cycle finding pow)
    ///
    /// Work is a pre-pow blob and nonce; a solution is a 42-cycle.
    #[clap(name = "cuckatoo31")]
    Cuckatoo31,
}

impl PowType {
    /// All known pow types, in registry order
    pub const ALL: [PowType; 2] = [PowType::Ethash, PowType::Cuckatoo31];
}

impl fmt::Display for PowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowType::Ethash => write!(f, "ethash"),
            PowType::Cuckatoo31 => write!(f, "cuckatoo31"),
        }
    }
}

impl FromStr for PowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ethash" => Ok(PowType::Ethash),
            "cuckatoo31" | "grin" | "c31" => Ok(PowType::Cuckatoo31),
            _ => Err(format!("Unknown pow type: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pow_type_parse_and_display() {
        for pow in PowType::ALL {
            let parsed: PowType = pow.to_string().parse().unwrap();
            assert_eq!(parsed, pow, "display output should parse back");
        }
        assert_eq!("GRIN".parse::<PowType>(), Ok(PowType::Cuckatoo31));
        assert!("sha256d".parse::<PowType>().is_err(), "unknown pow must fail");
    }
}
