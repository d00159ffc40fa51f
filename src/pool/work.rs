// src/pool/work.rs
//! Work items handed to devices and the solutions they send back.

use crate::pool::job::PoolJob;
use crate::types::PowType;
use std::sync::Arc;

/// Ethash work template or item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthashWork {
    /// Header hash to search a nonce for
    pub header_hash: [u8; 32],
    /// Seed hash identifying the DAG epoch
    pub seed_hash: [u8; 32],
    /// Share boundary, big-endian as announced
    pub target: [u8; 32],
    /// Distinguishes items derived from the same job
    pub extranonce: u32,
}

/// Cuckatoo31 work template or item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuckooWork {
    /// Pre-proof-of-work header blob
    pub pre_pow: Vec<u8>,
    /// Nonce to start from
    pub nonce: u64,
    /// Share difficulty
    pub difficulty: u64,
    /// Block height
    pub height: u64,
}

/// Pow-specific part of a work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkPayload {
    /// Ethash work
    Ethash(EthashWork),
    /// Cuckatoo31 work
    Cuckatoo31(CuckooWork),
}

impl WorkPayload {
    /// Pow family of this payload
    pub fn pow_type(&self) -> PowType {
        match self {
            WorkPayload::Ethash(_) => PowType::Ethash,
            WorkPayload::Cuckatoo31(_) => PowType::Cuckatoo31,
        }
    }
}

/// One unit of work, tied to the job that produced it
#[derive(Debug, Clone)]
pub struct Work {
    /// Job this work was derived from
    pub job: Arc<PoolJob>,
    /// What to compute
    pub payload: WorkPayload,
}

impl Work {
    /// Whether the job behind this work is no longer current
    pub fn expired(&self) -> bool {
        self.job.expired()
    }

    /// Uid of the pool that issued the job
    pub fn pool_uid(&self) -> u64 {
        self.job.pool_uid()
    }

    /// Pow family of this work
    pub fn pow_type(&self) -> PowType {
        self.payload.pow_type()
    }

    /// Wraps a device result into a solution that remembers this work's job
    pub fn make_solution(&self, payload: SolutionPayload) -> WorkSolution {
        debug_assert_eq!(
            payload.pow_type(),
            self.pow_type(),
            "solution kind must match work kind"
        );
        WorkSolution {
            job: self.job.clone(),
            payload,
        }
    }
}

/// Ethash solution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthashSolution {
    /// Winning nonce
    pub nonce: u64,
    /// Final pow hash
    pub pow_hash: [u8; 32],
    /// Mix digest
    pub mix_hash: [u8; 32],
}

/// Cuckatoo31 solution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuckooSolution {
    /// Nonce the cycle was found for
    pub nonce: u64,
    /// Edge indices of the cycle
    pub pow: Vec<u32>,
}

/// Pow-specific part of a solution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolutionPayload {
    /// Ethash solution
    Ethash(EthashSolution),
    /// Cuckatoo31 solution
    Cuckatoo31(CuckooSolution),
}

impl SolutionPayload {
    /// Pow family of this payload
    pub fn pow_type(&self) -> PowType {
        match self {
            SolutionPayload::Ethash(_) => PowType::Ethash,
            SolutionPayload::Cuckatoo31(_) => PowType::Cuckatoo31,
        }
    }
}

/// A device result on its way back to the pool
#[derive(Debug, Clone)]
pub struct WorkSolution {
    /// Job the solved work came from
    pub job: Arc<PoolJob>,
    /// The result itself
    pub payload: SolutionPayload,
}

impl WorkSolution {
    /// Whether the job behind this solution is no longer current
    pub fn expired(&self) -> bool {
        self.job.expired()
    }

    /// Uid of the pool that issued the job
    pub fn pool_uid(&self) -> u64 {
        self.job.pool_uid()
    }

    /// Pow family of this solution
    pub fn pow_type(&self) -> PowType {
        self.payload.pow_type()
    }
}

/// Decodes a 32 byte big-endian value from hex
///
/// Tolerates a `0x` prefix, odd digit counts and short values (left padded
/// with zeros), as pools are not consistent about any of these.
pub fn bytes32_from_hex(text: &str) -> Result<[u8; 32], hex::FromHexError> {
    let digits = text.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);
    let bytes = if digits.len() % 2 == 1 {
        hex::decode(format!("0{}", digits))?
    } else {
        hex::decode(digits)?
    };
    if bytes.len() > 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }

    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

/// Share difficulty of a big-endian 256 bit target (2^256 / target)
pub fn difficulty_from_target(target: &[u8; 32]) -> f64 {
    let value = target.iter().fold(0f64, |acc, &b| acc * 256.0 + f64::from(b));
    if value == 0.0 {
        return f64::INFINITY;
    }
    2f64.powi(256) / value
}
