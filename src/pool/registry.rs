// src/pool/registry.rs
//! Lookup of pool implementations by name or by pow type and protocol.
//!
//! The registry is an ordinary value built once at startup and passed to
//! whoever constructs pools.

use crate::pool::ethash::{self, EthashStratumPool};
use crate::pool::grin::{self, GrinStratumPool};
use crate::pool::pool::{Pool, PoolConstructionArgs};
use crate::types::PowType;
use crate::utils::MinerError;
use std::fmt;
use std::sync::Arc;

/// Constructor of one pool implementation
pub type PoolFactory = fn(PoolConstructionArgs) -> Result<Arc<dyn Pool>, MinerError>;

/// One registered pool implementation
#[derive(Clone)]
pub struct PoolEntry {
    /// Unique implementation name
    pub impl_name: &'static str,
    /// Pow family it serves
    pub pow_type: PowType,
    /// Protocol name
    pub protocol: &'static str,
    /// Alternative protocol name accepted in configs
    pub protocol_alias: Option<&'static str>,
    /// Constructor
    pub make: PoolFactory,
}

impl PoolEntry {
    fn speaks(&self, protocol: &str) -> bool {
        self.protocol.eq_ignore_ascii_case(protocol)
            || self
                .protocol_alias
                .is_some_and(|alias| alias.eq_ignore_ascii_case(protocol))
    }
}

impl fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("impl_name", &self.impl_name)
            .field("pow_type", &self.pow_type)
            .field("protocol", &self.protocol)
            .field("protocol_alias", &self.protocol_alias)
            .finish()
    }
}

/// Known pool implementations
#[derive(Debug, Clone, Default)]
pub struct PoolRegistry {
    entries: Vec<PoolEntry>,
}

impl PoolRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in stratum pools
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(PoolEntry {
            impl_name: ethash::IMPL_NAME,
            pow_type: PowType::Ethash,
            protocol: "stratum2",
            protocol_alias: Some("stratum"),
            make: |args| Ok(EthashStratumPool::new(args)? as Arc<dyn Pool>),
        });
        registry.register(PoolEntry {
            impl_name: grin::IMPL_NAME,
            pow_type: PowType::Cuckatoo31,
            protocol: "GrinStratum",
            protocol_alias: Some("stratum"),
            make: |args| Ok(GrinStratumPool::new(args)? as Arc<dyn Pool>),
        });
        registry
    }

    /// Adds an implementation; a later entry with the same name replaces the earlier one
    pub fn register(&mut self, entry: PoolEntry) {
        self.entries.retain(|e| e.impl_name != entry.impl_name);
        self.entries.push(entry);
    }

    /// Constructs the implementation called `impl_name`
    ///
    /// # Errors
    /// Returns `MinerError::UnknownPool` if no such implementation exists, or
    /// the pool's own construction error
    pub fn make_pool(&self, impl_name: &str, args: PoolConstructionArgs) -> Result<Arc<dyn Pool>, MinerError> {
        let entry = self
            .entry(impl_name)
            .ok_or_else(|| MinerError::UnknownPool(impl_name.to_string()))?;
        (entry.make)(args)
    }

    /// Constructs the implementation for a pow type and protocol
    ///
    /// # Errors
    /// Returns `MinerError::UnknownPool` if no implementation matches, or
    /// the pool's own construction error
    pub fn make_pool_for(
        &self,
        pow_type: PowType,
        protocol: &str,
        args: PoolConstructionArgs,
    ) -> Result<Arc<dyn Pool>, MinerError> {
        let impl_name = self
            .impl_name_for(pow_type, protocol)
            .ok_or_else(|| MinerError::UnknownPool(format!("{} over {}", pow_type, protocol)))?;
        self.make_pool(impl_name, args)
    }

    /// Name of the implementation for a pow type and protocol
    pub fn impl_name_for(&self, pow_type: PowType, protocol: &str) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|e| e.pow_type == pow_type && e.speaks(protocol))
            .map(|e| e.impl_name)
    }

    /// Pow type served by `impl_name`
    pub fn pow_type_for(&self, impl_name: &str) -> Option<PowType> {
        self.entry(impl_name).map(|e| e.pow_type)
    }

    /// Protocol spoken by `impl_name`
    pub fn protocol_for(&self, impl_name: &str) -> Option<&'static str> {
        self.entry(impl_name).map(|e| e.protocol)
    }

    /// All registered implementations
    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    fn entry(&self, impl_name: &str) -> Option<&PoolEntry> {
        self.entries.iter().find(|e| e.impl_name == impl_name)
    }
}
