// src/network/layer.rs
//! Stackable type layers on top of the raw line transport.
//!
//! Every layer owns the one below it, converts values on the way up with
//! [`Codec::decode`] and on the way down with [`Codec::encode`], and forwards
//! reads and writes unchanged in shape. Only [`BaseIo`] touches sockets.

use crate::network::connection::CxnHandle;
use crate::network::io_service::BaseIo;
use crate::utils::LogEvery;
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use thiserror::Error;

/// A value failed to convert between two layers
///
/// Never fatal: the offending message is dropped and reading continues.
#[derive(Error, Debug)]
pub enum ConversionError {
    /// The line was empty after stripping its terminator
    #[error("empty line")]
    EmptyLine,

    /// The line was not valid JSON
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The document was JSON but not a JSON-RPC message
    #[error("invalid JSON-RPC message: {0}")]
    InvalidMessage(String),
}

/// Common interface of every layer, from [`BaseIo`] upwards
pub trait IoLayer: Clone + Send + Sync + 'static {
    /// Type exchanged with the layer above
    type Value: Send + 'static;

    /// Installs the receive callback; replaces any previous one
    fn set_on_receive<F>(&self, on_receive: F)
    where
        F: Fn(CxnHandle, Self::Value) + Send + Sync + 'static;

    /// Arms one read on `cxn`; exactly one value (or a disconnect) follows
    fn read_async(&self, cxn: &CxnHandle);

    /// Queues `value` for sending on `cxn`
    fn write_async(&self, cxn: &CxnHandle, value: Self::Value);

    /// The transport at the bottom of the stack
    fn base(&self) -> &BaseIo;
}

/// Conversion between a layer's value and the value of the layer below
pub trait Codec: Send + Sync + 'static {
    /// Value type of the layer below
    type Below: Send + 'static;
    /// Value type of this layer
    type Value: Send + 'static;

    /// Converts an incoming value from the layer below
    fn decode(&self, below: Self::Below) -> Result<Self::Value, ConversionError>;

    /// Converts an outgoing value for the layer below
    fn encode(&self, value: Self::Value) -> Self::Below;

    /// Short name used in log messages
    fn name(&self) -> &'static str;
}

type Modifier<T> = Box<dyn Fn(&mut T) + Send + Sync>;

struct ModifierSlot<T>(Modifier<T>);

struct LayerShared<C: Codec> {
    codec: C,
    incoming: ArcSwapOption<ModifierSlot<C::Value>>,
    outgoing: ArcSwapOption<ModifierSlot<C::Value>>,
    failures: LogEvery,
}

/// A layer converting with codec `C` on top of layer `L`
pub struct TypeLayer<C: Codec, L> {
    below: L,
    shared: Arc<LayerShared<C>>,
}

impl<C: Codec, L: Clone> Clone for TypeLayer<C, L> {
    fn clone(&self) -> Self {
        TypeLayer {
            below: self.below.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<C, L> TypeLayer<C, L>
where
    C: Codec,
    L: IoLayer<Value = C::Below>,
{
    /// Stacks a new layer on `below`
    pub fn new(codec: C, below: L) -> Self {
        TypeLayer {
            below,
            shared: Arc::new(LayerShared {
                codec,
                incoming: ArcSwapOption::empty(),
                outgoing: ArcSwapOption::empty(),
                failures: LogEvery::new(100),
            }),
        }
    }

    /// The layer this one sits on
    pub fn below(&self) -> &L {
        &self.below
    }

    /// Sets a hook applied to every decoded value before it is delivered
    pub fn set_incoming_modifier<F>(&self, modifier: F)
    where
        F: Fn(&mut C::Value) + Send + Sync + 'static,
    {
        self.shared
            .incoming
            .store(Some(Arc::new(ModifierSlot(Box::new(modifier)))));
    }

    /// Sets a hook applied to every outgoing value before it is encoded
    pub fn set_outgoing_modifier<F>(&self, modifier: F)
    where
        F: Fn(&mut C::Value) + Send + Sync + 'static,
    {
        self.shared
            .outgoing
            .store(Some(Arc::new(ModifierSlot(Box::new(modifier)))));
    }
}

impl<C, L> IoLayer for TypeLayer<C, L>
where
    C: Codec,
    L: IoLayer<Value = C::Below>,
{
    type Value = C::Value;

    fn set_on_receive<F>(&self, on_receive: F)
    where
        F: Fn(CxnHandle, C::Value) + Send + Sync + 'static,
    {
        let shared = self.shared.clone();
        let base = self.below.base().clone();

        self.below.set_on_receive(move |cxn, raw| match shared.codec.decode(raw) {
            Ok(mut value) => {
                if let Some(modifier) = &*shared.incoming.load() {
                    (modifier.0)(&mut value);
                }
                on_receive(cxn, value);
            }
            Err(e) => {
                if let Some(seen) = shared.failures.hit() {
                    log::warn!(
                        "Dropping message that failed {} conversion ({} so far): {}",
                        shared.codec.name(),
                        seen,
                        e
                    );
                }
                // the message is gone, keep the connection listening
                base.read_async(&cxn);
            }
        });
    }

    fn read_async(&self, cxn: &CxnHandle) {
        self.below.read_async(cxn);
    }

    fn write_async(&self, cxn: &CxnHandle, mut value: C::Value) {
        if let Some(modifier) = &*self.shared.outgoing.load() {
            (modifier.0)(&mut value);
        }
        let encoded = self.shared.codec.encode(value);
        self.below.write_async(cxn, encoded);
    }

    fn base(&self) -> &BaseIo {
        self.below.base()
    }
}
