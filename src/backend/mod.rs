//! Interface to the real-time rendering backend.
//!
//! The engine never renders audio itself. It creates nodes, wires them into a
//! graph and schedules parameter automation on a backend that runs on its own
//! clock. Anything that honours the `AudioBackend` contract can be driven by
//! [`crate::synth::engine::SynthEngine`]; [`offline`] is an in-memory recorder.

pub mod offline;

use std::sync::Arc;

use thiserror::Error;

use crate::dsp::{filter::FilterType, oscillator::Waveform};

/// Opaque handle to a node living inside the backend graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Automatable parameters exposed by backend nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Oscillator pitch or filter cutoff, in Hz.
    Frequency,
    /// Oscillator detune, in cents.
    Detune,
    /// Gain stage multiplier.
    Gain,
    /// Filter resonance.
    Q,
}

/// A single parameter on a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamRef {
    pub node: NodeId,
    pub kind: ParamKind,
}

impl ParamRef {
    pub fn new(node: NodeId, kind: ParamKind) -> Self {
        Self { node, kind }
    }

    pub fn frequency(node: NodeId) -> Self {
        Self::new(node, ParamKind::Frequency)
    }

    pub fn detune(node: NodeId) -> Self {
        Self::new(node, ParamKind::Detune)
    }

    pub fn gain(node: NodeId) -> Self {
        Self::new(node, ParamKind::Gain)
    }

    pub fn q(node: NodeId) -> Self {
        Self::new(node, ParamKind::Q)
    }
}

/// Execution state of the backend context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Suspended,
    Closed,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("node {0:?} has no {1:?} parameter")]
    UnsupportedParam(NodeId, ParamKind),
    #[error("node {from:?} is not connected to {to}")]
    NotConnected { from: NodeId, to: String },
    #[error("node {0:?} has already finished playing")]
    Finished(NodeId),
    #[error("node {0:?} cannot be started or stopped")]
    NotSchedulable(NodeId),
    #[error("backend context is closed")]
    Closed,
    #[error("failed to resume backend context: {0}")]
    ResumeFailed(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Operations the engine needs from a rendering backend.
///
/// Times are absolute, in seconds, on the backend's monotonic clock
/// (`now`). Ramps start at the time of the previous automation event on the
/// same parameter and end at the given time.
pub trait AudioBackend {
    /// Current position of the backend clock in seconds.
    fn now(&self) -> f64;
    fn sample_rate(&self) -> f32;
    fn state(&self) -> ContextState;
    fn resume(&mut self) -> BackendResult<()>;
    /// Release the backend's clock/context. The backend cannot be resumed afterwards.
    fn close(&mut self) -> BackendResult<()>;
    /// The final output of the graph.
    fn destination(&self) -> NodeId;

    fn create_oscillator(&mut self, waveform: Waveform) -> BackendResult<NodeId>;
    /// Looping player over a precomputed mono buffer.
    fn create_buffer_player(&mut self, buffer: Arc<[f32]>) -> BackendResult<NodeId>;
    fn create_filter(&mut self, filter_type: FilterType) -> BackendResult<NodeId>;
    fn create_gain(&mut self) -> BackendResult<NodeId>;
    fn set_filter_type(&mut self, node: NodeId, filter_type: FilterType) -> BackendResult<()>;
    /// Drop a node. Its outgoing edges go with it.
    fn destroy(&mut self, node: NodeId) -> BackendResult<()>;

    fn connect(&mut self, from: NodeId, to: NodeId) -> BackendResult<()>;
    fn connect_param(&mut self, from: NodeId, to: ParamRef) -> BackendResult<()>;
    /// Remove every outgoing edge of `from`.
    fn disconnect(&mut self, from: NodeId) -> BackendResult<()>;
    fn disconnect_param(&mut self, from: NodeId, to: ParamRef) -> BackendResult<()>;

    fn set_value_at(&mut self, param: ParamRef, value: f32, time: f64) -> BackendResult<()>;
    fn linear_ramp_to(&mut self, param: ParamRef, value: f32, end_time: f64)
        -> BackendResult<()>;
    /// Remove automation events scheduled at or after `from`.
    fn cancel_scheduled(&mut self, param: ParamRef, from: f64) -> BackendResult<()>;
    /// Instantaneous value of the parameter at `now`.
    fn current_value(&self, param: ParamRef) -> BackendResult<f32>;

    fn start(&mut self, node: NodeId, when: f64) -> BackendResult<()>;
    fn stop(&mut self, node: NodeId, when: f64) -> BackendResult<()>;
}

/// Swallow a teardown failure.
///
/// Stopping or disconnecting a node the backend already finalized races
/// against scheduled auto-stops and is expected.
pub(crate) fn tolerate(result: BackendResult<()>, action: &str) {
    if let Err(err) = result {
        tracing::trace!(%err, action, "ignoring stale backend handle");
    }
}
