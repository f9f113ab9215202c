//! In-memory backend that records the graph and its automation.
//!
//! Nothing is rendered. Instead every node, edge and automation event is kept
//! so callers can ask what a parameter's value would be at any point in time.
//! The clock only moves when told to (`advance` / `set_time`), which makes the
//! engine's timing fully deterministic in tests, benches and the demo binary.

use std::{collections::HashMap, sync::Arc};

use super::{
    AudioBackend, BackendError, BackendResult, ContextState, NodeId, ParamKind, ParamRef,
};
use crate::dsp::{filter::FilterType, oscillator::Waveform};

/// One scheduled change on a parameter timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Automation {
    /// Jump to `value` at `time`.
    SetValue { value: f32, time: f64 },
    /// Move linearly from the previous event's value, reaching `value` at `end_time`.
    LinearRamp { value: f32, end_time: f64 },
}

impl Automation {
    pub fn time(&self) -> f64 {
        match *self {
            Automation::SetValue { time, .. } => time,
            Automation::LinearRamp { end_time, .. } => end_time,
        }
    }

    pub fn value(&self) -> f32 {
        match *self {
            Automation::SetValue { value, .. } | Automation::LinearRamp { value, .. } => value,
        }
    }
}

/// Automation history of a single parameter.
#[derive(Debug, Clone)]
pub struct Timeline {
    default: f32,
    events: Vec<Automation>,
}

impl Timeline {
    fn new(default: f32) -> Self {
        Self {
            default,
            events: Vec::new(),
        }
    }

    pub fn events(&self) -> &[Automation] {
        &self.events
    }

    fn insert(&mut self, event: Automation) {
        let time = event.time();
        let pos = self
            .events
            .iter()
            .position(|e| e.time() > time)
            .unwrap_or(self.events.len());
        self.events.insert(pos, event);
    }

    /// Evaluate the timeline at `time`.
    pub fn value_at(&self, time: f64) -> f32 {
        let mut value = self.default;
        let mut prev_time = f64::NEG_INFINITY;

        for event in &self.events {
            match *event {
                Automation::SetValue { value: v, time: t } => {
                    if t > time {
                        break;
                    }
                    value = v;
                    prev_time = t;
                }
                Automation::LinearRamp {
                    value: target,
                    end_time,
                } => {
                    if end_time <= time {
                        value = target;
                        prev_time = end_time;
                        continue;
                    }
                    if !prev_time.is_finite() {
                        // A ramp with nothing before it starts at the default.
                        prev_time = time.min(end_time);
                    }
                    let span = end_time - prev_time;
                    if span > 0.0 {
                        let progress = ((time - prev_time) / span).clamp(0.0, 1.0) as f32;
                        return value + (target - value) * progress;
                    }
                    return value;
                }
            }
        }

        value
    }

    /// Drop every event at or after `from`.
    ///
    /// Whatever remains has already completed by `from`, so it is folded into
    /// a single hold to keep long-lived timelines short.
    fn cancel_from(&mut self, from: f64) {
        self.events.retain(|e| e.time() < from);
        if let Some(last) = self.events.last().copied() {
            let held = self.value_at(from);
            self.events.clear();
            self.events.push(Automation::SetValue {
                value: held,
                time: last.time(),
            });
        }
    }
}

/// What a recorded node is.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Destination,
    Oscillator(Waveform),
    BufferPlayer { frames: usize },
    Filter(FilterType),
    Gain,
}

/// Target of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Node(NodeId),
    Param(ParamRef),
}

#[derive(Debug)]
struct NodeRecord {
    kind: NodeKind,
    outputs: Vec<Endpoint>,
    params: HashMap<ParamKind, Timeline>,
    start: Option<f64>,
    stop: Option<f64>,
}

impl NodeRecord {
    fn new(kind: NodeKind) -> Self {
        let defaults: &[(ParamKind, f32)] = match kind {
            NodeKind::Oscillator(_) => &[(ParamKind::Frequency, 440.0), (ParamKind::Detune, 0.0)],
            NodeKind::Filter(_) => &[(ParamKind::Frequency, 350.0), (ParamKind::Q, 1.0)],
            NodeKind::Gain => &[(ParamKind::Gain, 1.0)],
            NodeKind::Destination | NodeKind::BufferPlayer { .. } => &[],
        };

        Self {
            kind,
            outputs: Vec::new(),
            params: defaults
                .iter()
                .map(|&(kind, value)| (kind, Timeline::new(value)))
                .collect(),
            start: None,
            stop: None,
        }
    }

    fn is_source(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Oscillator(_) | NodeKind::BufferPlayer { .. }
        )
    }
}

pub struct OfflineBackend {
    now: f64,
    sample_rate: f32,
    state: ContextState,
    nodes: HashMap<NodeId, NodeRecord>,
    next_id: u32,
    destination: NodeId,
    failing_resumes: u32,
}

impl OfflineBackend {
    pub fn new(sample_rate: f32) -> Self {
        let destination = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(destination, NodeRecord::new(NodeKind::Destination));

        Self {
            now: 0.0,
            sample_rate,
            state: ContextState::Running,
            nodes,
            next_id: 1,
            destination,
            failing_resumes: 0,
        }
    }

    /// A context that starts suspended, like a browser context before a user gesture.
    pub fn suspended(sample_rate: f32) -> Self {
        let mut backend = Self::new(sample_rate);
        backend.state = ContextState::Suspended;
        backend
    }

    /// Make the next `count` calls to `resume` fail.
    pub fn fail_resumes(&mut self, count: u32) {
        self.failing_resumes = count;
    }

    pub fn advance(&mut self, seconds: f64) {
        self.now += seconds.max(0.0);
    }

    pub fn set_time(&mut self, time: f64) {
        self.now = self.now.max(time);
    }

    pub fn timeline(&self, param: ParamRef) -> Option<&Timeline> {
        self.nodes.get(&param.node)?.params.get(&param.kind)
    }

    pub fn value_at(&self, param: ParamRef, time: f64) -> Option<f32> {
        self.timeline(param).map(|t| t.value_at(time))
    }

    pub fn node_kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.nodes.get(&node).map(|n| &n.kind)
    }

    pub fn outputs(&self, node: NodeId) -> &[Endpoint] {
        self.nodes
            .get(&node)
            .map(|n| n.outputs.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_connected(&self, from: NodeId, to: Endpoint) -> bool {
        self.outputs(from).contains(&to)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    /// Number of nodes that are neither filters, gains nor the destination.
    pub fn live_sources(&self) -> usize {
        self.nodes.values().filter(|n| n.is_source()).count()
    }

    pub fn live_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn start_time(&self, node: NodeId) -> Option<f64> {
        self.nodes.get(&node)?.start
    }

    pub fn stop_time(&self, node: NodeId) -> Option<f64> {
        self.nodes.get(&node)?.stop
    }

    /// True when the source has started and not yet reached its stop time.
    pub fn is_playing(&self, node: NodeId) -> bool {
        self.nodes.get(&node).is_some_and(|n| {
            n.start.is_some_and(|s| s <= self.now) && n.stop.map_or(true, |s| self.now < s)
        })
    }

    fn record(&self, node: NodeId) -> BackendResult<&NodeRecord> {
        self.nodes.get(&node).ok_or(BackendError::UnknownNode(node))
    }

    fn record_mut(&mut self, node: NodeId) -> BackendResult<&mut NodeRecord> {
        self.nodes
            .get_mut(&node)
            .ok_or(BackendError::UnknownNode(node))
    }

    fn timeline_mut(&mut self, param: ParamRef) -> BackendResult<&mut Timeline> {
        self.record_mut(param.node)?
            .params
            .get_mut(&param.kind)
            .ok_or(BackendError::UnsupportedParam(param.node, param.kind))
    }

    fn add_node(&mut self, kind: NodeKind) -> BackendResult<NodeId> {
        if self.state == ContextState::Closed {
            return Err(BackendError::Closed);
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, NodeRecord::new(kind));
        Ok(id)
    }

    fn add_edge(&mut self, from: NodeId, to: Endpoint) -> BackendResult<()> {
        let outputs = &mut self.record_mut(from)?.outputs;
        if !outputs.contains(&to) {
            outputs.push(to);
        }
        Ok(())
    }
}

impl AudioBackend for OfflineBackend {
    fn now(&self) -> f64 {
        self.now
    }

    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn state(&self) -> ContextState {
        self.state
    }

    fn resume(&mut self) -> BackendResult<()> {
        match self.state {
            ContextState::Closed => Err(BackendError::Closed),
            _ if self.failing_resumes > 0 => {
                self.failing_resumes -= 1;
                Err(BackendError::ResumeFailed("device unavailable".into()))
            }
            _ => {
                self.state = ContextState::Running;
                Ok(())
            }
        }
    }

    fn close(&mut self) -> BackendResult<()> {
        if self.state == ContextState::Closed {
            return Err(BackendError::Closed);
        }
        self.state = ContextState::Closed;
        Ok(())
    }

    fn destination(&self) -> NodeId {
        self.destination
    }

    fn create_oscillator(&mut self, waveform: Waveform) -> BackendResult<NodeId> {
        self.add_node(NodeKind::Oscillator(waveform))
    }

    fn create_buffer_player(&mut self, buffer: Arc<[f32]>) -> BackendResult<NodeId> {
        self.add_node(NodeKind::BufferPlayer {
            frames: buffer.len(),
        })
    }

    fn create_filter(&mut self, filter_type: FilterType) -> BackendResult<NodeId> {
        self.add_node(NodeKind::Filter(filter_type))
    }

    fn create_gain(&mut self) -> BackendResult<NodeId> {
        self.add_node(NodeKind::Gain)
    }

    fn set_filter_type(&mut self, node: NodeId, filter_type: FilterType) -> BackendResult<()> {
        match &mut self.record_mut(node)?.kind {
            NodeKind::Filter(current) => {
                *current = filter_type;
                Ok(())
            }
            _ => Err(BackendError::UnsupportedParam(node, ParamKind::Q)),
        }
    }

    fn destroy(&mut self, node: NodeId) -> BackendResult<()> {
        if node == self.destination {
            return Err(BackendError::UnknownNode(node));
        }
        self.nodes
            .remove(&node)
            .map(|_| ())
            .ok_or(BackendError::UnknownNode(node))
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> BackendResult<()> {
        self.record(to)?;
        self.add_edge(from, Endpoint::Node(to))
    }

    fn connect_param(&mut self, from: NodeId, to: ParamRef) -> BackendResult<()> {
        if !self.record(to.node)?.params.contains_key(&to.kind) {
            return Err(BackendError::UnsupportedParam(to.node, to.kind));
        }
        self.add_edge(from, Endpoint::Param(to))
    }

    fn disconnect(&mut self, from: NodeId) -> BackendResult<()> {
        self.record_mut(from)?.outputs.clear();
        Ok(())
    }

    fn disconnect_param(&mut self, from: NodeId, to: ParamRef) -> BackendResult<()> {
        let outputs = &mut self.record_mut(from)?.outputs;
        let edge = Endpoint::Param(to);
        match outputs.iter().position(|e| *e == edge) {
            Some(pos) => {
                outputs.remove(pos);
                Ok(())
            }
            None => Err(BackendError::NotConnected {
                from,
                to: format!("{:?}", to),
            }),
        }
    }

    fn set_value_at(&mut self, param: ParamRef, value: f32, time: f64) -> BackendResult<()> {
        self.timeline_mut(param)?
            .insert(Automation::SetValue { value, time });
        Ok(())
    }

    fn linear_ramp_to(
        &mut self,
        param: ParamRef,
        value: f32,
        end_time: f64,
    ) -> BackendResult<()> {
        self.timeline_mut(param)?
            .insert(Automation::LinearRamp { value, end_time });
        Ok(())
    }

    fn cancel_scheduled(&mut self, param: ParamRef, from: f64) -> BackendResult<()> {
        self.timeline_mut(param)?.cancel_from(from);
        Ok(())
    }

    fn current_value(&self, param: ParamRef) -> BackendResult<f32> {
        self.record(param.node)?
            .params
            .get(&param.kind)
            .map(|t| t.value_at(self.now))
            .ok_or(BackendError::UnsupportedParam(param.node, param.kind))
    }

    fn start(&mut self, node: NodeId, when: f64) -> BackendResult<()> {
        let record = self.record_mut(node)?;
        if !record.is_source() {
            return Err(BackendError::NotSchedulable(node));
        }
        if record.start.is_some() {
            return Err(BackendError::Finished(node));
        }
        record.start = Some(when);
        Ok(())
    }

    fn stop(&mut self, node: NodeId, when: f64) -> BackendResult<()> {
        let now = self.now;
        let record = self.record_mut(node)?;
        if !record.is_source() {
            return Err(BackendError::NotSchedulable(node));
        }
        let Some(start) = record.start else {
            return Err(BackendError::NotSchedulable(node));
        };
        if record.stop.is_some_and(|s| s <= now) {
            return Err(BackendError::Finished(node));
        }
        record.stop = Some(when.max(start));
        Ok(())
    }
}
