use crate::{
    backend::{tolerate, AudioBackend, BackendResult, NodeId, ParamRef},
    synth::{params::LfoParams, voice::Voice},
};

/*
Shared LFO Routing
==================

One low-frequency generator feeds every active voice through two gain taps:

                      ┌────────────┐
                 ┌──→ │ pitch tap  │ ──→ detune of every oscillator in a voice
  ┌───────────┐  │    │ depth×100  │     (cents)
  │ generator │ ─┤    └────────────┘
  │ rate, wave│  │    ┌────────────┐
  └───────────┘  └──→ │ filter tap │ ──→ cutoff of the voice filter
                      │ depth×1000 │     (Hz)
                      └────────────┘

The generator and both taps are one unit: they are built together and torn
down together whenever the LFO is switched on or off or its waveform or rate
changes. Depth changes alone only rescale the taps.

A tap is only wired into a voice when its depth is above zero, so detaching
must tolerate edges that were never made.
*/

/// Cents of detune per unit of pitch depth.
pub const PITCH_DEPTH_CENTS: f32 = 100.0;
/// Hz of cutoff swing per unit of filter depth.
pub const FILTER_DEPTH_HZ: f32 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LfoGraph {
    generator: NodeId,
    pitch_tap: NodeId,
    filter_tap: NodeId,
}

#[derive(Debug, Default)]
pub struct LfoRouter {
    graph: Option<LfoGraph>,
    params: LfoParams,
}

impl LfoRouter {
    /// A router in the disabled state.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.graph.is_some()
    }

    pub fn generator(&self) -> Option<NodeId> {
        self.graph.map(|g| g.generator)
    }

    pub fn pitch_tap(&self) -> Option<NodeId> {
        self.graph.map(|g| g.pitch_tap)
    }

    pub fn filter_tap(&self) -> Option<NodeId> {
        self.graph.map(|g| g.filter_tap)
    }

    /// Tear down whatever exists and, if enabled, build a fresh sub-graph
    /// attached to every active voice.
    pub fn rebuild<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        params: &LfoParams,
        voices: &[Voice],
    ) -> BackendResult<()> {
        self.teardown(backend, voices);
        self.params = *params;

        if !params.enabled {
            tracing::debug!("lfo disabled");
            return Ok(());
        }

        let generator = backend.create_oscillator(params.waveform)?;
        let pitch_tap = backend.create_gain()?;
        let filter_tap = backend.create_gain()?;
        self.graph = Some(LfoGraph {
            generator,
            pitch_tap,
            filter_tap,
        });

        backend.connect(generator, pitch_tap)?;
        backend.connect(generator, filter_tap)?;

        let now = backend.now();
        backend.set_value_at(ParamRef::frequency(generator), params.rate_hz, now)?;
        self.apply_depths(backend, params)?;
        backend.start(generator, now)?;

        for voice in voices.iter().filter(|v| v.is_active() && !v.is_releasing()) {
            self.attach(backend, voice)?;
        }

        tracing::debug!(
            waveform = ?params.waveform,
            rate_hz = params.rate_hz,
            "lfo rebuilt"
        );
        Ok(())
    }

    /// Rescale both taps to the depths in `params`.
    pub fn apply_depths<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        params: &LfoParams,
    ) -> BackendResult<()> {
        self.params.pitch_depth = params.pitch_depth;
        self.params.filter_depth = params.filter_depth;

        let Some(graph) = self.graph else {
            return Ok(());
        };

        let now = backend.now();
        let pitch = ParamRef::gain(graph.pitch_tap);
        let filter = ParamRef::gain(graph.filter_tap);
        backend.cancel_scheduled(pitch, now)?;
        backend.set_value_at(pitch, params.pitch_depth * PITCH_DEPTH_CENTS, now)?;
        backend.cancel_scheduled(filter, now)?;
        backend.set_value_at(filter, params.filter_depth * FILTER_DEPTH_HZ, now)
    }

    /// Route the taps into a voice's oscillator detune and filter cutoff.
    pub fn attach<B: AudioBackend + ?Sized>(
        &self,
        backend: &mut B,
        voice: &Voice,
    ) -> BackendResult<()> {
        let Some(graph) = self.graph else {
            return Ok(());
        };

        if self.params.pitch_depth > 0.0 {
            for osc in voice.oscillators() {
                backend.connect_param(graph.pitch_tap, ParamRef::detune(osc.generator))?;
            }
        }
        if self.params.filter_depth > 0.0 {
            backend.connect_param(graph.filter_tap, ParamRef::frequency(voice.filter()))?;
        }
        Ok(())
    }

    /// Undo `attach`. Edges that were never made are ignored.
    pub fn detach<B: AudioBackend + ?Sized>(&self, backend: &mut B, voice: &Voice) {
        if let Some(graph) = self.graph {
            detach_graph(backend, graph, voice);
        }
    }

    /// Detach from every voice, stop the generator and drop the sub-graph.
    pub fn teardown<B: AudioBackend + ?Sized>(&mut self, backend: &mut B, voices: &[Voice]) {
        let Some(graph) = self.graph.take() else {
            return;
        };

        for voice in voices {
            detach_graph(backend, graph, voice);
        }

        let now = backend.now();
        tolerate(backend.stop(graph.generator, now), "stop lfo");
        for node in [graph.generator, graph.pitch_tap, graph.filter_tap] {
            tolerate(backend.disconnect(node), "disconnect lfo");
            tolerate(backend.destroy(node), "destroy lfo");
        }
    }
}

fn detach_graph<B: AudioBackend + ?Sized>(backend: &mut B, graph: LfoGraph, voice: &Voice) {
    for osc in voice.oscillators() {
        tolerate(
            backend.disconnect_param(graph.pitch_tap, ParamRef::detune(osc.generator)),
            "detach lfo pitch",
        );
    }
    tolerate(
        backend.disconnect_param(graph.filter_tap, ParamRef::frequency(voice.filter())),
        "detach lfo filter",
    );
}
