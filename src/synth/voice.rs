use crate::{
    backend::{tolerate, AudioBackend, BackendResult, NodeId, ParamRef},
    dsp::{filter::FilterType, noise::NoiseBuffers, oscillator::tuned_frequency},
    engine::scheduler::{Scheduler, TimerId},
    synth::{modulation::LfoRouter, params::SynthParameters},
};

/// One generator + gain pair built for an enabled oscillator descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscillatorComponent {
    /// Index of the descriptor in `SynthParameters::oscillators` at note-on.
    pub descriptor: usize,
    pub generator: NodeId,
    pub gain: NodeId,
    /// Tuned frequency before pitch bend.
    pub base_frequency: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseComponent {
    pub player: NodeId,
    pub gain: NodeId,
}

/// Payload of a voice cleanup timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupTask {
    pub voice: usize,
    pub note: u8,
}

/// How a voice is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Immediate silence; the caller repopulates the voice right away.
    Reuse,
    /// Immediate silence and the voice becomes free.
    Hard,
    /// Release finished: drop node references without touching settled parameters.
    Soft,
}

/// A single slot that can render one note at a time.
///
/// The filter and amplitude nodes are built once and live as long as the
/// engine. Oscillator and noise components are built per note.
#[derive(Debug)]
pub struct Voice {
    index: usize,
    note: Option<u8>,
    velocity: u8,
    is_active: bool,
    is_releasing: bool,
    start_time: f64,
    oscillators: Vec<OscillatorComponent>,
    noise: Option<NoiseComponent>,
    filter: NodeId,
    amp: NodeId,
    base_cutoff: f32,
    timers: Vec<TimerId>,
}

impl Voice {
    /// Build the persistent part of the voice: filter → amp → `output`.
    pub fn new<B: AudioBackend + ?Sized>(
        index: usize,
        backend: &mut B,
        output: NodeId,
        base_cutoff: f32,
    ) -> BackendResult<Self> {
        let filter = backend.create_filter(FilterType::LowPass)?;
        let amp = backend.create_gain()?;
        backend.connect(filter, amp)?;
        backend.connect(amp, output)?;

        let now = backend.now();
        backend.set_value_at(ParamRef::gain(amp), 0.0, now)?;
        backend.set_value_at(ParamRef::frequency(filter), base_cutoff, now)?;

        Ok(Self {
            index,
            note: None,
            velocity: 0,
            is_active: false,
            is_releasing: false,
            start_time: 0.0,
            oscillators: Vec::new(),
            noise: None,
            filter,
            amp,
            base_cutoff,
            timers: Vec::new(),
        })
    }

    /// Take ownership of a new note. Components are built separately.
    pub fn begin(&mut self, note: u8, velocity: u8, now: f64) {
        self.note = Some(note);
        self.velocity = velocity;
        self.start_time = now;
        self.is_active = true;
        self.is_releasing = false;
    }

    /// Mark the key as released. Automation is programmed by the caller.
    pub fn mark_releasing(&mut self) {
        self.is_active = false;
        self.is_releasing = true;
    }

    pub fn set_base_cutoff(&mut self, cutoff: f32) {
        self.base_cutoff = cutoff;
    }

    /// One generator + gain per enabled, audible oscillator descriptor.
    ///
    /// Nodes are created, then wired into the voice filter, then scheduled.
    pub fn build_oscillators<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        params: &SynthParameters,
        bend: f32,
    ) -> BackendResult<()> {
        let Some(note) = self.note else {
            return Ok(());
        };

        for (descriptor, osc) in params.oscillators.iter().enumerate() {
            if !osc.enabled || osc.level <= 0.0 {
                continue;
            }

            let generator = backend.create_oscillator(osc.waveform)?;
            let gain = backend.create_gain()?;
            let component = OscillatorComponent {
                descriptor,
                generator,
                gain,
                base_frequency: tuned_frequency(note, osc.octave, osc.detune_cents),
            };
            // Track before wiring so a failure below still gets torn down.
            self.oscillators.push(component);

            backend.connect(generator, gain)?;
            backend.connect(gain, self.filter)?;

            let now = backend.now();
            backend.set_value_at(
                ParamRef::frequency(generator),
                component.base_frequency * bend,
                now,
            )?;
            backend.set_value_at(ParamRef::gain(gain), osc.level, now)?;
            backend.start(generator, now)?;
        }

        Ok(())
    }

    /// Build the noise component, or make sure no stale one is left.
    pub fn build_noise<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        params: &SynthParameters,
        buffers: &NoiseBuffers,
    ) -> BackendResult<()> {
        if let Some(stale) = self.noise.take() {
            teardown(backend, stale.player, stale.gain, true);
        }
        if !params.noise.enabled || params.noise.level <= 0.0 {
            return Ok(());
        }

        let player = backend.create_buffer_player(buffers.get(params.noise.color))?;
        let gain = backend.create_gain()?;
        self.noise = Some(NoiseComponent { player, gain });

        backend.connect(player, gain)?;
        backend.connect(gain, self.filter)?;

        let now = backend.now();
        backend.set_value_at(ParamRef::gain(gain), params.noise.level, now)?;
        backend.start(player, now)
    }

    /// Schedule every generator of the voice to stop at `when`.
    pub fn stop_generators_at<B: AudioBackend + ?Sized>(&self, backend: &mut B, when: f64) {
        for osc in &self.oscillators {
            tolerate(backend.stop(osc.generator, when), "schedule oscillator stop");
        }
        if let Some(noise) = &self.noise {
            tolerate(backend.stop(noise.player, when), "schedule noise stop");
        }
    }

    pub fn add_timer(&mut self, id: TimerId) {
        self.timers.push(id);
    }

    /// Forget a timer that has just fired.
    pub fn forget_timer(&mut self, id: TimerId) {
        self.timers.retain(|t| *t != id);
    }

    pub fn cancel_timers(&mut self, timers: &mut Scheduler<CleanupTask>) {
        for id in self.timers.drain(..) {
            timers.cancel(id);
        }
    }

    /// Stop the voice and release its per-note components.
    ///
    /// Always leaves the voice neither active nor releasing.
    pub fn stop<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        timers: &mut Scheduler<CleanupTask>,
        lfo: &LfoRouter,
        mode: StopMode,
    ) {
        let hard = mode != StopMode::Soft;

        self.cancel_timers(timers);
        lfo.detach(backend, self);

        for osc in self.oscillators.drain(..) {
            teardown(backend, osc.generator, osc.gain, hard);
        }
        if let Some(noise) = self.noise.take() {
            teardown(backend, noise.player, noise.gain, hard);
        }

        if hard {
            let now = backend.now();
            let amp = ParamRef::gain(self.amp);
            let cutoff = ParamRef::frequency(self.filter);
            tolerate(backend.cancel_scheduled(amp, now), "cancel amp automation");
            tolerate(backend.set_value_at(amp, 0.0, now), "silence amp");
            tolerate(backend.cancel_scheduled(cutoff, now), "cancel cutoff automation");
            tolerate(
                backend.set_value_at(cutoff, self.base_cutoff, now),
                "reset cutoff",
            );
        }

        if mode != StopMode::Reuse {
            self.note = None;
            self.velocity = 0;
            self.start_time = 0.0;
        }

        self.is_active = false;
        self.is_releasing = false;
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn note(&self) -> Option<u8> {
        self.note
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn is_releasing(&self) -> bool {
        self.is_releasing
    }

    /// Neither active nor releasing.
    pub fn is_free(&self) -> bool {
        !self.is_active && !self.is_releasing
    }

    /// Active or releasing with the given note.
    pub fn is_sounding(&self, note: u8) -> bool {
        self.note == Some(note) && !self.is_free()
    }

    /// Clock time of the most recent note-on.
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn oscillators(&self) -> &[OscillatorComponent] {
        &self.oscillators
    }

    pub fn noise(&self) -> Option<&NoiseComponent> {
        self.noise.as_ref()
    }

    pub fn has_components(&self) -> bool {
        !self.oscillators.is_empty() || self.noise.is_some()
    }

    pub fn filter(&self) -> NodeId {
        self.filter
    }

    pub fn amp(&self) -> NodeId {
        self.amp
    }

    pub fn base_cutoff(&self) -> f32 {
        self.base_cutoff
    }

    pub fn pending_timers(&self) -> &[TimerId] {
        &self.timers
    }
}

/// Stop (if `hard`), disconnect and drop a source and its gain.
fn teardown<B: AudioBackend + ?Sized>(backend: &mut B, source: NodeId, gain: NodeId, hard: bool) {
    if hard {
        let now = backend.now();
        tolerate(backend.stop(source, now), "stop source");
    }
    tolerate(backend.disconnect(source), "disconnect source");
    tolerate(backend.disconnect(gain), "disconnect source gain");
    tolerate(backend.destroy(source), "destroy source");
    tolerate(backend.destroy(gain), "destroy source gain");
}
