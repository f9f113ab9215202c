use crate::{
    backend::{tolerate, AudioBackend, BackendResult, ContextState, NodeId, ParamRef},
    dsp::{
        envelope::{apply_envelope, apply_envelope_to, ramp_from_current, release_envelope},
        envelope::{NoteTargets, ReleasePlan},
        filter::clamp_cutoff,
        noise::NoiseBuffers,
    },
    engine::{allocator::VoicePool, scheduler::Scheduler},
    synth::{
        message::{MessageReceiver, SynthMessage},
        modulation::LfoRouter,
        params::SynthParameters,
        voice::{CleanupTask, StopMode, Voice},
    },
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Construction-time settings that stay fixed for the engine's lifetime.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Number of voice slots.
    pub polyphony: usize,
    /// Length of each looping noise buffer.
    pub noise_seconds: f32,
    pub noise_seed: u64,
    /// Extra time after the longest release before generators stop.
    pub stop_margin: f64,
    /// Extra time after the longest release before a voice is cleaned up.
    pub cleanup_margin: f64,
    /// Ramp time used when the pitch bend moves.
    pub bend_glide: f64,
    /// Pitch bend range at full deflection, in semitones.
    pub bend_range_semitones: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            polyphony: 8,
            noise_seconds: 2.0,
            noise_seed: 0x5eed,
            stop_margin: 0.05,
            cleanup_margin: 0.1,
            bend_glide: 0.01,
            bend_range_semitones: 2.0,
        }
    }
}

impl EngineConfig {
    pub fn polyphony(mut self, polyphony: usize) -> Self {
        self.polyphony = polyphony;
        self
    }

    pub fn noise_seconds(mut self, seconds: f32) -> Self {
        self.noise_seconds = seconds.max(0.0);
        self
    }

    pub fn noise_seed(mut self, seed: u64) -> Self {
        self.noise_seed = seed;
        self
    }

    pub fn bend_range(mut self, semitones: f32) -> Self {
        self.bend_range_semitones = semitones;
        self
    }
}

/// Polyphonic synth driven entirely through backend automation.
///
/// Every public operation runs to completion on the calling thread and only
/// schedules work on the backend. Failures inside the backend are logged and
/// never surface to the caller; the worst outcome is a dropped note.
pub struct SynthEngine<B: AudioBackend> {
    backend: B,
    config: EngineConfig,
    params: SynthParameters,
    pool: VoicePool,
    lfo: LfoRouter,
    timers: Scheduler<CleanupTask>,
    noise: NoiseBuffers,
    master: NodeId,
    bend: f32,
    controls: [u8; 128],
    disposed: bool,
}

impl<B: AudioBackend> SynthEngine<B> {
    pub fn new(
        mut backend: B,
        config: EngineConfig,
        params: SynthParameters,
    ) -> BackendResult<Self> {
        let params = params.sanitized();
        let sample_rate = backend.sample_rate();

        let master = backend.create_gain()?;
        let destination = backend.destination();
        backend.connect(master, destination)?;
        let now = backend.now();
        backend.set_value_at(ParamRef::gain(master), params.master_volume, now)?;

        let resting_cutoff = clamp_cutoff(params.filter.cutoff_hz, sample_rate);
        let pool = VoicePool::new(config.polyphony, &mut backend, master, resting_cutoff)?;
        let noise = NoiseBuffers::new(sample_rate, config.noise_seconds, config.noise_seed);

        let mut lfo = LfoRouter::new();
        lfo.rebuild(&mut backend, &params.lfo, pool.voices())?;

        tracing::debug!(
            polyphony = config.polyphony,
            sample_rate,
            noise_frames = noise.frames(),
            "synth engine ready"
        );

        Ok(Self {
            backend,
            config,
            params,
            pool,
            lfo,
            timers: Scheduler::new(),
            noise,
            master,
            bend: 1.0,
            controls: [0; 128],
            disposed: false,
        })
    }

    /// Start a note. Returns the slot that plays it, or `None` if it was dropped.
    ///
    /// A velocity of zero is a note-off, as in running-status MIDI. Notes above
    /// 127 are dropped.
    pub fn note_on(&mut self, note: u8, velocity: u8) -> Option<usize> {
        if self.disposed {
            return None;
        }
        if velocity == 0 {
            self.note_off(note);
            return None;
        }
        if note > 127 {
            tracing::debug!(note, "note outside the MIDI range, dropping");
            return None;
        }
        let velocity = velocity.min(127);

        self.resume_if_suspended();

        let Some(allocation) =
            self.pool
                .allocate(note, &mut self.backend, &mut self.timers, &self.lfo)
        else {
            tracing::debug!(note, "no voice available, dropping note");
            return None;
        };
        let index = allocation.index;

        if let Err(err) = self.start_voice(index, note, velocity) {
            tracing::warn!(%err, note, slot = index, "failed to start voice");
            if let Some(voice) = self.pool.get_mut(index) {
                voice.stop(&mut self.backend, &mut self.timers, &self.lfo, StopMode::Hard);
            }
            return None;
        }

        tracing::debug!(note, velocity, slot = index, kind = ?allocation.kind, "note on");
        Some(index)
    }

    fn start_voice(&mut self, index: usize, note: u8, velocity: u8) -> BackendResult<()> {
        let Some(voice) = self.pool.get_mut(index) else {
            return Ok(());
        };
        let backend = &mut self.backend;
        let params = &self.params;
        let now = backend.now();

        voice.begin(note, velocity, now);
        let targets = NoteTargets::derive(params, note, velocity, backend.sample_rate());
        voice.set_base_cutoff(targets.base_cutoff);

        voice.build_oscillators(backend, params, self.bend)?;
        voice.build_noise(backend, params, &self.noise)?;

        let filter = voice.filter();
        backend.set_filter_type(filter, params.filter.filter_type)?;
        let q = ParamRef::q(filter);
        backend.cancel_scheduled(q, now)?;
        backend.set_value_at(q, params.filter.resonance, now)?;

        apply_envelope(
            backend,
            ParamRef::gain(voice.amp()),
            &params.amp_envelope,
            0.0,
            targets.amp_peak,
            params.amp_envelope.sustain,
        )?;
        apply_envelope_to(
            backend,
            ParamRef::frequency(filter),
            &params.filter_envelope,
            targets.base_cutoff,
            targets.filter_peak,
            targets.filter_sustain,
        )?;

        self.lfo.attach(backend, voice)
    }

    /// Release every voice holding `note`.
    pub fn note_off(&mut self, note: u8) {
        if self.disposed {
            return;
        }

        let now = self.backend.now();
        let plan = ReleasePlan::new(
            &self.params,
            now,
            self.config.stop_margin,
            self.config.cleanup_margin,
        );

        for voice in self.pool.voices_mut() {
            if !voice.is_sounding(note) {
                continue;
            }

            voice.cancel_timers(&mut self.timers);
            voice.mark_releasing();

            report(
                release_envelope(
                    &mut self.backend,
                    ParamRef::gain(voice.amp()),
                    plan.amp_release,
                    0.0,
                ),
                "release amplitude",
            );
            report(
                release_envelope(
                    &mut self.backend,
                    ParamRef::frequency(voice.filter()),
                    plan.filter_release,
                    voice.base_cutoff(),
                ),
                "release filter",
            );
            voice.stop_generators_at(&mut self.backend, plan.stop_at);

            let id = self.timers.enqueue(
                plan.cleanup_at,
                CleanupTask {
                    voice: voice.index(),
                    note,
                },
            );
            voice.add_timer(id);

            tracing::debug!(note, slot = voice.index(), cleanup_at = plan.cleanup_at, "note off");
        }
    }

    /// Release everything that is still held.
    pub fn all_notes_off(&mut self) {
        let mut held: Vec<u8> = self
            .pool
            .voices()
            .iter()
            .filter(|v| v.is_active())
            .filter_map(Voice::note)
            .collect();
        held.sort_unstable();
        held.dedup();

        for note in held {
            self.note_off(note);
        }
    }

    /// Bend every sounding oscillator. `value` is in [-1, 1].
    pub fn set_pitch_bend(&mut self, value: f32) {
        if self.disposed {
            return;
        }

        let value = if value.is_nan() {
            0.0
        } else {
            value.clamp(-1.0, 1.0)
        };
        self.bend = 2.0_f32.powf(self.config.bend_range_semitones * value / 12.0);

        for voice in self.pool.voices().iter().filter(|v| !v.is_free()) {
            for osc in voice.oscillators() {
                report(
                    ramp_from_current(
                        &mut self.backend,
                        ParamRef::frequency(osc.generator),
                        osc.base_frequency * self.bend,
                        self.config.bend_glide,
                    ),
                    "bend oscillator",
                );
            }
        }
    }

    /// Replace the parameter snapshot and push what changed to the backend.
    pub fn update_params(&mut self, params: SynthParameters) {
        if self.disposed {
            return;
        }

        let previous = std::mem::replace(&mut self.params, params.sanitized());
        let params = &self.params;
        let backend = &mut self.backend;
        let now = backend.now();

        let master = ParamRef::gain(self.master);
        report(backend.cancel_scheduled(master, now), "cancel master volume");
        report(
            backend.set_value_at(master, params.master_volume, now),
            "set master volume",
        );

        if previous.lfo.needs_rebuild(&params.lfo) {
            report(
                self.lfo.rebuild(backend, &params.lfo, self.pool.voices()),
                "rebuild lfo",
            );
        } else {
            report(self.lfo.apply_depths(backend, &params.lfo), "rescale lfo");
        }

        let filter_changed = previous.filter.filter_type != params.filter.filter_type
            || previous.filter.resonance != params.filter.resonance;
        if filter_changed {
            for voice in self
                .pool
                .voices()
                .iter()
                .filter(|v| v.is_active() && !v.is_releasing())
            {
                let q = ParamRef::q(voice.filter());
                report(
                    backend.set_filter_type(voice.filter(), params.filter.filter_type),
                    "set filter type",
                );
                report(backend.cancel_scheduled(q, now), "cancel resonance");
                report(
                    backend.set_value_at(q, params.filter.resonance, now),
                    "set resonance",
                );
            }
        }
    }

    /// Fire cleanup timers that are due on the backend clock.
    ///
    /// Call this regularly from the control loop. Returns the number of
    /// voices that were freed.
    pub fn tick(&mut self) -> usize {
        let now = self.backend.now();
        let mut freed = 0;

        for (id, task) in self.timers.tick(now) {
            let Some(voice) = self.pool.get_mut(task.voice) else {
                continue;
            };
            voice.forget_timer(id);

            if voice.is_releasing() && voice.note() == Some(task.note) {
                voice.stop(&mut self.backend, &mut self.timers, &self.lfo, StopMode::Soft);
                freed += 1;
                tracing::trace!(slot = task.voice, note = task.note, "voice cleaned up");
            }
        }

        freed
    }

    /// Apply one inbound event.
    pub fn handle_message(&mut self, message: SynthMessage) {
        match message {
            SynthMessage::NoteOn { note, velocity } => {
                self.note_on(note, velocity);
            }
            SynthMessage::NoteOff { note } => self.note_off(note),
            SynthMessage::PitchBend { value } => self.set_pitch_bend(value),
            SynthMessage::ControlChange { controller, value } => {
                self.controls[(controller & 0x7f) as usize] = value.min(127);
                tracing::trace!(controller, value, "control change");
            }
            SynthMessage::UpdateParams(params) => self.update_params(*params),
            SynthMessage::AllNotesOff => self.all_notes_off(),
        }
    }

    /// Apply every queued event, then fire due timers. Returns the number of events.
    pub fn drain<R: MessageReceiver + ?Sized>(&mut self, rx: &mut R) -> usize {
        let mut handled = 0;
        while let Some(message) = rx.pop() {
            self.handle_message(message);
            handled += 1;
        }
        self.tick();
        handled
    }

    /// Silence everything and release the backend. Further calls do nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        for voice in self.pool.voices_mut() {
            voice.stop(&mut self.backend, &mut self.timers, &self.lfo, StopMode::Hard);
        }
        self.lfo.teardown(&mut self.backend, self.pool.voices());
        self.timers.clear();

        tolerate(self.backend.disconnect(self.master), "disconnect master");
        if let Err(err) = self.backend.close() {
            tracing::warn!(%err, "failed to close audio backend");
        }
        tracing::debug!("synth engine disposed");
    }

    fn resume_if_suspended(&mut self) {
        if self.backend.state() != ContextState::Suspended {
            return;
        }
        match self.backend.resume() {
            Ok(()) => tracing::debug!("audio backend resumed"),
            Err(err) => tracing::warn!(%err, "failed to resume audio backend"),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Direct access to the backend, e.g. to advance an offline clock.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn params(&self) -> &SynthParameters {
        &self.params
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn voices(&self) -> &[Voice] {
        self.pool.voices()
    }

    pub fn voice(&self, index: usize) -> Option<&Voice> {
        self.pool.get(index)
    }

    /// Number of voices that are active or releasing with `note`.
    pub fn sounding_voices_for(&self, note: u8) -> usize {
        self.pool
            .voices()
            .iter()
            .filter(|v| v.is_sounding(note))
            .count()
    }

    pub fn lfo(&self) -> &LfoRouter {
        &self.lfo
    }

    pub fn master(&self) -> NodeId {
        self.master
    }

    pub fn pitch_bend_multiplier(&self) -> f32 {
        self.bend
    }

    /// Last value received for a MIDI controller.
    pub fn control_value(&self, controller: u8) -> u8 {
        self.controls[(controller & 0x7f) as usize]
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

fn report(result: BackendResult<()>, action: &str) {
    if let Err(err) = result {
        tracing::warn!(%err, action, "backend rejected automation");
    }
}
