use crate::{
    backend::{AudioBackend, BackendResult, ParamRef},
    dsp::filter::clamp_cutoff,
    synth::params::{EnvelopeParams, FilterParams, SynthParameters},
    MIN_RAMP_TIME,
};

/*
Scheduled ADSR Envelopes
========================

Nothing here runs per sample. An envelope is written once, at note-on, as a
short list of automation events on a backend parameter, and rewritten at
note-off. The backend interpolates between the events on its own clock.

Vocabulary
----------

  base      Value the parameter starts from at note-on. 0.0 for amplitude,
            the keyboard-tracked cutoff for the filter.

  peak      Value reached at the end of the attack stage.

  sustain   Value held after the decay stage until note-off.

  target    Value the release stage ramps towards. 0.0 for amplitude, the
            keyboard-tracked cutoff for the filter.

  pin       A set-value event at `now` carrying the value the parameter
            should have right now. Automation always starts with one.


The Shape
---------

  value
   peak ┐      ╱╲
        │     ╱  ╲________________
   sus  │    ╱                    ╲
        │   ╱                      ╲
   base └──●────────────────────────●──────╲──→ time
          now   +A    +D           off      +R
          pin                      pin

Note-on events (at `now`):

    cancel(now)
    set(base, now)
    ramp(peak, now + max(1ms, A))
    ramp(sustain, now + max(1ms, A) + max(1ms, D))

Note-off events (at `now`):

    v = current value
    cancel(now)
    set(v, now)
    ramp(target, now + max(1ms, R))


Pinning
-------

A stolen or retriggered voice reuses the same parameter. Without an explicit
set at `now`, the first ramp would start from whatever event happened to be
last on the timeline, which may be a ramp still in flight from the previous
note. Release pins the *current* value so that releasing during attack or
decay continues from where the curve actually is, not from the sustain level.

Zero-length ramps are numerically degenerate on automation timelines, so every
stage lasts at least one millisecond.
*/

/// Program attack and decay, with the sustain level given as a proportion of `peak`.
pub fn apply_envelope<B: AudioBackend + ?Sized>(
    backend: &mut B,
    param: ParamRef,
    envelope: &EnvelopeParams,
    base: f32,
    peak: f32,
    sustain_proportion: f32,
) -> BackendResult<()> {
    apply_envelope_to(backend, param, envelope, base, peak, sustain_proportion * peak)
}

/// Program attack and decay towards an absolute sustain value.
pub fn apply_envelope_to<B: AudioBackend + ?Sized>(
    backend: &mut B,
    param: ParamRef,
    envelope: &EnvelopeParams,
    base: f32,
    peak: f32,
    sustain_value: f32,
) -> BackendResult<()> {
    let now = backend.now();
    let attack_end = now + stage_time(envelope.attack);
    let decay_end = attack_end + stage_time(envelope.decay);

    backend.cancel_scheduled(param, now)?;
    backend.set_value_at(param, base, now)?;
    backend.linear_ramp_to(param, peak, attack_end)?;
    backend.linear_ramp_to(param, sustain_value, decay_end)
}

/// Program the release stage from wherever the parameter currently is.
pub fn release_envelope<B: AudioBackend + ?Sized>(
    backend: &mut B,
    param: ParamRef,
    release_time: f32,
    target: f32,
) -> BackendResult<()> {
    ramp_from_current(backend, param, target, stage_time(release_time))
}

/// Pin the parameter where it is right now and ramp to `target` over `duration`.
pub fn ramp_from_current<B: AudioBackend + ?Sized>(
    backend: &mut B,
    param: ParamRef,
    target: f32,
    duration: f64,
) -> BackendResult<()> {
    let now = backend.now();
    let current = backend.current_value(param)?;

    backend.cancel_scheduled(param, now)?;
    backend.set_value_at(param, current, now)?;
    backend.linear_ramp_to(param, target, now + duration.max(MIN_RAMP_TIME))
}

/// Duration of a stage, never shorter than one millisecond.
#[inline]
pub fn stage_time(seconds: f32) -> f64 {
    if seconds.is_nan() {
        return MIN_RAMP_TIME;
    }
    (seconds as f64).max(MIN_RAMP_TIME)
}

/// Hz of cutoff shift per semitone away from middle C at full tracking.
const TRACKING_HZ_PER_SEMITONE: f32 = 20.0;
/// Hz of cutoff sweep at full envelope amount.
const ENVELOPE_SWEEP_HZ: f32 = 5000.0;
const TRACKING_REFERENCE_NOTE: i32 = 60;

/// Cutoff a voice returns to after its filter envelope, shifted with pitch.
pub fn keyboard_tracked_cutoff(filter: &FilterParams, note: u8, sample_rate: f32) -> f32 {
    let mut cutoff = filter.cutoff_hz;
    if filter.keyboard_tracking > 0.0 {
        let semitones = (note as i32 - TRACKING_REFERENCE_NOTE) as f32;
        cutoff += semitones * filter.keyboard_tracking * TRACKING_HZ_PER_SEMITONE;
    }
    clamp_cutoff(cutoff, sample_rate)
}

/// Envelope levels for one note, derived from a parameter snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteTargets {
    /// Amplitude reached at the end of the attack stage.
    pub amp_peak: f32,
    pub base_cutoff: f32,
    pub filter_peak: f32,
    pub filter_sustain: f32,
}

impl NoteTargets {
    pub fn derive(params: &SynthParameters, note: u8, velocity: u8, sample_rate: f32) -> Self {
        let amount = params.filter.envelope_amount;
        let base_cutoff = keyboard_tracked_cutoff(&params.filter, note, sample_rate);
        let filter_peak = clamp_cutoff(base_cutoff + amount * ENVELOPE_SWEEP_HZ, sample_rate);
        let filter_sustain = clamp_cutoff(
            base_cutoff + params.filter_envelope.sustain * amount * ENVELOPE_SWEEP_HZ,
            sample_rate,
        );

        Self {
            amp_peak: velocity.min(127) as f32 / 127.0,
            base_cutoff,
            filter_peak,
            filter_sustain,
        }
    }
}

/// Timing of a note-off, relative to the moment the key was released.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReleasePlan {
    pub amp_release: f32,
    pub filter_release: f32,
    /// Absolute time at which every generator of the voice stops.
    pub stop_at: f64,
    /// Absolute time at which the voice is cleaned up if nothing reused it.
    pub cleanup_at: f64,
}

impl ReleasePlan {
    pub fn new(params: &SynthParameters, now: f64, stop_margin: f64, cleanup_margin: f64) -> Self {
        let amp_release = params.amp_envelope.release;
        let filter_release = params.filter_envelope.release;
        let longest = stage_time(amp_release).max(stage_time(filter_release));

        Self {
            amp_release,
            filter_release,
            stop_at: now + longest + stop_margin,
            cleanup_at: now + longest + cleanup_margin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{offline::OfflineBackend, AudioBackend};

    fn env(attack: f32, decay: f32, sustain: f32, release: f32) -> EnvelopeParams {
        EnvelopeParams {
            attack,
            decay,
            sustain,
            release,
        }
    }

    #[test]
    fn attack_and_decay_reach_peak_then_sustain() {
        let mut backend = OfflineBackend::new(48_000.0);
        let gain = ParamRef::gain(backend.create_gain().unwrap());
        backend.advance(1.0);

        apply_envelope(&mut backend, gain, &env(0.1, 0.2, 0.5, 0.3), 0.0, 0.8, 0.5).unwrap();

        assert_eq!(backend.value_at(gain, 1.0), Some(0.0));
        assert!((backend.value_at(gain, 1.05).unwrap() - 0.4).abs() < 1e-4);
        assert!((backend.value_at(gain, 1.1).unwrap() - 0.8).abs() < 1e-5);
        assert!((backend.value_at(gain, 1.3).unwrap() - 0.4).abs() < 1e-5);
        assert!((backend.value_at(gain, 5.0).unwrap() - 0.4).abs() < 1e-5);
    }

    #[test]
    fn zero_length_stages_are_stretched_to_a_millisecond() {
        let mut backend = OfflineBackend::new(48_000.0);
        let gain = ParamRef::gain(backend.create_gain().unwrap());

        apply_envelope(&mut backend, gain, &env(0.0, 0.0, 1.0, 0.0), 0.0, 1.0, 1.0).unwrap();

        let events = backend.timeline(gain).unwrap().events();
        assert_eq!(events.len(), 3);
        assert!((events[1].time() - 0.001).abs() < 1e-9);
        assert!((events[2].time() - 0.002).abs() < 1e-9);
    }

    #[test]
    fn release_starts_from_current_value_mid_attack() {
        let mut backend = OfflineBackend::new(48_000.0);
        let gain = ParamRef::gain(backend.create_gain().unwrap());

        apply_envelope(&mut backend, gain, &env(1.0, 0.5, 0.5, 0.5), 0.0, 1.0, 0.5).unwrap();
        backend.advance(0.25);
        release_envelope(&mut backend, gain, 0.5, 0.0).unwrap();

        assert!((backend.value_at(gain, 0.25).unwrap() - 0.25).abs() < 1e-5);
        assert!((backend.value_at(gain, 0.5).unwrap() - 0.125).abs() < 1e-5);
        assert_eq!(backend.value_at(gain, 0.75), Some(0.0));
    }

    #[test]
    fn reapplying_discards_stale_ramp() {
        let mut backend = OfflineBackend::new(48_000.0);
        let gain = ParamRef::gain(backend.create_gain().unwrap());

        apply_envelope(&mut backend, gain, &env(2.0, 1.0, 1.0, 1.0), 0.0, 1.0, 1.0).unwrap();
        backend.advance(1.0);
        apply_envelope(&mut backend, gain, &env(0.1, 0.1, 0.2, 0.1), 0.0, 0.5, 0.2).unwrap();

        assert_eq!(backend.value_at(gain, 1.0), Some(0.0));
        assert!((backend.value_at(gain, 3.0).unwrap() - 0.1).abs() < 1e-5);
    }

    #[test]
    fn keyboard_tracking_shifts_cutoff_around_middle_c() {
        let filter = FilterParams {
            cutoff_hz: 1_000.0,
            keyboard_tracking: 0.5,
            ..FilterParams::default()
        };
        assert_eq!(keyboard_tracked_cutoff(&filter, 60, 48_000.0), 1_000.0);
        assert_eq!(keyboard_tracked_cutoff(&filter, 72, 48_000.0), 1_120.0);
        assert_eq!(keyboard_tracked_cutoff(&filter, 48, 48_000.0), 880.0);

        let untracked = FilterParams {
            keyboard_tracking: 0.0,
            ..filter
        };
        assert_eq!(keyboard_tracked_cutoff(&untracked, 96, 48_000.0), 1_000.0);
    }

    #[test]
    fn note_targets_clamp_filter_sweep() {
        let mut params = SynthParameters::default();
        params.filter.cutoff_hz = 200.0;
        params.filter.keyboard_tracking = 0.0;
        params.filter.envelope_amount = -1.0;
        params.filter_envelope.sustain = 0.5;

        let targets = NoteTargets::derive(&params, 60, 127, 48_000.0);
        assert_eq!(targets.amp_peak, 1.0);
        assert_eq!(targets.base_cutoff, 200.0);
        assert_eq!(targets.filter_peak, 20.0);
        assert_eq!(targets.filter_sustain, 20.0);

        params.filter.envelope_amount = 1.0;
        let targets = NoteTargets::derive(&params, 60, 100, 8_000.0);
        assert_eq!(targets.filter_peak, 4_000.0);
        assert_eq!(targets.filter_sustain, 2_700.0);
        assert!((targets.amp_peak - 100.0 / 127.0).abs() < 1e-6);
    }

    #[test]
    fn release_plan_uses_longest_release() {
        let mut params = SynthParameters::default();
        params.amp_envelope.release = 0.3;
        params.filter_envelope.release = 0.8;

        let plan = ReleasePlan::new(&params, 2.0, 0.05, 0.1);
        assert!((plan.stop_at - 2.85).abs() < 1e-9);
        assert!((plan.cleanup_at - 2.9).abs() < 1e-9);
    }
}
