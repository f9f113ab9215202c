use polyvoice::{
    backend::{offline::Endpoint, AudioBackend, ContextState, ParamRef},
    dsp::oscillator::tuned_frequency,
    EngineConfig, OfflineBackend, SynthEngine, SynthParameters,
};

const SR: f32 = 48_000.0;

fn engine_with(polyphony: usize, params: SynthParameters) -> SynthEngine<OfflineBackend> {
    SynthEngine::new(
        OfflineBackend::new(SR),
        EngineConfig::default()
            .polyphony(polyphony)
            .noise_seconds(0.1),
        params,
    )
    .unwrap()
}

fn engine(polyphony: usize) -> SynthEngine<OfflineBackend> {
    engine_with(polyphony, SynthParameters::default())
}

/// Two oscillators at the same octave, the second one detuned.
fn layered() -> SynthParameters {
    let mut params = SynthParameters::default();
    params.oscillators[1].enabled = true;
    params.oscillators[1].octave = 0;
    params.oscillators[1].detune_cents = 7.0;
    params.oscillators[1].level = 0.5;
    params
}

fn amp_at(synth: &SynthEngine<OfflineBackend>, slot: usize, time: f64) -> f32 {
    let amp = synth.voice(slot).unwrap().amp();
    synth.backend().value_at(ParamRef::gain(amp), time).unwrap()
}

fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 1e-3,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn notes_within_polyphony_get_distinct_slots() {
    let mut synth = engine(8);
    let mut slots: Vec<usize> = (60..68)
        .map(|note| {
            synth.backend_mut().advance(0.01);
            synth.note_on(note, 100).unwrap()
        })
        .collect();
    slots.sort_unstable();
    slots.dedup();
    assert_eq!(slots.len(), 8);

    for note in 60..68 {
        assert_eq!(synth.sounding_voices_for(note), 1);
    }
}

#[test]
fn retriggering_never_doubles_a_note() {
    let mut synth = engine(4);
    let first = synth.note_on(60, 100).unwrap();
    synth.backend_mut().advance(0.1);
    let again = synth.note_on(60, 80).unwrap();
    assert_eq!(first, again);
    assert_eq!(synth.sounding_voices_for(60), 1);

    // Retrigger during the release tail reuses the same slot too.
    synth.note_off(60);
    synth.backend_mut().advance(0.05);
    assert_eq!(synth.note_on(60, 100), Some(first));
    assert_eq!(synth.sounding_voices_for(60), 1);
    assert!(synth.voice(first).unwrap().is_active());
}

#[test]
fn ninth_note_steals_the_first() {
    let mut synth = engine(8);
    let first = synth.note_on(48, 100).unwrap();
    for note in 49..56 {
        synth.backend_mut().advance(0.01);
        synth.note_on(note, 100);
    }

    synth.backend_mut().advance(0.01);
    let ninth = synth.note_on(56, 100).unwrap();

    assert_eq!(ninth, first);
    assert_eq!(synth.sounding_voices_for(48), 0);
    assert_eq!(synth.voice(ninth).unwrap().note(), Some(56));
    for note in 49..57 {
        assert_eq!(synth.sounding_voices_for(note), 1);
    }
}

#[test]
fn releasing_voices_are_stolen_before_active_ones() {
    let mut synth = engine(4);
    let mut slots = Vec::new();
    for note in [60, 62, 64, 65] {
        slots.push(synth.note_on(note, 100).unwrap());
        synth.backend_mut().advance(0.01);
    }

    // 64 is released after 62, but 62 was struck earlier.
    synth.note_off(64);
    synth.note_off(62);

    assert_eq!(synth.note_on(70, 100), Some(slots[1]));
    assert_eq!(synth.note_on(72, 100), Some(slots[2]));
    // No releasing voice left: the oldest active one goes.
    assert_eq!(synth.note_on(74, 100), Some(slots[0]));
}

#[test]
fn released_voice_is_freed_after_its_tail() {
    let mut synth = engine(4);
    let slot = synth.note_on(60, 100).unwrap();
    synth.backend_mut().advance(0.5);
    synth.note_off(60);

    let params = synth.params().clone();
    let longest = params
        .amp_envelope
        .release
        .max(params.filter_envelope.release) as f64;

    synth.backend_mut().advance(longest);
    assert_eq!(synth.tick(), 0);
    assert!(synth.voice(slot).unwrap().is_releasing());

    synth.backend_mut().advance(0.15);
    assert_eq!(synth.tick(), 1);

    let voice = synth.voice(slot).unwrap();
    assert!(!voice.is_active());
    assert!(!voice.is_releasing());
    assert!(voice.is_free());
    assert!(!voice.has_components());
    assert_eq!(synth.backend().live_sources(), 0);
    assert_eq!(synth.pending_timers(), 0);
}

#[test]
fn quick_on_off_on_leaves_no_stale_cleanup() {
    let mut synth = engine(4);
    let slot = synth.note_on(60, 100).unwrap();
    synth.note_off(60);
    assert_eq!(synth.note_on(60, 100), Some(slot));

    assert_eq!(synth.sounding_voices_for(60), 1);
    assert_eq!(synth.pending_timers(), 0);

    synth.backend_mut().advance(5.0);
    assert_eq!(synth.tick(), 0);

    let voice = synth.voice(slot).unwrap();
    assert!(voice.is_active());
    assert!(voice.has_components());
}

#[test]
fn zero_bend_restores_tuned_frequencies() {
    let mut synth = engine_with(4, layered());
    let slot = synth.note_on(60, 100).unwrap();

    synth.set_pitch_bend(1.0);
    assert_close(synth.pitch_bend_multiplier(), 2f32.powf(2.0 / 12.0));

    synth.backend_mut().advance(0.05);
    synth.set_pitch_bend(0.0);
    assert_eq!(synth.pitch_bend_multiplier(), 1.0);
    synth.backend_mut().advance(0.05);

    let now = synth.backend().now();
    let voice = synth.voice(slot).unwrap();
    assert_eq!(voice.oscillators().len(), 2);
    for (osc, expected) in voice
        .oscillators()
        .iter()
        .zip([tuned_frequency(60, 0, 0.0), tuned_frequency(60, 0, 7.0)])
    {
        assert_close(osc.base_frequency, expected);
        let hz = synth
            .backend()
            .value_at(ParamRef::frequency(osc.generator), now)
            .unwrap();
        assert!((hz - expected).abs() < 0.01, "{hz} vs {expected}");
    }
}

#[test]
fn middle_c_envelope_follows_the_parameters() {
    let mut synth = engine_with(8, layered());
    let slot = synth.note_on(60, 100).unwrap();
    let params = synth.params().clone();
    let env = params.amp_envelope;
    let peak = 100.0 / 127.0;

    assert_eq!(synth.voice(slot).unwrap().oscillators().len(), 2);
    assert_close(amp_at(&synth, slot, 0.0), 0.0);
    assert_close(amp_at(&synth, slot, env.attack as f64 / 2.0), peak / 2.0);
    assert_close(amp_at(&synth, slot, env.attack as f64), peak);
    assert_close(
        amp_at(&synth, slot, (env.attack + env.decay) as f64),
        env.sustain * peak,
    );

    synth.backend_mut().advance(2.0);
    synth.note_off(60);
    let sustain = env.sustain * peak;
    assert_close(amp_at(&synth, slot, 2.0), sustain);
    assert_close(
        amp_at(&synth, slot, 2.0 + env.release as f64 / 2.0),
        sustain / 2.0,
    );
    assert_close(amp_at(&synth, slot, 2.0 + env.release as f64), 0.0);

    let longest = env.release.max(params.filter_envelope.release) as f64;
    synth.backend_mut().advance(longest + 0.15);
    synth.tick();
    assert!(synth.voice(slot).unwrap().is_free());
}

#[test]
fn lfo_taps_follow_depth_changes() {
    let mut params = SynthParameters::default();
    params.lfo.enabled = true;
    params.lfo.pitch_depth = 0.5;
    let mut synth = engine_with(4, params.clone());

    let slot = synth.note_on(60, 100).unwrap();
    let voice = synth.voice(slot).unwrap();
    let generator = voice.oscillators()[0].generator;
    let cutoff = ParamRef::frequency(voice.filter());
    let pitch_tap = synth.lfo().pitch_tap().unwrap();

    assert!(synth
        .backend()
        .is_connected(pitch_tap, Endpoint::Param(ParamRef::detune(generator))));
    assert_close(
        synth
            .backend()
            .current_value(ParamRef::gain(pitch_tap))
            .unwrap(),
        50.0,
    );

    // Filter depth leaving zero rebuilds the graph and wires the cutoff.
    params.lfo.filter_depth = 0.25;
    synth.update_params(params.clone());
    let filter_tap = synth.lfo().filter_tap().unwrap();
    assert!(synth
        .backend()
        .is_connected(filter_tap, Endpoint::Param(cutoff)));
    assert_close(
        synth
            .backend()
            .current_value(ParamRef::gain(filter_tap))
            .unwrap(),
        250.0,
    );

    params.lfo.enabled = false;
    synth.update_params(params);
    assert!(!synth.lfo().is_enabled());
    assert!(!synth.backend().contains(filter_tap));
}

#[test]
fn dispose_silences_and_closes() {
    let mut synth = engine(4);
    synth.note_on(60, 100);
    synth.note_on(64, 100);
    synth.note_off(60);

    synth.dispose();
    assert!(synth.is_disposed());
    assert_eq!(synth.backend().state(), ContextState::Closed);
    assert_eq!(synth.backend().live_sources(), 0);
    assert_eq!(synth.pending_timers(), 0);
    assert!(synth.voices().iter().all(|v| v.is_free()));

    assert_eq!(synth.note_on(67, 100), None);
    synth.dispose();
}

#[test]
fn zero_polyphony_drops_every_note() {
    let mut synth = engine(0);
    assert!(synth.voices().is_empty());
    assert_eq!(synth.note_on(60, 100), None);
    synth.note_off(60);
    synth.set_pitch_bend(0.3);
    assert_eq!(synth.tick(), 0);
}
