use crate::{
    backend::{AudioBackend, BackendResult, NodeId},
    engine::scheduler::Scheduler,
    synth::{
        modulation::LfoRouter,
        voice::{CleanupTask, StopMode, Voice},
    },
};

/*
Voice Allocation
================

The pool has a fixed number of slots. When a note arrives, the first rule
that matches picks the slot:

  1. retrigger        a slot already holding this note (active or releasing)
  2. free             a slot that is neither active nor releasing
  3. steal releasing  the oldest slot that is releasing and not active
  4. steal active     the oldest slot that is active and not releasing
  5. fallback         the oldest slot that is not free (inconsistent flags)
  6. nothing          only when the pool has zero slots

"Oldest" means the smallest note-on time. Ties go to the lowest slot index.

Retriggering in place means two slots never sound the same pitch at once.

Every rule other than "free" hard-stops the chosen slot before handing it
out, which cancels its cleanup timers and disconnects its old components.
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationKind {
    Retrigger,
    Free,
    StealReleasing,
    StealActive,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub index: usize,
    pub kind: AllocationKind,
}

/// Fixed-size set of voices plus the policy that hands them out.
#[derive(Debug)]
pub struct VoicePool {
    voices: Vec<Voice>,
}

impl VoicePool {
    /// Build `polyphony` voices, all wired into `output`.
    pub fn new<B: AudioBackend + ?Sized>(
        polyphony: usize,
        backend: &mut B,
        output: NodeId,
        base_cutoff: f32,
    ) -> BackendResult<Self> {
        let voices = (0..polyphony)
            .map(|index| Voice::new(index, backend, output, base_cutoff))
            .collect::<BackendResult<Vec<_>>>()?;
        Ok(Self { voices })
    }

    /// Decide which slot `note` should go to, without touching any voice.
    pub fn select(&self, note: u8) -> Option<Allocation> {
        let pick = |index: usize, kind| Some(Allocation { index, kind });

        if let Some(v) = self.voices.iter().find(|v| v.is_sounding(note)) {
            return pick(v.index(), AllocationKind::Retrigger);
        }
        if let Some(v) = self.voices.iter().find(|v| v.is_free()) {
            return pick(v.index(), AllocationKind::Free);
        }
        if let Some(index) = self.oldest(|v| v.is_releasing() && !v.is_active()) {
            return pick(index, AllocationKind::StealReleasing);
        }
        if let Some(index) = self.oldest(|v| v.is_active() && !v.is_releasing()) {
            return pick(index, AllocationKind::StealActive);
        }
        self.oldest(|v| !v.is_free())
            .and_then(|index| pick(index, AllocationKind::Fallback))
    }

    /// Pick a slot for `note` and make it ready for reuse.
    pub fn allocate<B: AudioBackend + ?Sized>(
        &mut self,
        note: u8,
        backend: &mut B,
        timers: &mut Scheduler<CleanupTask>,
        lfo: &LfoRouter,
    ) -> Option<Allocation> {
        let allocation = self.select(note)?;

        if allocation.kind != AllocationKind::Free {
            let voice = &mut self.voices[allocation.index];
            tracing::debug!(
                slot = allocation.index,
                kind = ?allocation.kind,
                old_note = ?voice.note(),
                note,
                "reusing voice"
            );
            voice.stop(backend, timers, lfo, StopMode::Reuse);
        }

        Some(allocation)
    }

    fn oldest(&self, predicate: impl Fn(&Voice) -> bool) -> Option<usize> {
        self.voices
            .iter()
            .filter(|v| predicate(v))
            .min_by(|a, b| {
                a.start_time()
                    .total_cmp(&b.start_time())
                    .then(a.index().cmp(&b.index()))
            })
            .map(Voice::index)
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voices_mut(&mut self) -> &mut [Voice] {
        &mut self.voices
    }

    pub fn get(&self, index: usize) -> Option<&Voice> {
        self.voices.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Voice> {
        self.voices.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}
