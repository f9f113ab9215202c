//! Precomputed noise buffers.

/*
Noise Sources
=============

The backend can only loop buffers, so noise is rendered once up front and
shared by every voice. Two colours are provided.

  white   Independent uniform samples in [-1, 1]. Flat spectrum.

  pink    White noise through a bank of one-pole lowpass sections with
          staggered corner frequencies (Paul Kellet's refined method).
          The weighted sum approximates a -3 dB/octave slope.

Pink Filter
-----------

Each pole keeps a running state `b[i]` and is updated per sample:

    b[i] = a[i] * b[i] + w[i] * white

    pink = sum(b[0..6]) + b6 + white * 0.5362

b6 is a one-sample delayed copy of the input and is not part of the
running bank. The raw sum peaks well above 1.0, so the whole buffer is
normalized to a peak of 1.0 after rendering instead of using a fixed
scale factor.

Looping a short buffer is audible as a periodic "whoosh" below roughly one
second, so the default length is two seconds.
*/

use std::sync::Arc;

use rand::{rngs::SmallRng, Rng, SeedableRng};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoiseColor {
    #[default]
    White,
    Pink,
}

const PINK_POLES: [(f32, f32); 6] = [
    (0.99886, 0.055_517_9),
    (0.99332, 0.075_075_9),
    (0.96900, 0.153_852),
    (0.86650, 0.310_485_6),
    (0.55000, 0.532_952_2),
    (-0.7616, -0.016_898),
];

/// White and pink looping buffers, rendered once.
#[derive(Debug, Clone)]
pub struct NoiseBuffers {
    white: Arc<[f32]>,
    pink: Arc<[f32]>,
}

impl NoiseBuffers {
    pub fn new(sample_rate: f32, seconds: f32, seed: u64) -> Self {
        let frames = ((sample_rate * seconds).round() as usize).max(1);
        let mut rng = SmallRng::seed_from_u64(seed);

        let white: Vec<f32> = (0..frames)
            .map(|_| rng.random_range(-1.0f32..=1.0))
            .collect();
        let pink = pinken(&white);

        Self {
            white: white.into(),
            pink: pink.into(),
        }
    }

    pub fn get(&self, color: NoiseColor) -> Arc<[f32]> {
        match color {
            NoiseColor::White => Arc::clone(&self.white),
            NoiseColor::Pink => Arc::clone(&self.pink),
        }
    }

    pub fn frames(&self) -> usize {
        self.white.len()
    }
}

fn pinken(white: &[f32]) -> Vec<f32> {
    let mut state = [0.0f32; 6];
    let mut b6 = 0.0f32;

    let mut pink: Vec<f32> = white
        .iter()
        .map(|&w| {
            for (b, &(a, weight)) in state.iter_mut().zip(PINK_POLES.iter()) {
                *b = a * *b + w * weight;
            }
            let out = state.iter().sum::<f32>() + b6 + w * 0.5362;
            b6 = w * 0.115_926;
            out
        })
        .collect();

    normalize(&mut pink);
    pink
}

fn normalize(buffer: &mut [f32]) {
    let peak = buffer.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()));
    if peak > 0.0 {
        let scale = peak.recip();
        buffer.iter_mut().for_each(|s| *s *= scale);
    }
}
