//! Stand-in sample library for runs without recorded audio.

use std::f32::consts::TAU;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use turret_behavior::sample_catalog;
use turret_player::{config::SAMPLE_RATE, MemorySource};

const AMPLITUDE: f32 = 90.0;

/// One synthesized clip for every identifier in the catalog.
pub fn library(seed: u64) -> MemorySource {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut source = MemorySource::new();
    for group in sample_catalog() {
        for (index, id) in group.ids.iter().enumerate() {
            let data = match group.label {
                "firing" => crackle(&mut rng, 0.45),
                "wings" => sweep(220.0, 110.0, 0.4),
                label => {
                    let pitch = base_pitch(label) * (1.0 + index as f32 * 0.12);
                    sweep(pitch, pitch * 1.5, 0.8)
                }
            };
            source.insert(*id, data);
        }
    }
    source
}

fn base_pitch(label: &str) -> f32 {
    match label {
        "alert" => 660.0,
        "search" => 520.0,
        "retire" => 330.0,
        "pickup" => 880.0,
        _ => 250.0,
    }
}

fn frames(seconds: f32) -> usize {
    (SAMPLE_RATE as f32 * seconds) as usize
}

/// Fades in and out over the first and last tenth.
fn envelope(i: usize, len: usize) -> f32 {
    let edge = (len / 10).max(1) as f32;
    let from_end = (len - i) as f32;
    (i as f32 / edge).min(from_end / edge).min(1.0)
}

fn to_byte(value: f32) -> u8 {
    (value.round().clamp(-128.0, 127.0) as i8) as u8
}

fn sweep(from_hz: f32, to_hz: f32, seconds: f32) -> Vec<u8> {
    let len = frames(seconds);
    let mut phase = 0.0_f32;
    (0..len)
        .map(|i| {
            let progress = i as f32 / len as f32;
            let hz = from_hz + (to_hz - from_hz) * progress;
            phase = (phase + TAU * hz / SAMPLE_RATE as f32) % TAU;
            to_byte(phase.sin() * AMPLITUDE * envelope(i, len))
        })
        .collect()
}

fn crackle(rng: &mut SmallRng, seconds: f32) -> Vec<u8> {
    let len = frames(seconds);
    let shot = len / 3;
    (0..len)
        .map(|i| {
            let decay = 1.0 - (i % shot) as f32 / shot as f32;
            to_byte(rng.gen_range(-1.0_f32..1.0) * AMPLITUDE * decay * decay)
        })
        .collect()
}
