//! Synthetic observation data for the search overlay.
//!
//! Both plots are pure functions of a [`SignalRequest`]. The overlay feeds either
//! a live seed (recomputed on every qualifying cursor move) or the seed frozen at
//! capture, so a frozen request always reproduces the same buffers bit for bit.

use std::f64::consts::TAU;

use crate::constants::{
    get_difficulty_profile, DECOY_MIN_DISTANCE, RESIDUAL_PEAK_FLOOR, SPECTRUM_LEN,
    SPECTRUM_MAX_HZ, TIME_SERIES_LEN,
};
use crate::rng::{seed_from_parts, Rng};
use crate::types::Difficulty;

/// Upper bound for peak positions on the normalized frequency axis.
pub const MAX_POSITION: f64 = 0.999;

const HARMONIC_WEIGHTS: [f64; 3] = [1.0, 0.45, 0.25];
const DECOY_PLACEMENT_ATTEMPTS: usize = 24;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SignalConfig {
    pub time_series_len: usize,
    pub spectrum_len: usize,
    pub max_hz: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            time_series_len: TIME_SERIES_LEN,
            spectrum_len: SPECTRUM_LEN,
            max_hz: SPECTRUM_MAX_HZ,
        }
    }
}

impl SignalConfig {
    pub fn normalized_position(&self, frequency_hz: f64) -> f64 {
        if !frequency_hz.is_finite() || self.max_hz <= 0.0 {
            return 0.0;
        }
        (frequency_hz / self.max_hz).clamp(0.0, MAX_POSITION)
    }

    pub fn position_to_hz(&self, position: f64) -> f64 {
        position.clamp(0.0, 1.0) * self.max_hz
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SignalRequest {
    pub seed: u32,
    pub difficulty: Difficulty,
    /// Normalized fundamental of the target in play, if any.
    pub target_position: Option<f64>,
    pub proximity: f64,
    /// Whether the target passed the visibility threshold; gates target peaks and micro-spikes.
    pub visible: bool,
    /// Cursor x across the viewport in [0, 1]; drives ripple amplitude.
    pub ripple: f64,
}

impl SignalRequest {
    pub fn noise(seed: u32, difficulty: Difficulty, ripple: f64) -> Self {
        Self {
            seed,
            difficulty,
            target_position: None,
            proximity: 0.0,
            visible: false,
            ripple,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SignalFrame {
    pub seed: u32,
    pub time_series: Vec<f32>,
    pub spectrum: Vec<f32>,
}

pub fn synthesize(request: &SignalRequest, config: &SignalConfig) -> SignalFrame {
    SignalFrame {
        seed: request.seed,
        time_series: synthesize_time_series(request, config.time_series_len),
        spectrum: synthesize_spectrum(request, config.spectrum_len),
    }
}

pub fn live_seed(page_key: &str, salt: u32, cell: Option<usize>, nonce: u64, x: f64, y: f64) -> u32 {
    let cell_text = cell.map_or_else(|| "none".to_string(), |cell| cell.to_string());
    seed_from_parts(&[
        "live",
        page_key,
        &salt.to_string(),
        &cell_text,
        &nonce.to_string(),
        &format!("{}", x.round() as i64),
        &format!("{}", y.round() as i64),
    ])
}

/// Fundamental plus the 2nd and 3rd harmonics, clamped onto the axis.
pub fn harmonic_positions(position: f64) -> [f64; 3] {
    [
        position.clamp(0.0, MAX_POSITION),
        (position * 2.0).clamp(0.0, MAX_POSITION),
        (position * 3.0).clamp(0.0, MAX_POSITION),
    ]
}

pub fn synthesize_time_series(request: &SignalRequest, len: usize) -> Vec<f32> {
    let seed_text = request.seed.to_string();
    let mut rng = Rng::from_parts(&["series", &seed_text]);

    let ar_coeff = rng.range(0.82, 0.95);
    let ar_scale = rng.range(0.15, 0.30);
    let white_scale = rng.range(0.05, 0.12);
    let spike_chance = rng.range(0.002, 0.006);

    let burst_count = rng.int(0, 3) as usize;
    let bursts: Vec<(f64, f64, f64)> = (0..burst_count)
        .map(|_| {
            let center = rng.next_f64() * len as f64;
            let width = rng.range(4.0, 30.0);
            let sign = if rng.bool(0.5) { 1.0 } else { -1.0 };
            (center, width, sign * rng.range(0.3, 0.9))
        })
        .collect();

    let proximity = request.proximity.clamp(0.0, 1.0);
    let micro_enabled = request.visible && request.target_position.is_some();
    let micro_chance = 0.002 + 0.02 * proximity;

    let mut ar = 0.0;
    let mut out = Vec::with_capacity(len);
    for idx in 0..len {
        ar = ar_coeff * ar + ar_scale * rng.signed_unit();
        let mut sample = ar + white_scale * rng.signed_unit();

        for (center, width, amplitude) in &bursts {
            sample += amplitude * gaussian(idx as f64, *center, *width);
        }

        let spike_roll = rng.next_f64();
        let spike_amp = rng.range(0.8, 1.6);
        let spike_up = rng.bool(0.5);
        if spike_roll < spike_chance {
            sample += if spike_up { spike_amp } else { -spike_amp };
        }

        // Drawn unconditionally so the noise floor is identical with and without a target.
        let micro_roll = rng.next_f64();
        let micro_amp = rng.range(0.4, 1.0) * (0.5 + 0.5 * proximity);
        if micro_enabled && micro_roll < micro_chance {
            sample += micro_amp;
        }

        out.push(sample as f32);
    }
    out
}

pub fn synthesize_spectrum(request: &SignalRequest, len: usize) -> Vec<f32> {
    let profile = get_difficulty_profile(request.difficulty);
    let seed_text = request.seed.to_string();
    let mut rng = Rng::from_parts(&["spectrum", &seed_text]);

    let base_height = rng.range(0.25, 0.45);
    let base_decay = rng.range(2.5, 5.0);
    let base_floor = rng.range(0.02, 0.06);
    let noise_amp = rng.range(0.03, 0.06);
    let ripple_amp = 0.015 + 0.035 * request.ripple.clamp(0.0, 1.0);
    let ripple_cycles = rng.range(2.0, 5.0);
    let ripple_phase = rng.range(0.0, TAU);

    let avoid: Vec<f64> = request
        .target_position
        .map(|position| harmonic_positions(position).to_vec())
        .unwrap_or_default();
    let mut decoy_rng = Rng::from_parts(&["decoys", &seed_text]);
    let decoys: Vec<(f64, f64, f64)> = place_decoys(&mut decoy_rng, profile.decoys, &avoid)
        .into_iter()
        .map(|position| {
            let amplitude = decoy_rng.range(0.25, 0.6) * profile.peak_amplitude;
            let width = profile.peak_width * decoy_rng.range(0.8, 1.6);
            (position, width, amplitude)
        })
        .collect();

    let mut bump_rng = Rng::from_parts(&["bumps", &seed_text]);
    let bump_count = bump_rng.int(0, 2) as usize;
    let bumps: Vec<(f64, f64, f64)> = (0..bump_count)
        .map(|_| {
            let position = bump_rng.range(0.02, MAX_POSITION);
            let width = bump_rng.range(0.003, 0.02);
            (position, width, bump_rng.range(0.08, 0.2))
        })
        .collect();

    let peaks: Vec<(f64, f64, f64)> = match request.target_position {
        Some(position) if request.visible => {
            let amplitude = peak_gain(request.difficulty, request.proximity);
            harmonic_positions(position)
                .into_iter()
                .zip(HARMONIC_WEIGHTS)
                .map(|(center, weight)| (center, profile.peak_width, amplitude * weight))
                .collect()
        }
        _ => Vec::new(),
    };

    let mut out = Vec::with_capacity(len);
    for idx in 0..len {
        let x = idx as f64 / len as f64;
        let mut value = base_height * (-x * base_decay).exp() + base_floor;
        value += noise_amp * rng.signed_unit();
        value += ripple_amp * (TAU * ripple_cycles * x + ripple_phase).sin();
        for (center, width, amplitude) in decoys.iter().chain(&bumps).chain(&peaks) {
            value += amplitude * gaussian(x, *center, *width);
        }
        out.push(value as f32);
    }
    out
}

/// Fundamental amplitude of a visible target: a faint residual floor, full strength on the hotspot.
pub fn peak_gain(difficulty: Difficulty, proximity: f64) -> f64 {
    let proximity = proximity.clamp(0.0, 1.0);
    get_difficulty_profile(difficulty).peak_amplitude
        * (RESIDUAL_PEAK_FLOOR + (1.0 - RESIDUAL_PEAK_FLOOR) * proximity)
}

/// Draws decoy positions that keep `DECOY_MIN_DISTANCE` from every position in
/// `avoid`. A decoy that cannot be placed is dropped rather than forced.
pub(crate) fn place_decoys(rng: &mut Rng, count: usize, avoid: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        for _ in 0..DECOY_PLACEMENT_ATTEMPTS {
            let candidate = rng.range(0.02, MAX_POSITION);
            if avoid
                .iter()
                .all(|position| (candidate - position).abs() >= DECOY_MIN_DISTANCE)
            {
                out.push(candidate);
                break;
            }
        }
    }
    out
}

fn gaussian(x: f64, center: f64, width: f64) -> f64 {
    let width = width.max(f64::EPSILON);
    let z = (x - center) / width;
    (-0.5 * z * z).exp()
}
