use crate::types::Difficulty;

pub const GRID_COLS: usize = 8;
pub const GRID_ROWS: usize = 6;
pub const CELL_COUNT: usize = GRID_COLS * GRID_ROWS;
pub const TOP_MARGIN_PX: f64 = 72.0;
pub const BOTTOM_MARGIN_PX: f64 = 56.0;

pub const PROXIMITY_SIGMA: f64 = 0.22;
pub const VISIBILITY_THRESHOLD: f64 = 0.12;

pub const TIME_SERIES_LEN: usize = 720;
pub const SPECTRUM_LEN: usize = 900;
pub const SPECTRUM_MAX_HZ: f64 = 900.0;
pub const DECOY_MIN_DISTANCE: f64 = 0.06;
pub const RESIDUAL_PEAK_FLOOR: f64 = 0.10;

pub const TOAST_TTL_MS: u64 = 3_500;
pub const HINT_REVEAL_DELAY_MS: u64 = 8_000;

pub const DISCOVERY_LOG_KEY: &str = "search-mode:discoveries";
pub const LOCAL_COUNTER_PREFIX: &str = "search-mode:local-count:";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DifficultyProfile {
    pub peak_amplitude: f64,
    pub decoys: usize,
    pub tolerance: f64,
    pub peak_width: f64,
}

pub fn get_difficulty_profile(difficulty: Difficulty) -> DifficultyProfile {
    match difficulty {
        Difficulty::Easy => DifficultyProfile {
            peak_amplitude: 1.0,
            decoys: 2,
            tolerance: 0.035,
            peak_width: 0.012,
        },
        Difficulty::Medium => DifficultyProfile {
            peak_amplitude: 0.8,
            decoys: 4,
            tolerance: 0.025,
            peak_width: 0.009,
        },
        Difficulty::Hard => DifficultyProfile {
            peak_amplitude: 0.62,
            decoys: 6,
            tolerance: 0.016,
            peak_width: 0.006,
        },
    }
}
