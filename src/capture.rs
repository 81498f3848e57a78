use crate::constants::get_difficulty_profile;
use crate::signal::{harmonic_positions, synthesize, SignalConfig, SignalFrame, SignalRequest};
use crate::types::{Difficulty, Target};

/// True when `click` lies within `tolerance` of the fundamental or either harmonic.
pub fn evaluate_hit(click: f64, target_position: f64, tolerance: f64) -> bool {
    harmonic_positions(target_position)
        .iter()
        .any(|position| (click - position).abs() <= tolerance)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    Locked,
    Solved,
}

#[derive(Clone, Debug)]
pub struct LockInput {
    pub request: SignalRequest,
    pub cell: Option<usize>,
    pub target: Option<Target>,
    pub locked_at_ms: u64,
}

#[derive(Clone, Debug)]
pub struct Capture {
    pub id: u64,
    pub cell: Option<usize>,
    pub target: Option<Target>,
    pub request: SignalRequest,
    pub signals: SignalFrame,
    pub locked_at_ms: u64,
    pub misses: u32,
}

impl Capture {
    pub fn seed(&self) -> u32 {
        self.request.seed
    }

    pub fn is_noise(&self) -> bool {
        self.target.is_none()
    }

    pub fn difficulty(&self) -> Difficulty {
        self.request.difficulty
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SpectrumVerdict {
    Hit { capture_id: u64, target: Target },
    Miss { capture_id: u64, noise: bool },
    Ignored,
}

#[derive(Clone, Debug)]
enum CaptureState {
    Idle,
    Locked(Capture),
    Solved(Capture),
}

#[derive(Clone, Debug)]
pub struct CaptureMachine {
    state: CaptureState,
    next_id: u64,
}

impl Default for CaptureMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureMachine {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            next_id: 1,
        }
    }

    pub fn phase(&self) -> CapturePhase {
        match self.state {
            CaptureState::Idle => CapturePhase::Idle,
            CaptureState::Locked(_) => CapturePhase::Locked,
            CaptureState::Solved(_) => CapturePhase::Solved,
        }
    }

    pub fn capture(&self) -> Option<&Capture> {
        match &self.state {
            CaptureState::Idle => None,
            CaptureState::Locked(capture) | CaptureState::Solved(capture) => Some(capture),
        }
    }

    /// Locked and solved captures both render frozen buffers.
    pub fn is_frozen(&self) -> bool {
        !matches!(self.state, CaptureState::Idle)
    }

    /// Freezes the signal. Only valid from idle; returns `None` otherwise.
    pub fn lock(&mut self, input: LockInput, config: &SignalConfig) -> Option<&Capture> {
        if self.is_frozen() {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        let signals = synthesize(&input.request, config);
        self.state = CaptureState::Locked(Capture {
            id,
            cell: input.cell,
            target: input.target,
            request: input.request,
            signals,
            locked_at_ms: input.locked_at_ms,
            misses: 0,
        });
        self.capture()
    }

    /// `click` is the normalized x position on the spectrum axis.
    pub fn click_spectrum(&mut self, click: f64) -> SpectrumVerdict {
        let CaptureState::Locked(capture) = &mut self.state else {
            return SpectrumVerdict::Ignored;
        };

        let hit_target = capture.target.as_ref().filter(|target| {
            let Some(position) = capture.request.target_position else {
                return false;
            };
            let tolerance = get_difficulty_profile(target.difficulty).tolerance;
            evaluate_hit(click, position, tolerance)
        });

        match hit_target.cloned() {
            Some(target) => {
                let capture_id = capture.id;
                let state = std::mem::replace(&mut self.state, CaptureState::Idle);
                if let CaptureState::Locked(capture) = state {
                    self.state = CaptureState::Solved(capture);
                }
                SpectrumVerdict::Hit { capture_id, target }
            }
            None => {
                capture.misses += 1;
                SpectrumVerdict::Miss {
                    capture_id: capture.id,
                    noise: capture.target.is_none(),
                }
            }
        }
    }

    /// Back to idle. Returns whether anything was captured.
    pub fn reset(&mut self) -> bool {
        let was_frozen = self.is_frozen();
        self.state = CaptureState::Idle;
        was_frozen
    }
}
