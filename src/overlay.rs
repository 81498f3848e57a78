//! The search overlay: single owner of the mutable game state.
//!
//! Host events (`on_mouse_move`, `on_background_click`, `on_spectrum_click`,
//! geometry changes) mutate the overlay; `frame(now_ms)` is the render tick
//! that expires timers and returns one consistent snapshot of both plots.

use serde_json::json;

use crate::assignment::{Assignment, SiteDistribution};
use crate::capture::{Capture, CaptureMachine, CapturePhase, LockInput, SpectrumVerdict};
use crate::catalog::TargetCatalog;
use crate::constants::{HINT_REVEAL_DELAY_MS, TOAST_TTL_MS};
use crate::discovery::{DetectionCounter, DetectionReport, DiscoveryTracker, KeyValueStore};
use crate::grid::{CellLocation, ChromeGeometry, GridConfig, GridLayout};
use crate::logging::{emit_log, Level};
use crate::proximity::ProximityModel;
use crate::signal::{live_seed, synthesize, SignalConfig, SignalFrame, SignalRequest};
use crate::types::{Difficulty, DiscoveryEntry, OverlayEvent, Target, ToastKind, Viewport};

const HINT_BAND: f64 = 0.15;

#[derive(Clone, Debug, PartialEq)]
pub struct OverlayConfig {
    pub grid: GridConfig,
    pub signal: SignalConfig,
    pub proximity: ProximityModel,
    /// Difficulty used to render noise captures.
    pub noise_difficulty: Difficulty,
    pub toast_ttl_ms: u64,
    pub hint_delay_ms: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            signal: SignalConfig::default(),
            proximity: ProximityModel::default(),
            noise_difficulty: Difficulty::default(),
            toast_ttl_ms: TOAST_TTL_MS,
            hint_delay_ms: HINT_REVEAL_DELAY_MS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScanState {
    pub x: f64,
    pub y: f64,
    pub location: Option<CellLocation>,
    pub nonce: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProximityReadout {
    pub cell: Option<usize>,
    pub proximity: f64,
    pub visible: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Toast {
    pub id: u64,
    pub kind: ToastKind,
    pub message: String,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

/// One toast at a time; showing a new one replaces the old.
#[derive(Clone, Debug, Default)]
pub struct ToastSlot {
    current: Option<Toast>,
    next_id: u64,
}

impl ToastSlot {
    pub fn show(&mut self, kind: ToastKind, message: String, now_ms: u64, ttl_ms: u64) -> u64 {
        self.next_id += 1;
        self.current = Some(Toast {
            id: self.next_id,
            kind,
            message,
            created_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        });
        self.next_id
    }

    /// A dismiss for a toast that was already replaced is a no-op.
    pub fn dismiss(&mut self, id: u64) -> bool {
        if self.current.as_ref().is_some_and(|toast| toast.id == id) {
            self.current = None;
            return true;
        }
        false
    }

    pub fn expire(&mut self, now_ms: u64) {
        if self
            .current
            .as_ref()
            .is_some_and(|toast| now_ms >= toast.expires_at_ms)
        {
            self.current = None;
        }
    }

    pub fn current(&self) -> Option<&Toast> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Hint {
    pub capture_id: u64,
    pub message: String,
    pub band_hz: Option<(f64, f64)>,
}

impl Hint {
    fn for_capture(capture: &Capture) -> Self {
        match &capture.target {
            Some(target) => {
                let low = target.frequency_hz * (1.0 - HINT_BAND);
                let high = target.frequency_hz * (1.0 + HINT_BAND);
                Self {
                    capture_id: capture.id,
                    message: format!("Look between {low:.0} and {high:.0} Hz"),
                    band_hz: Some((low, high)),
                }
            }
            None => Self {
                capture_id: capture.id,
                message: "No periodic signal in this patch of sky".to_string(),
                band_hz: None,
            },
        }
    }
}

#[derive(Clone, Debug, Default)]
struct HintTimer {
    pending: Option<(u64, Hint)>,
    revealed: Option<Hint>,
}

impl HintTimer {
    fn arm(&mut self, reveal_at_ms: u64, hint: Hint) {
        self.pending = Some((reveal_at_ms, hint));
        self.revealed = None;
    }

    fn cancel(&mut self) {
        self.pending = None;
        self.revealed = None;
    }

    /// Reveals the pending hint once due, if its capture is still the active one.
    fn poll(&mut self, now_ms: u64, active_capture: Option<u64>) -> Option<u64> {
        let (reveal_at_ms, capture_id) = match &self.pending {
            Some((reveal_at_ms, hint)) => (*reveal_at_ms, hint.capture_id),
            None => return None,
        };
        if active_capture != Some(capture_id) {
            self.cancel();
            return None;
        }
        if now_ms < reveal_at_ms {
            return None;
        }
        self.revealed = self.pending.take().map(|(_, hint)| hint);
        Some(capture_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    Locked { capture_id: u64, noise: bool },
    Ignored,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpectrumOutcome {
    Hit(DetectionReport),
    Miss { noise: bool },
    Ignored,
}

/// Everything the host needs to draw one tick.
#[derive(Clone, Debug)]
pub struct Frame<'a> {
    pub enabled: bool,
    pub phase: CapturePhase,
    pub seed: Option<u32>,
    pub time_series: &'a [f32],
    pub spectrum: &'a [f32],
    pub readout: ProximityReadout,
    pub toast: Option<&'a Toast>,
    pub hint: Option<&'a Hint>,
}

type DetectionCallback = Box<dyn FnMut(&Target, u64)>;

pub struct SearchOverlay {
    config: OverlayConfig,
    catalog: TargetCatalog,
    page_key: String,
    enabled: bool,
    viewport: Viewport,
    layout: GridLayout,
    distribution: SiteDistribution,
    assignment: Assignment,
    scan: ScanState,
    machine: CaptureMachine,
    live: Option<SignalFrame>,
    live_request: Option<SignalRequest>,
    discoveries: DiscoveryTracker,
    toast: ToastSlot,
    hint: HintTimer,
    events: Vec<OverlayEvent>,
    on_detection: Option<DetectionCallback>,
}

impl SearchOverlay {
    pub fn new(
        config: OverlayConfig,
        catalog: TargetCatalog,
        page_key: &str,
        viewport: Viewport,
        chrome: &dyn ChromeGeometry,
        store: Box<dyn KeyValueStore>,
    ) -> Self {
        let layout = GridLayout::compute(&config.grid, viewport, chrome);
        let distribution = SiteDistribution::build(&catalog.target_ids(), catalog.pages(), page_key);
        let assignment = Assignment::build(
            &distribution,
            page_key,
            &layout.allowed_cells,
            config.grid.cell_count(),
        );
        let mut overlay = Self {
            config,
            catalog,
            page_key: page_key.to_string(),
            enabled: true,
            viewport,
            layout,
            distribution,
            assignment,
            scan: ScanState::default(),
            machine: CaptureMachine::new(),
            live: None,
            live_request: None,
            discoveries: DiscoveryTracker::new(store),
            toast: ToastSlot::default(),
            hint: HintTimer::default(),
            events: Vec::new(),
            on_detection: None,
        };
        overlay.note_geometry_fallback();
        emit_log(
            Level::Debug,
            "overlay",
            "assignment_built",
            json!({
                "page": overlay.page_key,
                "salt": overlay.distribution.salt,
                "hotspots": overlay.assignment.len(),
                "allowedCells": overlay.layout.allowed_cells.len(),
            }),
        );
        overlay
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn catalog(&self) -> &TargetCatalog {
        &self.catalog
    }

    pub fn page_key(&self) -> &str {
        &self.page_key
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn distribution(&self) -> &SiteDistribution {
        &self.distribution
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    pub fn scan(&self) -> &ScanState {
        &self.scan
    }

    pub fn capture(&self) -> Option<&Capture> {
        self.machine.capture()
    }

    pub fn phase(&self) -> CapturePhase {
        self.machine.phase()
    }

    pub fn discoveries(&self) -> &[DiscoveryEntry] {
        self.discoveries.entries()
    }

    pub fn on_detection(&mut self, callback: DetectionCallback) {
        self.on_detection = Some(callback);
    }

    pub fn drain_events(&mut self) -> Vec<OverlayEvent> {
        std::mem::take(&mut self.events)
    }

    /// Navigation: everything page-scoped is dropped and rebuilt.
    pub fn set_page(&mut self, page_key: &str) {
        self.reset();
        self.page_key = page_key.to_string();
        self.scan = ScanState::default();
        self.clear_live();
        self.distribution =
            SiteDistribution::build(&self.catalog.target_ids(), self.catalog.pages(), page_key);
        self.rebuild_assignment();
    }

    /// Resize or scroll. The assignment is replaced only when the allowed cells change.
    pub fn update_geometry(&mut self, viewport: Viewport, chrome: &dyn ChromeGeometry) {
        let layout = GridLayout::compute(&self.config.grid, viewport, chrome);
        let cells_changed = layout.allowed_cells != self.layout.allowed_cells;
        self.viewport = viewport;
        self.layout = layout;
        self.scan.location = self.layout.locate(self.scan.x, self.scan.y);
        self.clear_live();
        self.note_geometry_fallback();
        if cells_changed {
            self.rebuild_assignment();
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        if !enabled {
            self.reset();
            self.toast.clear();
            self.scan = ScanState::default();
            self.clear_live();
        }
    }

    pub fn on_mouse_move(&mut self, x: f64, y: f64) -> ProximityReadout {
        if !self.enabled {
            return ProximityReadout::default();
        }
        let location = self.layout.locate(x, y);
        if location.is_some() {
            self.scan.nonce += 1;
        }
        self.scan.x = x;
        self.scan.y = y;
        self.scan.location = location;
        self.readout(location)
    }

    pub fn on_background_click(&mut self, x: f64, y: f64, now_ms: u64) -> CaptureOutcome {
        if !self.enabled || self.machine.is_frozen() || self.layout.hits_chrome(x, y) {
            return CaptureOutcome::Ignored;
        }
        let Some(location) = self.layout.locate(x, y) else {
            return CaptureOutcome::Ignored;
        };

        // A click inside the scanned cell freezes the last rendered frame as is.
        let (x, y, location) = match self.scan.location {
            Some(scanned) if scanned.coord.index == location.coord.index => {
                (self.scan.x, self.scan.y, scanned)
            }
            _ => (x, y, location),
        };
        let (request, target, _) = self.signal_request(x, y, Some(location), self.scan.nonce);
        let input = LockInput {
            request,
            cell: Some(location.coord.index),
            target,
            locked_at_ms: now_ms,
        };
        let Some(capture) = self.machine.lock(input, &self.config.signal) else {
            return CaptureOutcome::Ignored;
        };

        let capture_id = capture.id;
        let noise = capture.is_noise();
        let hint = Hint::for_capture(capture);
        emit_log(
            Level::Debug,
            "overlay",
            "captured",
            json!({
                "page": self.page_key,
                "captureId": capture_id,
                "cell": capture.cell,
                "seed": capture.seed(),
                "noise": noise,
            }),
        );
        self.hint
            .arm(now_ms.saturating_add(self.config.hint_delay_ms), hint);
        self.events.push(OverlayEvent::Captured {
            capture_id,
            cell: Some(location.coord.index),
            noise,
        });
        CaptureOutcome::Locked { capture_id, noise }
    }

    /// `x_norm` is the click position across the spectrum plot in [0, 1].
    pub fn on_spectrum_click(
        &mut self,
        x_norm: f64,
        counter: &mut dyn DetectionCounter,
        now_ms: u64,
    ) -> SpectrumOutcome {
        if !self.enabled {
            return SpectrumOutcome::Ignored;
        }
        match self.machine.click_spectrum(x_norm) {
            SpectrumVerdict::Hit { capture_id, target } => {
                let report = self.discoveries.record_hit(&target.id, counter, now_ms);
                let (kind, message) = if report.repeat {
                    (
                        ToastKind::Repeat,
                        format!("{} again. You logged it as detector #{}", target.name, report.rank),
                    )
                } else {
                    (
                        ToastKind::Hit,
                        format!("Detected {}! You are detector #{}", target.name, report.rank),
                    )
                };
                self.toast
                    .show(kind, message, now_ms, self.config.toast_ttl_ms);
                self.hint.cancel();
                emit_log(
                    Level::Info,
                    "overlay",
                    "detected",
                    json!({
                        "page": self.page_key,
                        "captureId": capture_id,
                        "targetId": report.target_id,
                        "rank": report.rank,
                        "repeat": report.repeat,
                        "source": report.source,
                    }),
                );
                self.events.push(OverlayEvent::Hit {
                    target_id: report.target_id.clone(),
                    rank: report.rank,
                    repeat: report.repeat,
                    source: report.source,
                });
                if let Some(callback) = self.on_detection.as_mut() {
                    callback(&target, report.rank);
                }
                SpectrumOutcome::Hit(report)
            }
            SpectrumVerdict::Miss { capture_id, noise } => {
                let (kind, message) = if noise {
                    (
                        ToastKind::Noise,
                        "Only noise here. Try another patch of sky".to_string(),
                    )
                } else {
                    let hz = self.config.signal.position_to_hz(x_norm);
                    (ToastKind::Miss, format!("Nothing at {hz:.0} Hz. Try again"))
                };
                self.toast
                    .show(kind, message, now_ms, self.config.toast_ttl_ms);
                self.events.push(OverlayEvent::Miss { capture_id, noise });
                SpectrumOutcome::Miss { noise }
            }
            SpectrumVerdict::Ignored => SpectrumOutcome::Ignored,
        }
    }

    pub fn dismiss_toast(&mut self, id: u64) -> bool {
        self.toast.dismiss(id)
    }

    /// Escape / reset control. Returns whether a capture was released.
    pub fn reset(&mut self) -> bool {
        self.hint.cancel();
        let released = self.machine.reset();
        if released {
            self.events.push(OverlayEvent::Reset);
        }
        released
    }

    pub fn frame(&mut self, now_ms: u64) -> Frame<'_> {
        self.toast.expire(now_ms);
        let active = match self.machine.phase() {
            CapturePhase::Locked => self.machine.capture().map(|capture| capture.id),
            _ => None,
        };
        if let Some(capture_id) = self.hint.poll(now_ms, active) {
            self.events.push(OverlayEvent::HintRevealed { capture_id });
        }

        if !self.enabled {
            return Frame {
                enabled: false,
                phase: CapturePhase::Idle,
                seed: None,
                time_series: &[],
                spectrum: &[],
                readout: ProximityReadout::default(),
                toast: None,
                hint: None,
            };
        }

        let (request, _, readout) =
            self.signal_request(self.scan.x, self.scan.y, self.scan.location, self.scan.nonce);
        if !self.machine.is_frozen() && self.live_request.as_ref() != Some(&request) {
            self.live = Some(synthesize(&request, &self.config.signal));
            self.live_request = Some(request);
        }

        let signals = match self.machine.capture() {
            Some(capture) => Some(&capture.signals),
            None => self.live.as_ref(),
        };
        Frame {
            enabled: true,
            phase: self.machine.phase(),
            seed: signals.map(|frame| frame.seed),
            time_series: signals
                .map(|frame| frame.time_series.as_slice())
                .unwrap_or_default(),
            spectrum: signals
                .map(|frame| frame.spectrum.as_slice())
                .unwrap_or_default(),
            readout,
            toast: self.toast.current(),
            hint: self.hint.revealed.as_ref(),
        }
    }

    fn readout(&self, location: Option<CellLocation>) -> ProximityReadout {
        let Some(location) = location else {
            return ProximityReadout::default();
        };
        let cell = location.coord.index;
        let proximity = self
            .assignment
            .hotspot(cell)
            .map_or(0.0, |hotspot| {
                self.config.proximity.proximity(
                    (location.local_x, location.local_y),
                    (hotspot.offset_x, hotspot.offset_y),
                )
            });
        ProximityReadout {
            cell: Some(cell),
            proximity,
            visible: self.config.proximity.is_visible(proximity),
        }
    }

    /// Proximity is computed once here and shared by both plots and the readout.
    fn signal_request(
        &self,
        x: f64,
        y: f64,
        location: Option<CellLocation>,
        nonce: u64,
    ) -> (SignalRequest, Option<Target>, ProximityReadout) {
        let cell = location.map(|location| location.coord.index);
        let seed = live_seed(&self.page_key, self.assignment.salt, cell, nonce, x, y);
        let ripple = (x / self.layout.width).clamp(0.0, 1.0);
        let target = cell
            .and_then(|cell| self.assignment.hotspot(cell))
            .and_then(|hotspot| self.catalog.get(&hotspot.target_id))
            .cloned();

        let readout = self.readout(location);
        let Some(target) = target else {
            let request = SignalRequest::noise(seed, self.config.noise_difficulty, ripple);
            return (request, None, readout);
        };
        let request = SignalRequest {
            seed,
            difficulty: target.difficulty,
            target_position: Some(self.config.signal.normalized_position(target.frequency_hz)),
            proximity: readout.proximity,
            visible: readout.visible,
            ripple,
        };
        (request, Some(target), readout)
    }

    fn rebuild_assignment(&mut self) {
        self.assignment = Assignment::build(
            &self.distribution,
            &self.page_key,
            &self.layout.allowed_cells,
            self.config.grid.cell_count(),
        );
        self.clear_live();
    }

    fn clear_live(&mut self) {
        self.live = None;
        self.live_request = None;
    }

    fn note_geometry_fallback(&mut self) {
        if !self.layout.used_fallback {
            return;
        }
        let allowed_cells = self.layout.allowed_cells.len();
        emit_log(
            Level::Info,
            "overlay",
            "geometry_fallback",
            json!({
                "page": self.page_key,
                "allowedCells": allowed_cells,
                "viewport": self.viewport,
            }),
        );
        self.events
            .push(OverlayEvent::GeometryFallback { allowed_cells });
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    use super::*;
    use crate::discovery::{MemoryStore, OfflineCounter};
    use crate::grid::NoChrome;
    use crate::types::{RankSource, Rect};

    fn target(id: &str, frequency_hz: f64, difficulty: Difficulty) -> Target {
        Target {
            id: id.to_string(),
            name: id.to_uppercase(),
            frequency_hz,
            difficulty,
            image: None,
            details: BTreeMap::new(),
        }
    }

    fn catalog() -> TargetCatalog {
        TargetCatalog::new(
            vec![
                target("vela", 11.19, Difficulty::Easy),
                target("crab", 29.95, Difficulty::Medium),
                target("j0437", 173.69, Difficulty::Hard),
                target("b1937", 641.93, Difficulty::Medium),
            ],
            vec!["home".to_string(), "blog".to_string()],
        )
    }

    fn overlay() -> SearchOverlay {
        SearchOverlay::new(
            OverlayConfig::default(),
            catalog(),
            "home",
            Viewport::fixed(800.0, 600.0),
            &NoChrome,
            Box::new(MemoryStore::new()),
        )
    }

    fn first_hotspot(overlay: &SearchOverlay) -> (usize, (f64, f64), Target) {
        let hotspot = overlay
            .assignment()
            .hotspots()
            .next()
            .expect("home has hotspots")
            .clone();
        let point = overlay
            .layout()
            .point_in_cell(hotspot.cell, hotspot.offset_x, hotspot.offset_y)
            .expect("hotspot cell is on the grid");
        let target = overlay
            .catalog()
            .get(&hotspot.target_id)
            .expect("hotspot target is in the catalog")
            .clone();
        (hotspot.cell, point, target)
    }

    fn noise_cell_center(overlay: &SearchOverlay) -> (f64, f64) {
        let cell = overlay
            .layout()
            .allowed_cells
            .iter()
            .copied()
            .find(|cell| overlay.assignment().hotspot(*cell).is_none())
            .expect("some allowed cell is empty");
        overlay
            .layout()
            .point_in_cell(cell, 0.5, 0.5)
            .expect("cell is on the grid")
    }

    #[test]
    fn capture_then_hit_reports_and_invokes_callback() {
        let mut overlay = overlay();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        overlay.on_detection(Box::new(move |target: &Target, rank: u64| {
            sink.borrow_mut().push((target.id.clone(), rank));
        }));

        let (cell, (x, y), target) = first_hotspot(&overlay);
        let readout = overlay.on_mouse_move(x, y);
        assert_eq!(readout.cell, Some(cell));
        assert!(readout.proximity > 0.99);
        assert!(readout.visible);

        let outcome = overlay.on_background_click(x, y, 100);
        assert_eq!(
            outcome,
            CaptureOutcome::Locked {
                capture_id: 1,
                noise: false
            }
        );

        let position = overlay.config().signal.normalized_position(target.frequency_hz);
        let outcome = overlay.on_spectrum_click(position, &mut OfflineCounter, 200);
        let SpectrumOutcome::Hit(report) = outcome else {
            panic!("expected a hit, got {outcome:?}");
        };
        assert_eq!(report.rank, 1);
        assert_eq!(report.source, RankSource::LocalFallback);
        assert_eq!(overlay.phase(), CapturePhase::Solved);
        assert_eq!(seen.borrow().as_slice(), &[(target.id.clone(), 1)]);
        assert_eq!(overlay.discoveries().len(), 1);
        assert_eq!(overlay.frame(201).toast.map(|t| t.kind), Some(ToastKind::Hit));

        let events = overlay.drain_events();
        assert!(matches!(events[0], OverlayEvent::Captured { capture_id: 1, .. }));
        assert!(matches!(events[1], OverlayEvent::Hit { rank: 1, repeat: false, .. }));
        assert!(overlay.drain_events().is_empty());
    }

    #[test]
    fn second_hit_on_same_target_is_a_repeat() {
        let mut overlay = overlay();
        let (_, (x, y), target) = first_hotspot(&overlay);
        let position = overlay.config().signal.normalized_position(target.frequency_hz);

        overlay.on_mouse_move(x, y);
        overlay.on_background_click(x, y, 0);
        overlay.on_spectrum_click(position, &mut OfflineCounter, 1);
        assert!(overlay.reset());

        overlay.on_mouse_move(x, y);
        overlay.on_background_click(x, y, 2);
        let SpectrumOutcome::Hit(report) = overlay.on_spectrum_click(position, &mut OfflineCounter, 3)
        else {
            panic!("expected a repeat hit");
        };
        assert!(report.repeat);
        assert_eq!(report.rank, 1);
        assert_eq!(report.source, RankSource::Session);
        assert_eq!(overlay.frame(4).toast.map(|t| t.kind), Some(ToastKind::Repeat));
    }

    #[test]
    fn frozen_frames_are_bit_identical_and_ignore_mouse_moves() {
        let mut overlay = overlay();
        let (_, (x, y), _) = first_hotspot(&overlay);
        overlay.on_mouse_move(x, y);
        let live: Vec<u32> = overlay.frame(0).spectrum.iter().map(|v| v.to_bits()).collect();

        overlay.on_background_click(x, y, 0);
        let first: Vec<u32> = overlay.frame(1).spectrum.iter().map(|v| v.to_bits()).collect();
        assert_eq!(first, live);

        overlay.on_mouse_move(x + 40.0, y);
        let expected_len = overlay.config().signal.time_series_len;
        let frame = overlay.frame(2);
        let second: Vec<u32> = frame.spectrum.iter().map(|v| v.to_bits()).collect();
        assert_eq!(second, first);
        assert_eq!(frame.phase, CapturePhase::Locked);
        assert_eq!(frame.time_series.len(), expected_len);
    }

    #[test]
    fn click_elsewhere_in_the_scanned_cell_freezes_the_rendered_frame() {
        let mut overlay = overlay();
        let (x, y) = noise_cell_center(&overlay);
        overlay.on_mouse_move(x, y);
        let frame = overlay.frame(0);
        let rendered_seed = frame.seed;
        let live: Vec<u32> = frame.spectrum.iter().map(|v| v.to_bits()).collect();

        overlay.on_background_click(x + 1.5, y + 1.0, 1);
        let frame = overlay.frame(2);
        let frozen: Vec<u32> = frame.spectrum.iter().map(|v| v.to_bits()).collect();
        assert_eq!(frame.seed, rendered_seed);
        assert_eq!(frozen, live);
    }

    #[test]
    fn hotspot_cell_below_threshold_renders_no_target_peak() {
        let mut overlay = overlay();
        let (cell, _, target) = first_hotspot(&overlay);
        let hotspot = overlay.assignment().hotspot(cell).expect("hotspot").clone();
        let far_x = if hotspot.offset_x < 0.5 { 0.98 } else { 0.02 };
        let far_y = if hotspot.offset_y < 0.5 { 0.98 } else { 0.02 };
        let (x, y) = overlay
            .layout()
            .point_in_cell(cell, far_x, far_y)
            .expect("cell is on the grid");

        let readout = overlay.on_mouse_move(x, y);
        assert_eq!(readout.cell, Some(cell));
        assert!(!readout.visible);

        let config = overlay.config().signal;
        let ripple = x / overlay.layout().width;
        let frame = overlay.frame(0);
        let hidden = SignalRequest {
            seed: frame.seed.expect("live frame has a seed"),
            difficulty: target.difficulty,
            target_position: Some(config.normalized_position(target.frequency_hz)),
            proximity: 0.0,
            visible: false,
            ripple,
        };
        let shown = SignalRequest {
            visible: true,
            ..hidden.clone()
        };
        let rendered: Vec<u32> = frame.spectrum.iter().map(|v| v.to_bits()).collect();
        let bits = |request: &SignalRequest| -> Vec<u32> {
            synthesize(request, &config)
                .spectrum
                .iter()
                .map(|v| v.to_bits())
                .collect()
        };
        assert_eq!(rendered, bits(&hidden));
        assert_ne!(rendered, bits(&shown));
    }

    #[test]
    fn live_buffers_change_with_the_nonce() {
        let mut overlay = overlay();
        let (x, y) = noise_cell_center(&overlay);
        overlay.on_mouse_move(x, y);
        let first = overlay.frame(0).time_series.to_vec();
        overlay.on_mouse_move(x, y);
        let second = overlay.frame(1).time_series.to_vec();
        assert_ne!(first, second);
        assert_eq!(overlay.scan().nonce, 2);
    }

    #[test]
    fn noise_capture_only_misses() {
        let mut overlay = overlay();
        let (x, y) = noise_cell_center(&overlay);
        overlay.on_mouse_move(x, y);
        assert_eq!(
            overlay.on_background_click(x, y, 0),
            CaptureOutcome::Locked {
                capture_id: 1,
                noise: true
            }
        );
        for step in 0..=100 {
            assert_eq!(
                overlay.on_spectrum_click(step as f64 / 100.0, &mut OfflineCounter, 1),
                SpectrumOutcome::Miss { noise: true }
            );
        }
        assert_eq!(overlay.frame(2).toast.map(|t| t.kind), Some(ToastKind::Noise));
        assert!(overlay.discoveries().is_empty());
    }

    #[test]
    fn clicks_outside_the_band_or_on_chrome_are_ignored() {
        let mut overlay = overlay();
        assert_eq!(overlay.on_background_click(400.0, 10.0, 0), CaptureOutcome::Ignored);

        let (x, y) = noise_cell_center(&overlay);
        let chrome = vec![Rect::new(x - 5.0, y - 5.0, 10.0, 10.0)];
        overlay.update_geometry(Viewport::fixed(800.0, 600.0), &chrome);
        assert_eq!(overlay.on_background_click(x, y, 0), CaptureOutcome::Ignored);
        assert_eq!(overlay.phase(), CapturePhase::Idle);
    }

    #[test]
    fn toasts_expire_and_stale_dismissals_are_ignored() {
        let mut overlay = overlay();
        let (x, y) = noise_cell_center(&overlay);
        overlay.on_background_click(x, y, 0);
        overlay.on_spectrum_click(0.5, &mut OfflineCounter, 0);
        let first_id = overlay.frame(0).toast.map(|t| t.id).expect("toast shown");
        overlay.on_spectrum_click(0.6, &mut OfflineCounter, 1_000);
        let second_id = overlay.frame(1_000).toast.map(|t| t.id).expect("toast shown");
        assert_ne!(first_id, second_id);

        assert!(!overlay.dismiss_toast(first_id));
        assert_eq!(overlay.frame(1_001).toast.map(|t| t.id), Some(second_id));

        let ttl = overlay.config().toast_ttl_ms;
        assert!(overlay.frame(1_000 + ttl - 1).toast.is_some());
        assert!(overlay.frame(1_000 + ttl).toast.is_none());
    }

    #[test]
    fn hint_reveals_only_for_the_capture_that_armed_it() {
        let mut overlay = overlay();
        let delay = overlay.config().hint_delay_ms;
        let (_, (x, y), target) = first_hotspot(&overlay);

        overlay.on_background_click(x, y, 0);
        overlay.reset();
        overlay.on_background_click(x, y, 5_000);
        assert!(overlay.frame(delay).hint.is_none());
        assert!(overlay.frame(5_000 + delay - 1).hint.is_none());

        let hint = overlay.frame(5_000 + delay).hint.cloned().expect("hint revealed");
        assert_eq!(hint.capture_id, 2);
        let (low, high) = hint.band_hz.expect("targets have a band");
        assert!(low < target.frequency_hz && target.frequency_hz < high);
        assert!(overlay
            .drain_events()
            .contains(&OverlayEvent::HintRevealed { capture_id: 2 }));
    }

    #[test]
    fn page_change_releases_capture_and_reassigns() {
        let mut overlay = overlay();
        let (x, y) = noise_cell_center(&overlay);
        overlay.on_background_click(x, y, 0);
        assert_eq!(overlay.phase(), CapturePhase::Locked);

        overlay.set_page("blog");
        assert_eq!(overlay.phase(), CapturePhase::Idle);
        assert_eq!(overlay.page_key(), "blog");
        assert_eq!(overlay.assignment().page_key, "blog");
        assert_eq!(overlay.assignment().len(), 2);
        assert_eq!(overlay.scan().nonce, 0);
    }

    #[test]
    fn disabled_overlay_renders_nothing_and_ignores_input() {
        let mut overlay = overlay();
        let (x, y) = noise_cell_center(&overlay);
        overlay.on_background_click(x, y, 0);
        overlay.set_enabled(false);
        assert_eq!(overlay.phase(), CapturePhase::Idle);
        assert_eq!(overlay.on_background_click(x, y, 1), CaptureOutcome::Ignored);
        let frame = overlay.frame(2);
        assert!(!frame.enabled);
        assert!(frame.spectrum.is_empty());

        overlay.set_enabled(true);
        let expected_len = overlay.config().signal.spectrum_len;
        assert_eq!(overlay.frame(3).spectrum.len(), expected_len);
    }

    #[test]
    fn empty_catalog_makes_every_capture_noise() {
        let mut overlay = SearchOverlay::new(
            OverlayConfig::default(),
            TargetCatalog::default(),
            "home",
            Viewport::fixed(800.0, 600.0),
            &NoChrome,
            Box::new(MemoryStore::new()),
        );
        assert!(overlay.assignment().is_empty());
        assert_eq!(
            overlay.on_background_click(400.0, 300.0, 0),
            CaptureOutcome::Locked {
                capture_id: 1,
                noise: true
            }
        );
    }
}
