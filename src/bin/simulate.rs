use clap::Parser;
use pulsar_search::assignment::{Assignment, SiteDistribution};
use pulsar_search::capture::evaluate_hit;
use pulsar_search::catalog::TargetCatalog;
use pulsar_search::constants::get_difficulty_profile;
use pulsar_search::counter_store::DetectionCounterStore;
use pulsar_search::discovery::{JsonFileStore, KeyValueStore, MemoryStore, OfflineCounter};
use pulsar_search::grid::NoChrome;
use pulsar_search::logging::{now_ms, Level, StructuredLogLine};
use pulsar_search::overlay::{CaptureOutcome, OverlayConfig, SearchOverlay, SpectrumOutcome};
use pulsar_search::types::{Difficulty, Target, Viewport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};

const DEMO_CATALOG: &str = include_str!("../../data/catalog.json");
const BASELINE_WINDOW: usize = 15;
const FRAME_STEP_MS: u64 = 16;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Target catalog JSON; the bundled demo catalog when omitted.
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Restrict the run to these pages (repeatable).
    #[arg(long)]
    page: Vec<String>,
    /// Force every target onto one difficulty tier.
    #[arg(long)]
    difficulty: Option<String>,
    /// Cursor jitter around each hotspot, in px.
    #[arg(long, default_value_t = 0.0)]
    jitter: f64,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
    /// Persist the session discovery log to this JSON file across pages and runs.
    #[arg(long)]
    session_store: Option<PathBuf>,
    #[arg(long, default_value_t = 1280.0)]
    width: f64,
    #[arg(long, default_value_t = 800.0)]
    height: f64,
}

#[derive(Clone, Debug, Serialize)]
struct PageResultLine {
    page: String,
    salt: u32,
    #[serde(rename = "allowedCells")]
    allowed_cells: usize,
    #[serde(rename = "pageTargets")]
    page_targets: usize,
    hotspots: usize,
    hits: usize,
    misses: usize,
    #[serde(rename = "noiseChecked")]
    noise_checked: bool,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "runId")]
    run_id: String,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "pageCount")]
    page_count: usize,
    #[serde(rename = "hotspotCount")]
    hotspot_count: usize,
    #[serde(rename = "hitRate")]
    hit_rate: f64,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    pages: Vec<PageResultLine>,
}

struct RunContext<'a> {
    catalog: &'a TargetCatalog,
    config: &'a OverlayConfig,
    viewport: Viewport,
    jitter_px: f64,
    counter: &'a mut DetectionCounterStore,
    rng: &'a mut StdRng,
    session_store: Option<&'a Path>,
}

fn main() {
    let cli = Cli::parse();
    let run_started_at_ms = now_ms();
    let seed = cli.seed.unwrap_or(run_started_at_ms);
    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| default_run_id(seed, run_started_at_ms));

    let catalog = apply_difficulty(load_catalog(cli.catalog.as_deref(), &run_id), &cli);
    let pages = resolve_pages(&catalog, &cli.page);
    let config = OverlayConfig::default();
    let mut counter = DetectionCounterStore::in_memory();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut has_anomaly = false;
    let mut page_results = Vec::new();

    for page in &pages {
        log(Level::Info, "page_started", &run_id, Some(page), json!({ "seed": seed }));
        let mut context = RunContext {
            catalog: &catalog,
            config: &config,
            viewport: Viewport::fixed(cli.width, cli.height),
            jitter_px: cli.jitter.max(0.0),
            counter: &mut counter,
            rng: &mut rng,
            session_store: cli.session_store.as_deref(),
        };
        let result = run_page(&mut context, page);

        for anomaly in &result.anomalies {
            log(
                Level::Warn,
                "anomaly_detected",
                &run_id,
                Some(page),
                json!({ "message": anomaly }),
            );
        }
        if !result.anomalies.is_empty() {
            has_anomaly = true;
        }
        log(
            Level::Info,
            "page_finished",
            &run_id,
            Some(page),
            json!({
                "hotspots": result.hotspots,
                "hits": result.hits,
                "misses": result.misses,
            }),
        );

        match serde_json::to_string(&result) {
            Ok(line) => println!("{line}"),
            Err(error) => log(
                Level::Error,
                "result_serialize_failed",
                &run_id,
                Some(page),
                json!({ "error": error.to_string() }),
            ),
        }
        page_results.push(result);
    }

    let summary = build_run_summary(run_id.clone(), run_started_at_ms, now_ms(), page_results);

    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            log(
                Level::Error,
                "summary_write_failed",
                &run_id,
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
        summary_out_written = Some(path.to_string_lossy().to_string());
    }

    log(
        Level::Info,
        "run_finished",
        &run_id,
        None,
        json!({
            "pageCount": summary.page_count,
            "hotspotCount": summary.hotspot_count,
            "hitRate": summary.hit_rate,
            "anomalyCount": summary.anomaly_count,
            "detections": counter.build_response(),
            "summaryOut": summary_out_written,
        }),
    );

    if has_anomaly {
        std::process::exit(1);
    }
}

fn run_page(context: &mut RunContext<'_>, page: &str) -> PageResultLine {
    let store: Box<dyn KeyValueStore> = match context.session_store {
        Some(path) => Box::new(JsonFileStore::new(path.to_path_buf())),
        None => Box::new(MemoryStore::new()),
    };
    let mut overlay = SearchOverlay::new(
        context.config.clone(),
        context.catalog.clone(),
        page,
        context.viewport,
        &NoChrome,
        store,
    );
    let mut anomalies = collect_assignment_anomalies(&overlay, context.catalog);

    let mut now = 0u64;
    let mut hits = 0usize;
    let mut misses = 0usize;
    let hotspots: Vec<_> = overlay.assignment().hotspots().cloned().collect();

    for hotspot in &hotspots {
        let Some(target) = context.catalog.get(&hotspot.target_id).cloned() else {
            anomalies.push(format!("hotspot target {} missing from catalog", hotspot.target_id));
            continue;
        };
        let (x, y) = aim_point(
            &overlay,
            hotspot.cell,
            (hotspot.offset_x, hotspot.offset_y),
            context.jitter_px,
            context.rng,
        );

        overlay.on_mouse_move(x, y);
        now += FRAME_STEP_MS;
        let live = overlay.frame(now).spectrum.to_vec();
        match overlay.on_background_click(x, y, now) {
            CaptureOutcome::Locked { noise: false, .. } => {}
            other => {
                anomalies.push(format!(
                    "cell {} for {} did not lock onto its target: {other:?}",
                    hotspot.cell, target.id
                ));
                overlay.reset();
                continue;
            }
        }

        now += FRAME_STEP_MS;
        let frozen = overlay.frame(now).spectrum.to_vec();
        now += FRAME_STEP_MS;
        let again = overlay.frame(now).spectrum.to_vec();
        if !bits_equal(&frozen, &again) {
            anomalies.push(format!("frozen spectrum changed between frames at cell {}", hotspot.cell));
        }
        if !bits_equal(&frozen, &live) {
            anomalies.push(format!("capture at cell {} froze a different spectrum than shown", hotspot.cell));
        }

        let click = strongest_bin_position(&frozen);
        match overlay.on_spectrum_click(click, context.counter, now) {
            SpectrumOutcome::Hit(_) => hits += 1,
            SpectrumOutcome::Miss { .. } => {
                misses += 1;
                if bot_expected_hit(&target, click, context.config) {
                    anomalies.push(format!(
                        "click at {click:.4} was within tolerance of {} but missed",
                        target.id
                    ));
                }
            }
            SpectrumOutcome::Ignored => {
                anomalies.push(format!("spectrum click ignored while locked at cell {}", hotspot.cell));
            }
        }
        overlay.reset();
    }

    let noise_checked = check_noise_capture(&mut overlay, context.rng, &mut now, &mut anomalies);

    PageResultLine {
        page: page.to_string(),
        salt: overlay.assignment().salt,
        allowed_cells: overlay.layout().allowed_cells.len(),
        page_targets: overlay.distribution().targets_for(page).len(),
        hotspots: hotspots.len(),
        hits,
        misses,
        noise_checked,
        anomalies,
    }
}

fn collect_assignment_anomalies(overlay: &SearchOverlay, catalog: &TargetCatalog) -> Vec<String> {
    let mut anomalies = Vec::new();
    let page = overlay.page_key();
    let layout = overlay.layout();

    let distribution = SiteDistribution::build(&catalog.target_ids(), catalog.pages(), page);
    let rebuilt = Assignment::build(
        &distribution,
        page,
        &layout.allowed_cells,
        overlay.config().grid.cell_count(),
    );
    if &rebuilt != overlay.assignment() {
        anomalies.push("assignment is not deterministic".to_string());
    }

    let total = catalog.targets().len();
    let page_count = distribution.pages.len();
    let sizes: Vec<usize> = distribution.by_page.values().map(Vec::len).collect();
    if total >= page_count {
        let base = total / page_count.max(1);
        if sizes.iter().any(|size| *size != base && *size != base + 1) {
            anomalies.push(format!("uneven partition: {sizes:?} for {total} targets"));
        }
        if sizes.iter().sum::<usize>() != total {
            anomalies.push(format!("partition lost targets: {sizes:?} for {total} targets"));
        }
    } else if total > 0 && sizes.iter().any(|size| *size != 1) {
        anomalies.push(format!("wraparound partition expected one target per page: {sizes:?}"));
    }

    let allowed: BTreeSet<usize> = layout.allowed_cells.iter().copied().collect();
    let mut seen = HashSet::new();
    for hotspot in overlay.assignment().hotspots() {
        if !seen.insert(hotspot.cell) {
            anomalies.push(format!("cell {} holds more than one target", hotspot.cell));
        }
        if !allowed.contains(&hotspot.cell) {
            anomalies.push(format!("cell {} is outside the allowed cells", hotspot.cell));
        }
    }
    anomalies
}

fn check_noise_capture(
    overlay: &mut SearchOverlay,
    rng: &mut StdRng,
    now: &mut u64,
    anomalies: &mut Vec<String>,
) -> bool {
    let Some(cell) = overlay
        .layout()
        .allowed_cells
        .iter()
        .copied()
        .find(|cell| overlay.assignment().hotspot(*cell).is_none())
    else {
        return false;
    };
    let (x, y) = aim_point(overlay, cell, (0.5, 0.5), 0.0, rng);
    overlay.on_mouse_move(x, y);
    *now += FRAME_STEP_MS;
    match overlay.on_background_click(x, y, *now) {
        CaptureOutcome::Locked { noise: true, .. } => {}
        other => {
            anomalies.push(format!("empty cell {cell} did not capture noise: {other:?}"));
            overlay.reset();
            return false;
        }
    }

    let spectrum = overlay.frame(*now).spectrum.to_vec();
    let outcome =
        overlay.on_spectrum_click(strongest_bin_position(&spectrum), &mut OfflineCounter, *now);
    if outcome != (SpectrumOutcome::Miss { noise: true }) {
        anomalies.push(format!("noise capture at cell {cell} produced {outcome:?}"));
    }
    overlay.reset();
    true
}

/// Viewport point for an in-cell offset, nudged by up to `jitter_px` on each axis.
fn aim_point(
    overlay: &SearchOverlay,
    cell: usize,
    offset: (f64, f64),
    jitter_px: f64,
    rng: &mut StdRng,
) -> (f64, f64) {
    let layout = overlay.layout();
    let (dx, dy) = if jitter_px > 0.0 {
        (
            rng.random_range(-jitter_px..=jitter_px) / layout.cell_width(),
            rng.random_range(-jitter_px..=jitter_px) / layout.row_height(),
        )
    } else {
        (0.0, 0.0)
    };
    let local_x = (offset.0 + dx).clamp(0.0, 0.999);
    let local_y = (offset.1 + dy).clamp(0.0, 0.999);
    layout
        .point_in_cell(cell, local_x, local_y)
        .unwrap_or((0.0, 0.0))
}

/// Normalized position of the strongest bin after subtracting a moving-average baseline.
fn strongest_bin_position(spectrum: &[f32]) -> f64 {
    if spectrum.is_empty() {
        return 0.0;
    }
    let half = BASELINE_WINDOW / 2;
    let mut best_index = 0usize;
    let mut best_value = f64::NEG_INFINITY;
    for index in 0..spectrum.len() {
        let start = index.saturating_sub(half);
        let end = (index + half + 1).min(spectrum.len());
        let window = &spectrum[start..end];
        let mean = window.iter().map(|v| *v as f64).sum::<f64>() / window.len() as f64;
        let residual = spectrum[index] as f64 - mean;
        if residual > best_value {
            best_value = residual;
            best_index = index;
        }
    }
    best_index as f64 / spectrum.len() as f64
}

fn bot_expected_hit(target: &Target, click: f64, config: &OverlayConfig) -> bool {
    let position = config.signal.normalized_position(target.frequency_hz);
    evaluate_hit(click, position, get_difficulty_profile(target.difficulty).tolerance)
}

fn bits_equal(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

fn load_catalog(path: Option<&Path>, run_id: &str) -> TargetCatalog {
    let result = match path {
        Some(path) => TargetCatalog::load(path),
        None => TargetCatalog::from_json_str(DEMO_CATALOG),
    };
    match result {
        Ok(catalog) => {
            if catalog.is_empty() {
                log(
                    Level::Warn,
                    "catalog_empty",
                    run_id,
                    None,
                    json!({ "pages": catalog.pages().len() }),
                );
            }
            catalog
        }
        Err(error) => {
            log(
                Level::Warn,
                "catalog_unavailable",
                run_id,
                None,
                json!({ "error": error.to_string() }),
            );
            TargetCatalog::default()
        }
    }
}

fn apply_difficulty(catalog: TargetCatalog, cli: &Cli) -> TargetCatalog {
    let Some(difficulty) = cli.difficulty.as_deref().and_then(Difficulty::parse) else {
        return catalog;
    };
    let targets = catalog
        .targets()
        .iter()
        .cloned()
        .map(|mut target| {
            target.difficulty = difficulty;
            target
        })
        .collect();
    TargetCatalog::new(targets, catalog.pages().to_vec())
}

fn resolve_pages(catalog: &TargetCatalog, requested: &[String]) -> Vec<String> {
    let requested: Vec<String> = requested
        .iter()
        .map(|page| page.trim().to_string())
        .filter(|page| !page.is_empty())
        .collect();
    if !requested.is_empty() {
        return requested;
    }
    if catalog.pages().is_empty() {
        return vec!["home".to_string()];
    }
    catalog.pages().to_vec()
}

fn default_run_id(seed: u64, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn build_run_summary(
    run_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    pages: Vec<PageResultLine>,
) -> RunSummary {
    let hotspot_count = pages.iter().map(|page| page.hotspots).sum();
    let hit_count: usize = pages.iter().map(|page| page.hits).sum();
    let attempts: usize = pages.iter().map(|page| page.hits + page.misses).sum();
    let hit_rate = if attempts == 0 {
        0.0
    } else {
        (hit_count as f64 / attempts as f64 * 1000.0).round() / 1000.0
    };
    RunSummary {
        run_id,
        started_at_ms,
        finished_at_ms,
        page_count: pages.len(),
        hotspot_count,
        hit_rate,
        anomaly_count: pages.iter().map(|page| page.anomalies.len()).sum(),
        pages,
    }
}

fn log(level: Level, event: &str, run_id: &str, page: Option<&str>, details: Value) {
    let mut line = StructuredLogLine::new(level, "simulate", event, details).with_run_id(run_id);
    if let Some(page) = page {
        line = line.with_page(page);
    }
    line.emit();
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, summary_text)
}
