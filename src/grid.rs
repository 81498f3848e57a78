use std::collections::BTreeSet;

use crate::constants::{BOTTOM_MARGIN_PX, GRID_COLS, GRID_ROWS, TOP_MARGIN_PX};
use crate::types::{CellCoord, Rect, Viewport};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridConfig {
    pub cols: usize,
    pub rows: usize,
    pub top_margin_px: f64,
    pub bottom_margin_px: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cols: GRID_COLS,
            rows: GRID_ROWS,
            top_margin_px: TOP_MARGIN_PX,
            bottom_margin_px: BOTTOM_MARGIN_PX,
        }
    }
}

impl GridConfig {
    pub fn cell_count(&self) -> usize {
        self.cols.max(1) * self.rows.max(1)
    }
}

/// Supplies the viewport-relative boxes of interactive page chrome
/// (nav, buttons, links) that hotspots must stay clear of.
pub trait ChromeGeometry {
    fn chrome_rects(&self) -> Vec<Rect>;
}

impl ChromeGeometry for [Rect] {
    fn chrome_rects(&self) -> Vec<Rect> {
        self.to_vec()
    }
}

impl ChromeGeometry for Vec<Rect> {
    fn chrome_rects(&self) -> Vec<Rect> {
        self.clone()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoChrome;

impl ChromeGeometry for NoChrome {
    fn chrome_rects(&self) -> Vec<Rect> {
        Vec::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellLocation {
    pub coord: CellCoord,
    pub local_x: f64,
    pub local_y: f64,
}

/// Immutable geometry snapshot; rebuilt wholesale on resize and scroll.
#[derive(Clone, Debug)]
pub struct GridLayout {
    pub cols: usize,
    pub rows: usize,
    pub width: f64,
    pub scroll_y: f64,
    pub band_top: f64,
    pub band_bottom: f64,
    pub base_cells: Vec<usize>,
    pub allowed_cells: Vec<usize>,
    pub used_fallback: bool,
    chrome: Vec<Rect>,
}

impl GridLayout {
    pub fn compute(config: &GridConfig, viewport: Viewport, chrome: &dyn ChromeGeometry) -> Self {
        let cols = config.cols.max(1);
        let rows = config.rows.max(1);
        let width = viewport.width.max(1.0);
        let height = viewport.height.max(1.0);
        let max_margin = (height - 1.0).max(0.0);
        let top_margin = config.top_margin_px.max(0.0).min(max_margin);
        let bottom_margin = config.bottom_margin_px.max(0.0).min(max_margin);
        let document_height = viewport.document_height.max(height);
        let band_top = top_margin;
        let band_bottom = (document_height - bottom_margin).max(band_top + 1.0);
        let scroll_y = if viewport.scroll_y.is_finite() {
            viewport.scroll_y.max(0.0)
        } else {
            0.0
        };

        let base_cells: Vec<usize> = if rows > 2 {
            (cols..(rows - 1) * cols).collect()
        } else {
            (0..rows * cols).collect()
        };

        let chrome: Vec<Rect> = chrome
            .chrome_rects()
            .into_iter()
            .filter(|rect| !rect.is_empty())
            .collect();

        let mut layout = Self {
            cols,
            rows,
            width,
            scroll_y,
            band_top,
            band_bottom,
            base_cells,
            allowed_cells: Vec::new(),
            used_fallback: false,
            chrome,
        };

        let forbidden = layout.forbidden_cells();
        let allowed: Vec<usize> = layout
            .base_cells
            .iter()
            .copied()
            .filter(|cell| !forbidden.contains(cell))
            .collect();
        if allowed.is_empty() {
            layout.allowed_cells = layout.base_cells.clone();
            layout.used_fallback = true;
        } else {
            layout.allowed_cells = allowed;
        }
        layout
    }

    pub fn cell_count(&self) -> usize {
        self.cols * self.rows
    }

    pub fn cell_width(&self) -> f64 {
        self.width / self.cols as f64
    }

    pub fn row_height(&self) -> f64 {
        (self.band_bottom - self.band_top) / self.rows as f64
    }

    pub fn coord_of(&self, index: usize) -> Option<CellCoord> {
        if index >= self.cell_count() {
            return None;
        }
        Some(CellCoord {
            col: index % self.cols,
            row: index / self.cols,
            index,
        })
    }

    /// Maps a viewport point into the band; `None` outside the band.
    pub fn locate(&self, x: f64, y: f64) -> Option<CellLocation> {
        let doc_y = y + self.scroll_y;
        if !(x >= 0.0 && x < self.width) || !(doc_y >= self.band_top && doc_y < self.band_bottom) {
            return None;
        }
        let gx = x / self.cell_width();
        let gy = (doc_y - self.band_top) / self.row_height();
        let col = (gx.floor() as usize).min(self.cols - 1);
        let row = (gy.floor() as usize).min(self.rows - 1);
        Some(CellLocation {
            coord: CellCoord {
                col,
                row,
                index: row * self.cols + col,
            },
            local_x: (gx - col as f64).clamp(0.0, 1.0),
            local_y: (gy - row as f64).clamp(0.0, 1.0),
        })
    }

    /// Inverse of `locate`: viewport point for an in-cell offset.
    pub fn point_in_cell(&self, index: usize, local_x: f64, local_y: f64) -> Option<(f64, f64)> {
        let coord = self.coord_of(index)?;
        let x = (coord.col as f64 + local_x) * self.cell_width();
        let doc_y = self.band_top + (coord.row as f64 + local_y) * self.row_height();
        Some((x, doc_y - self.scroll_y))
    }

    pub fn hits_chrome(&self, x: f64, y: f64) -> bool {
        self.chrome.iter().any(|rect| rect.contains(x, y))
    }

    fn forbidden_cells(&self) -> BTreeSet<usize> {
        let mut forbidden = BTreeSet::new();
        let cell_width = self.cell_width();
        let row_height = self.row_height();
        for rect in &self.chrome {
            let doc_top = rect.top + self.scroll_y;
            let doc_bottom = rect.bottom() + self.scroll_y;
            if doc_bottom <= self.band_top
                || doc_top >= self.band_bottom
                || rect.right() <= 0.0
                || rect.left >= self.width
            {
                continue;
            }

            let (col_start, col_end) = span(
                rect.left.max(0.0) / cell_width,
                rect.right().min(self.width) / cell_width,
                self.cols,
            );
            let (row_start, row_end) = span(
                (doc_top.max(self.band_top) - self.band_top) / row_height,
                (doc_bottom.min(self.band_bottom) - self.band_top) / row_height,
                self.rows,
            );
            for row in row_start..=row_end {
                for col in col_start..=col_end {
                    forbidden.insert(row * self.cols + col);
                }
            }
        }
        forbidden
    }
}

// Grid-unit interval [start, end) to an inclusive index range.
fn span(start: f64, end: f64, count: usize) -> (usize, usize) {
    let first = (start.floor().max(0.0) as usize).min(count - 1);
    let last = ((end.ceil() as usize).saturating_sub(1)).clamp(first, count - 1);
    (first, last)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout_with(chrome: Vec<Rect>) -> GridLayout {
        // 800x600 viewport, band 100..500 => cells are 100px wide and ~66.7px tall.
        GridLayout::compute(
            &GridConfig {
                cols: 8,
                rows: 6,
                top_margin_px: 100.0,
                bottom_margin_px: 100.0,
            },
            Viewport::fixed(800.0, 600.0),
            &chrome,
        )
    }

    #[test]
    fn default_grid_without_chrome_has_thirty_two_cells() {
        let layout = GridLayout::compute(
            &GridConfig::default(),
            Viewport::fixed(1280.0, 800.0),
            &NoChrome,
        );
        assert_eq!(layout.cell_count(), 48);
        assert_eq!(layout.allowed_cells.len(), 32);
        assert!(!layout.used_fallback);
        assert!(layout.allowed_cells.iter().all(|cell| *cell >= 8 && *cell < 40));
    }

    #[test]
    fn chrome_rect_forbids_overlapping_cells_only() {
        // Covers cols 0..=1 of row 1 (band y 166.7..233.3).
        let layout = layout_with(vec![Rect::new(10.0, 180.0, 150.0, 20.0)]);
        assert!(!layout.allowed_cells.contains(&8));
        assert!(!layout.allowed_cells.contains(&9));
        assert!(layout.allowed_cells.contains(&10));
        assert_eq!(layout.allowed_cells.len(), 30);
    }

    #[test]
    fn rect_touching_cell_edge_does_not_spill_over() {
        let layout = layout_with(vec![Rect::new(100.0, 180.0, 100.0, 20.0)]);
        assert!(layout.allowed_cells.contains(&8));
        assert!(!layout.allowed_cells.contains(&9));
        assert!(layout.allowed_cells.contains(&10));
    }

    #[test]
    fn zero_area_chrome_is_ignored() {
        let layout = layout_with(vec![Rect::new(10.0, 180.0, 0.0, 300.0)]);
        assert_eq!(layout.allowed_cells.len(), 32);
    }

    #[test]
    fn full_cover_falls_back_to_base_cells() {
        let layout = layout_with(vec![Rect::new(0.0, 0.0, 800.0, 600.0)]);
        assert!(layout.used_fallback);
        assert_eq!(layout.allowed_cells, layout.base_cells);
        assert_eq!(layout.allowed_cells.len(), 32);
    }

    #[test]
    fn chrome_outside_band_is_ignored() {
        let layout = layout_with(vec![
            Rect::new(0.0, 0.0, 800.0, 90.0),
            Rect::new(0.0, 520.0, 800.0, 80.0),
        ]);
        assert_eq!(layout.allowed_cells.len(), 32);
    }

    #[test]
    fn scroll_moves_chrome_into_lower_rows() {
        let mut viewport = Viewport::fixed(800.0, 600.0);
        viewport.document_height = 1800.0;
        viewport.scroll_y = 1000.0;
        let config = GridConfig {
            cols: 8,
            rows: 6,
            top_margin_px: 100.0,
            bottom_margin_px: 100.0,
        };
        // Band 100..1700, rows 266.7px. Viewport y=100 + scroll => doc 1100 => row 3.
        let layout = GridLayout::compute(&config, viewport, &vec![Rect::new(0.0, 100.0, 50.0, 10.0)]);
        assert!(!layout.allowed_cells.contains(&24));
        assert!(layout.allowed_cells.contains(&8));
    }

    #[test]
    fn oversized_margins_and_zero_viewport_are_clamped() {
        let layout = GridLayout::compute(
            &GridConfig {
                cols: 8,
                rows: 6,
                top_margin_px: 5_000.0,
                bottom_margin_px: 5_000.0,
            },
            Viewport::fixed(0.0, 0.0),
            &NoChrome,
        );
        assert!(layout.width >= 1.0);
        assert!(layout.band_bottom > layout.band_top);
        assert!(layout.row_height() > 0.0);
        assert_eq!(layout.allowed_cells.len(), 32);
    }

    #[test]
    fn tiny_grid_keeps_every_cell() {
        let layout = GridLayout::compute(
            &GridConfig {
                cols: 3,
                rows: 2,
                top_margin_px: 0.0,
                bottom_margin_px: 0.0,
            },
            Viewport::fixed(300.0, 200.0),
            &NoChrome,
        );
        assert_eq!(layout.allowed_cells, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn locate_maps_through_band() {
        let layout = layout_with(Vec::new());
        assert!(layout.locate(50.0, 50.0).is_none());
        assert!(layout.locate(50.0, 550.0).is_none());
        assert!(layout.locate(-1.0, 300.0).is_none());
        assert!(layout.locate(f64::NAN, 300.0).is_none());

        let hit = layout.locate(250.0, 100.0 + 400.0 / 6.0 * 2.5).expect("inside band");
        assert_eq!(hit.coord.col, 2);
        assert_eq!(hit.coord.row, 2);
        assert_eq!(hit.coord.index, 18);
        assert!((hit.local_x - 0.5).abs() < 1e-9);
        assert!((hit.local_y - 0.5).abs() < 1e-9);
    }

    #[test]
    fn point_in_cell_inverts_locate() {
        let layout = layout_with(Vec::new());
        let (x, y) = layout.point_in_cell(27, 0.3, 0.7).expect("valid cell");
        let hit = layout.locate(x, y).expect("inside band");
        assert_eq!(hit.coord.index, 27);
        assert!((hit.local_x - 0.3).abs() < 1e-9);
        assert!((hit.local_y - 0.7).abs() < 1e-9);
        assert!(layout.point_in_cell(48, 0.5, 0.5).is_none());
    }

    #[test]
    fn hits_chrome_uses_viewport_coordinates() {
        let layout = layout_with(vec![Rect::new(10.0, 10.0, 40.0, 40.0)]);
        assert!(layout.hits_chrome(20.0, 20.0));
        assert!(!layout.hits_chrome(60.0, 20.0));
    }
}
