use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "easy" => Some(Self::Easy),
            "medium" => Some(Self::Medium),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub name: String,
    #[serde(rename = "frequencyHz")]
    pub frequency_hz: f64,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

/// Viewport-relative rectangle, as a browser reports bounding boxes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x < self.right() && y >= self.top && y < self.bottom()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    #[serde(rename = "scrollY")]
    pub scroll_y: f64,
    #[serde(rename = "documentHeight")]
    pub document_height: f64,
}

impl Viewport {
    pub fn fixed(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            scroll_y: 0.0,
            document_height: height,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CellCoord {
    pub col: usize,
    pub row: usize,
    pub index: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Hotspot {
    pub cell: usize,
    #[serde(rename = "targetId")]
    pub target_id: String,
    #[serde(rename = "offsetX")]
    pub offset_x: f64,
    #[serde(rename = "offsetY")]
    pub offset_y: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryEntry {
    #[serde(rename = "targetId")]
    pub target_id: String,
    pub rank: u64,
    #[serde(rename = "foundAtMs")]
    pub found_at_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankSource {
    Global,
    LocalFallback,
    Session,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    Hit,
    Repeat,
    Miss,
    Noise,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverlayEvent {
    Captured {
        #[serde(rename = "captureId")]
        capture_id: u64,
        cell: Option<usize>,
        noise: bool,
    },
    Hit {
        #[serde(rename = "targetId")]
        target_id: String,
        rank: u64,
        repeat: bool,
        source: RankSource,
    },
    Miss {
        #[serde(rename = "captureId")]
        capture_id: u64,
        noise: bool,
    },
    HintRevealed {
        #[serde(rename = "captureId")]
        capture_id: u64,
    },
    Reset,
    GeometryFallback {
        #[serde(rename = "allowedCells")]
        allowed_cells: usize,
    },
}
