//! Chart handle produced by a plot script

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Default series colors, in the order matplotlib cycles them
pub const PALETTE: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

static HEX_COLOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("hex color pattern is valid")
});

static NAMED_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z]{3,20}$").expect("named color pattern is valid"));

/// A color that is safe to place in an SVG attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Color(String);

impl Color {
    /// Accepts `#rgb`, `#rrggbb`, CSS color names, matplotlib single-letter
    /// codes, `C0`..`C9`, and `tab:<name>`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let short = match raw {
            "b" => Some("blue"),
            "g" => Some("green"),
            "r" => Some("red"),
            "c" => Some("cyan"),
            "m" => Some("magenta"),
            "y" => Some("yellow"),
            "k" => Some("black"),
            "w" => Some("white"),
            _ => None,
        };
        if let Some(name) = short {
            return Some(Self(name.to_string()));
        }

        if let Some(idx) = raw.strip_prefix('C').and_then(|d| d.parse::<usize>().ok()) {
            return PALETTE.get(idx).map(|c| Self(c.to_string()));
        }

        if let Some(name) = raw.strip_prefix("tab:") {
            let idx = [
                "blue", "orange", "green", "red", "purple", "brown", "pink", "gray", "olive", "cyan",
            ]
            .iter()
            .position(|n| *n == name)?;
            return Some(Self(PALETTE[idx].to_string()));
        }

        if HEX_COLOR.is_match(raw) || NAMED_COLOR.is_match(raw) {
            return Some(Self(raw.to_lowercase()));
        }

        None
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Stroke pattern for line series
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStyle {
    #[default]
    #[serde(alias = "-")]
    Solid,
    #[serde(alias = "--", alias = "dash")]
    Dashed,
    #[serde(alias = ":", alias = "dot")]
    Dotted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    Line,
    Scatter,
    Bar,
}

/// One data series
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub kind: SeriesKind,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub label: Option<String>,
    pub color: Option<Color>,
    pub style: LineStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// A line spanning the whole plot at a fixed x or y
#[derive(Debug, Clone, PartialEq)]
pub struct RefLine {
    pub orientation: Orientation,
    pub value: f64,
    pub label: Option<String>,
    pub color: Option<Color>,
}

/// Text placed at a data coordinate
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub x: f64,
    pub y: f64,
    pub text: String,
}

/// The chart handle a plot script binds to `fig`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Figure {
    pub title: Option<String>,
    pub xlabel: Option<String>,
    pub ylabel: Option<String>,
    pub grid: bool,
    pub legend: bool,
    pub xlim: Option<(f64, f64)>,
    pub ylim: Option<(f64, f64)>,
    pub equal_aspect: bool,
    pub series: Vec<Series>,
    pub ref_lines: Vec<RefLine>,
    pub annotations: Vec<Annotation>,
}

impl Figure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries for the legend box: label and color, in drawing order
    pub fn legend_entries(&self) -> Vec<(&str, String, Option<SeriesKind>)> {
        let mut entries = Vec::new();
        for (i, s) in self.series.iter().enumerate() {
            if let Some(label) = &s.label {
                entries.push((label.as_str(), self.series_color(i), Some(s.kind)));
            }
        }
        for r in &self.ref_lines {
            if let Some(label) = &r.label {
                let color = r
                    .color
                    .as_ref()
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_else(|| "#444444".to_string());
                entries.push((label.as_str(), color, None));
            }
        }
        entries
    }

    /// Color of the i-th series: explicit, else the palette cycle
    pub fn series_color(&self, i: usize) -> String {
        self.series[i]
            .color
            .as_ref()
            .map(|c| c.as_str().to_string())
            .unwrap_or_else(|| PALETTE[i % PALETTE.len()].to_string())
    }
}
