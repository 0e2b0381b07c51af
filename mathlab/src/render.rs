//! SVG rendering for figures
//!
//! Produces a standalone `<svg>` document: axes frame, 1-2-5 ticks,
//! optional grid, the series, reference lines, annotations, legend and
//! labels. All text is XML-escaped and colors come from [`Color`], so the
//! output is safe to inline into the page.
//!
//! [`Color`]: crate::script::Color

use crate::script::{Figure, LineStyle, Orientation, SeriesKind};
use std::fmt::Write;

const MARGIN_LEFT: f64 = 64.0;
const MARGIN_RIGHT: f64 = 24.0;
const MARGIN_TOP: f64 = 20.0;
const TITLE_SPACE: f64 = 28.0;
const MARGIN_BOTTOM: f64 = 52.0;
const TICK_TARGET: usize = 6;
const REF_LINE_COLOR: &str = "#444444";
// pixel coordinates far outside the clip area are pinned here
const PX_LIMIT: f64 = 1e9;

/// Linear map from data coordinates to pixels
#[derive(Debug, Clone, Copy)]
struct Axis {
    lo: f64,
    hi: f64,
    px_lo: f64,
    px_hi: f64,
}

impl Axis {
    // halved operands keep the differences finite near f64::MAX
    fn to_px(&self, v: f64) -> f64 {
        let t = (v / 2.0 - self.lo / 2.0) / (self.hi / 2.0 - self.lo / 2.0);
        (self.px_lo + t * (self.px_hi - self.px_lo)).clamp(-PX_LIMIT, PX_LIMIT)
    }

    fn span(&self) -> f64 {
        self.hi - self.lo
    }

    fn px_span(&self) -> f64 {
        (self.px_hi - self.px_lo).abs()
    }
}

/// Running min/max over finite values
#[derive(Debug, Clone, Copy)]
struct Bounds {
    lo: f64,
    hi: f64,
}

impl Bounds {
    fn new() -> Self {
        Self {
            lo: f64::INFINITY,
            hi: f64::NEG_INFINITY,
        }
    }

    fn add(&mut self, v: f64) {
        if v.is_finite() {
            self.lo = self.lo.min(v);
            self.hi = self.hi.max(v);
        }
    }

    /// Final range: padded, widened when degenerate, (0, 1) when empty
    fn range(self) -> (f64, f64) {
        if self.lo > self.hi {
            return (0.0, 1.0);
        }
        let pad = if self.lo == self.hi {
            if self.lo == 0.0 { 1.0 } else { self.lo.abs() * 0.1 }
        } else {
            (self.hi / 2.0 - self.lo / 2.0) * 0.1
        };
        (finite(self.lo - pad), finite(self.hi + pad))
    }
}

fn finite(v: f64) -> f64 {
    v.clamp(-f64::MAX, f64::MAX)
}

/// Render a figure as an SVG document of the given pixel size
pub fn render_svg(fig: &Figure, width: u32, height: u32) -> String {
    let width = f64::from(width.max(160));
    let height = f64::from(height.max(120));
    let top = MARGIN_TOP + if fig.title.is_some() { TITLE_SPACE } else { 0.0 };

    let (xlo, xhi) = fig.xlim.unwrap_or_else(|| x_bounds(fig).range());
    let (ylo, yhi) = fig.ylim.unwrap_or_else(|| y_bounds(fig).range());
    let mut xa = Axis {
        lo: xlo,
        hi: xhi,
        px_lo: MARGIN_LEFT,
        px_hi: width - MARGIN_RIGHT,
    };
    // y grows upward
    let mut ya = Axis {
        lo: ylo,
        hi: yhi,
        px_lo: height - MARGIN_BOTTOM,
        px_hi: top,
    };
    if fig.equal_aspect {
        equalize(&mut xa, &mut ya);
    }

    let plot_w = xa.px_span();
    let plot_h = ya.px_span();

    let mut svg = String::new();
    let _ = write!(
        svg,
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif" font-size="12">
<rect width="{w}" height="{h}" fill="white"/>
<defs><clipPath id="plot-area"><rect x="{x:.1}" y="{y:.1}" width="{pw:.1}" height="{ph:.1}"/></clipPath></defs>
"##,
        w = width,
        h = height,
        x = MARGIN_LEFT,
        y = top,
        pw = plot_w,
        ph = plot_h,
    );

    draw_ticks(&mut svg, fig.grid, &xa, &ya);
    draw_zero_axes(&mut svg, &xa, &ya);
    let _ = writeln!(
        svg,
        r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="none" stroke="#333333"/>"##,
        MARGIN_LEFT, top, plot_w, plot_h
    );

    svg.push_str(r#"<g clip-path="url(#plot-area)">"#);
    svg.push('\n');
    draw_series(&mut svg, fig, &xa, &ya);
    draw_ref_lines(&mut svg, fig, &xa, &ya);
    for a in &fig.annotations {
        if a.x.is_finite() && a.y.is_finite() {
            let _ = writeln!(
                svg,
                r##"<text x="{:.1}" y="{:.1}" fill="#222222">{}</text>"##,
                xa.to_px(a.x) + 4.0,
                ya.to_px(a.y) - 4.0,
                escape(&a.text)
            );
        }
    }
    svg.push_str("</g>\n");

    if fig.legend {
        draw_legend(&mut svg, fig, &xa, &ya);
    }
    draw_labels(&mut svg, fig, width, height, &xa, &ya);

    svg.push_str("</svg>\n");
    svg
}

fn x_bounds(fig: &Figure) -> Bounds {
    let mut b = Bounds::new();
    for s in &fig.series {
        let half = if s.kind == SeriesKind::Bar {
            bar_width(&s.xs) / 2.0
        } else {
            0.0
        };
        for &x in &s.xs {
            b.add(x - half);
            b.add(x + half);
        }
    }
    for r in &fig.ref_lines {
        if r.orientation == Orientation::Vertical {
            b.add(r.value);
        }
    }
    for a in &fig.annotations {
        b.add(a.x);
    }
    b
}

fn y_bounds(fig: &Figure) -> Bounds {
    let mut b = Bounds::new();
    for s in &fig.series {
        if s.kind == SeriesKind::Bar {
            b.add(0.0);
        }
        for &y in &s.ys {
            b.add(y);
        }
    }
    for r in &fig.ref_lines {
        if r.orientation == Orientation::Horizontal {
            b.add(r.value);
        }
    }
    for a in &fig.annotations {
        b.add(a.y);
    }
    b
}

/// Widen one axis so a unit covers the same number of pixels on both
fn equalize(xa: &mut Axis, ya: &mut Axis) {
    let x_scale = xa.px_span() / xa.span();
    let y_scale = ya.px_span() / ya.span();
    if !(x_scale.is_normal() && y_scale.is_normal()) {
        return;
    }
    let widen = |axis: &mut Axis, want: f64| {
        let mid = axis.lo / 2.0 + axis.hi / 2.0;
        let (lo, hi) = (mid - want / 2.0, mid + want / 2.0);
        if lo.is_finite() && hi.is_finite() {
            axis.lo = lo;
            axis.hi = hi;
        }
    };
    if x_scale > y_scale {
        widen(xa, xa.px_span() / y_scale);
    } else if y_scale > x_scale {
        widen(ya, ya.px_span() / x_scale);
    }
}

/// Bar width: 80% of the smallest gap between distinct x positions
fn bar_width(xs: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = xs.iter().copied().filter(|x| x.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    let gap = sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| *d > 0.0)
        .fold(f64::INFINITY, f64::min);
    if gap.is_finite() { gap * 0.8 } else { 0.8 }
}

/// Tick step from the 1-2-5 sequence giving roughly `target` ticks
pub fn nice_step(span: f64, target: usize) -> f64 {
    if !(span.is_finite() && span > 0.0) {
        return 1.0;
    }
    let raw = span / target.max(1) as f64;
    let mag = 10f64.powf(raw.log10().floor());
    let norm = raw / mag;
    let nice = if norm < 1.5 {
        1.0
    } else if norm < 3.0 {
        2.0
    } else if norm < 7.0 {
        5.0
    } else {
        10.0
    };
    nice * mag
}

/// Tick positions within [lo, hi]
pub fn nice_ticks(lo: f64, hi: f64, target: usize) -> Vec<f64> {
    let step = nice_step(hi - lo, target);
    let first = (lo / step).ceil();
    let last = (hi / step).floor();
    if !(first.is_finite() && last.is_finite()) || last - first > 1000.0 {
        return Vec::new();
    }
    let mut ticks = Vec::new();
    let mut k = first;
    while k <= last {
        let v = k * step;
        // avoid printing -0
        ticks.push(if v == 0.0 { 0.0 } else { v });
        k += 1.0;
    }
    ticks
}

fn format_tick(v: f64, step: f64) -> String {
    let decimals = if step >= 1.0 {
        0
    } else {
        (-step.log10().floor()) as usize
    };
    format!("{:.*}", decimals, v)
}

fn draw_ticks(svg: &mut String, grid: bool, xa: &Axis, ya: &Axis) {
    let (left, right) = (xa.px_lo, xa.px_hi);
    let (bottom, top) = (ya.px_lo, ya.px_hi);

    let xstep = nice_step(xa.span(), TICK_TARGET);
    for t in nice_ticks(xa.lo, xa.hi, TICK_TARGET) {
        let px = xa.to_px(t);
        if grid {
            let _ = writeln!(
                svg,
                r##"<line x1="{px:.1}" y1="{top:.1}" x2="{px:.1}" y2="{bottom:.1}" stroke="#dddddd"/>"##
            );
        }
        let _ = writeln!(
            svg,
            r##"<line x1="{px:.1}" y1="{bottom:.1}" x2="{px:.1}" y2="{:.1}" stroke="#333333"/><text x="{px:.1}" y="{:.1}" text-anchor="middle">{}</text>"##,
            bottom + 5.0,
            bottom + 18.0,
            format_tick(t, xstep)
        );
    }

    let ystep = nice_step(ya.span(), TICK_TARGET);
    for t in nice_ticks(ya.lo, ya.hi, TICK_TARGET) {
        let py = ya.to_px(t);
        if grid {
            let _ = writeln!(
                svg,
                r##"<line x1="{left:.1}" y1="{py:.1}" x2="{right:.1}" y2="{py:.1}" stroke="#dddddd"/>"##
            );
        }
        let _ = writeln!(
            svg,
            r##"<line x1="{:.1}" y1="{py:.1}" x2="{left:.1}" y2="{py:.1}" stroke="#333333"/><text x="{:.1}" y="{:.1}" text-anchor="end">{}</text>"##,
            left - 5.0,
            left - 8.0,
            py + 4.0,
            format_tick(t, ystep)
        );
    }
}

/// Lines through the origin, when it is inside the view
fn draw_zero_axes(svg: &mut String, xa: &Axis, ya: &Axis) {
    if xa.lo < 0.0 && xa.hi > 0.0 {
        let px = xa.to_px(0.0);
        let _ = writeln!(
            svg,
            r##"<line x1="{px:.1}" y1="{:.1}" x2="{px:.1}" y2="{:.1}" stroke="#999999" class="zero-axis"/>"##,
            ya.px_hi, ya.px_lo
        );
    }
    if ya.lo < 0.0 && ya.hi > 0.0 {
        let py = ya.to_px(0.0);
        let _ = writeln!(
            svg,
            r##"<line x1="{:.1}" y1="{py:.1}" x2="{:.1}" y2="{py:.1}" stroke="#999999" class="zero-axis"/>"##,
            xa.px_lo, xa.px_hi
        );
    }
}

fn dash_array(style: LineStyle) -> &'static str {
    match style {
        LineStyle::Solid => "",
        LineStyle::Dashed => r#" stroke-dasharray="8 5""#,
        LineStyle::Dotted => r#" stroke-dasharray="2 4""#,
    }
}

/// Path data for a polyline, starting a new subpath after any gap
fn line_path(xs: &[f64], ys: &[f64], xa: &Axis, ya: &Axis) -> String {
    let mut d = String::new();
    let mut pen_down = false;
    for (&x, &y) in xs.iter().zip(ys) {
        if !(x.is_finite() && y.is_finite()) {
            pen_down = false;
            continue;
        }
        let cmd = if pen_down { 'L' } else { 'M' };
        let _ = write!(d, "{}{:.2},{:.2} ", cmd, xa.to_px(x), ya.to_px(y));
        pen_down = true;
    }
    d.trim_end().to_string()
}

fn draw_series(svg: &mut String, fig: &Figure, xa: &Axis, ya: &Axis) {
    for (i, s) in fig.series.iter().enumerate() {
        let color = fig.series_color(i);
        match s.kind {
            SeriesKind::Line => {
                let d = line_path(&s.xs, &s.ys, xa, ya);
                if !d.is_empty() {
                    let _ = writeln!(
                        svg,
                        r#"<path d="{}" fill="none" stroke="{}" stroke-width="2"{}/>"#,
                        d,
                        color,
                        dash_array(s.style)
                    );
                }
            }
            SeriesKind::Scatter => {
                for (&x, &y) in s.xs.iter().zip(&s.ys) {
                    if x.is_finite() && y.is_finite() {
                        let _ = writeln!(
                            svg,
                            r#"<circle cx="{:.2}" cy="{:.2}" r="3.5" fill="{}"/>"#,
                            xa.to_px(x),
                            ya.to_px(y),
                            color
                        );
                    }
                }
            }
            SeriesKind::Bar => {
                let half = bar_width(&s.xs) / 2.0;
                let base = ya.to_px(0.0);
                for (&x, &h) in s.xs.iter().zip(&s.ys) {
                    if !(x.is_finite() && h.is_finite()) {
                        continue;
                    }
                    let x0 = xa.to_px(x - half);
                    let x1 = xa.to_px(x + half);
                    let top = ya.to_px(h);
                    let _ = writeln!(
                        svg,
                        r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="{}"/>"#,
                        x0.min(x1),
                        top.min(base),
                        (x1 - x0).abs(),
                        (base - top).abs(),
                        color
                    );
                }
            }
        }
    }
}

fn draw_ref_lines(svg: &mut String, fig: &Figure, xa: &Axis, ya: &Axis) {
    for r in &fig.ref_lines {
        let color = r.color.as_ref().map_or(REF_LINE_COLOR, |c| c.as_str());
        let (x1, y1, x2, y2) = match r.orientation {
            Orientation::Horizontal => {
                let py = ya.to_px(r.value);
                (xa.px_lo, py, xa.px_hi, py)
            }
            Orientation::Vertical => {
                let px = xa.to_px(r.value);
                (px, ya.px_lo, px, ya.px_hi)
            }
        };
        let _ = writeln!(
            svg,
            r#"<line x1="{x1:.2}" y1="{y1:.2}" x2="{x2:.2}" y2="{y2:.2}" stroke="{color}" stroke-width="1.2"/>"#
        );
    }
}

fn draw_legend(svg: &mut String, fig: &Figure, xa: &Axis, ya: &Axis) {
    let entries = fig.legend_entries();
    if entries.is_empty() {
        return;
    }
    let longest = entries
        .iter()
        .map(|(label, _, _)| label.chars().count())
        .max()
        .unwrap_or(0);
    let box_w = 40.0 + longest as f64 * 7.0;
    let box_h = 8.0 + entries.len() as f64 * 18.0;
    let x = xa.px_hi - box_w - 8.0;
    let y = ya.px_hi + 8.0;

    let _ = writeln!(
        svg,
        r##"<rect x="{x:.1}" y="{y:.1}" width="{box_w:.1}" height="{box_h:.1}" fill="white" fill-opacity="0.85" stroke="#bbbbbb"/>"##
    );
    for (i, (label, color, kind)) in entries.iter().enumerate() {
        let cy = y + 13.0 + i as f64 * 18.0;
        let swatch = match kind {
            Some(SeriesKind::Scatter) => format!(
                r#"<circle cx="{:.1}" cy="{cy:.1}" r="3.5" fill="{color}"/>"#,
                x + 18.0
            ),
            Some(SeriesKind::Bar) => format!(
                r#"<rect x="{:.1}" y="{:.1}" width="12" height="10" fill="{color}"/>"#,
                x + 12.0,
                cy - 5.0
            ),
            _ => format!(
                r#"<line x1="{:.1}" y1="{cy:.1}" x2="{:.1}" y2="{cy:.1}" stroke="{color}" stroke-width="2"/>"#,
                x + 8.0,
                x + 28.0
            ),
        };
        let _ = writeln!(
            svg,
            r#"{}<text x="{:.1}" y="{:.1}">{}</text>"#,
            swatch,
            x + 34.0,
            cy + 4.0,
            escape(label)
        );
    }
}

fn draw_labels(svg: &mut String, fig: &Figure, width: f64, height: f64, xa: &Axis, ya: &Axis) {
    if let Some(title) = &fig.title {
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="16" font-weight="bold">{}</text>"#,
            width / 2.0,
            MARGIN_TOP + 12.0,
            escape(title)
        );
    }
    if let Some(xlabel) = &fig.xlabel {
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
            (xa.px_lo + xa.px_hi) / 2.0,
            height - 12.0,
            escape(xlabel)
        );
    }
    if let Some(ylabel) = &fig.ylabel {
        let cy = (ya.px_lo + ya.px_hi) / 2.0;
        let _ = writeln!(
            svg,
            r#"<text x="16" y="{cy:.1}" text-anchor="middle" transform="rotate(-90 16 {cy:.1})">{}</text>"#,
            escape(ylabel)
        );
    }
}

/// Escape text for XML content and attribute values
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
