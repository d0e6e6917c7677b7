//! # Diagnostic SVG Charts
//!
//! Hand-built SVG for the training diagnostics: per-epoch line charts and
//! per-label score histograms. No plotting backend is involved.

use crate::errors::Result;
use std::fmt::Write as _;
use std::path::Path;

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 140.0;
const MARGIN_BOTTOM: f64 = 70.0;
const MARGIN_LEFT: f64 = 80.0;

const PANEL_WIDTH: f64 = 380.0;
const PANEL_HEIGHT: f64 = 260.0;
const PANEL_MARGIN: f64 = 40.0;

/// Train series color.
pub const COLOR_PRIMARY: &str = "#3498db";
/// Validation series color.
pub const COLOR_SECONDARY: &str = "#e74c3c";
const COLOR_BAR: &str = "#2ecc71";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";
const FONT: &str = "Arial, sans-serif";

/// A named series of `(x, y)` points.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSeries {
    /// Legend entry.
    pub name: String,

    /// Points, in drawing order.
    pub points: Vec<(f64, f64)>,

    /// Stroke color.
    pub color: String,
}

impl DataSeries {
    /// New series.
    pub fn new(
        name: &str,
        points: Vec<(f64, f64)>,
        color: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            points,
            color: color.to_string(),
        }
    }
}

/// Count `values` in `buckets` equal-width bins over `[0, 1]`.
///
/// Values outside the range are clamped into the end bins.
pub fn bucket_counts(
    values: &[f32],
    buckets: usize,
) -> Vec<usize> {
    let mut counts = vec![0; buckets];
    if buckets == 0 {
        return counts;
    }
    for &v in values {
        let idx = (v.clamp(0.0, 1.0) * buckets as f32) as usize;
        counts[idx.min(buckets - 1)] += 1;
    }
    counts
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn open_svg(
    svg: &mut String,
    width: f64,
    height: f64,
    title: &str,
) {
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {width} {height}" width="{width}" height="{height}">"#
    );
    let _ = write!(
        svg,
        r#"<rect width="{width}" height="{height}" fill="white"/>"#
    );
    let _ = write!(
        svg,
        r#"<text x="{}" y="35" text-anchor="middle" font-family="{FONT}" font-size="18" font-weight="bold" fill="{COLOR_TEXT}">{}</text>"#,
        width / 2.0,
        escape_xml(title)
    );
}

/// Render a line chart.
///
/// The y axis spans `y_range` when given, else the data range (padded so a
/// flat series is still visible).
pub fn line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    series: &[DataSeries],
    y_range: Option<(f64, f64)>,
) -> String {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let all = series.iter().flat_map(|s| s.points.iter());
    let (mut x_min, mut x_max) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut d_min, mut d_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for &(x, y) in all {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        d_min = d_min.min(y);
        d_max = d_max.max(y);
    }
    if !x_min.is_finite() {
        (x_min, x_max) = (0.0, 1.0);
        (d_min, d_max) = (0.0, 1.0);
    }
    if x_max <= x_min {
        x_max = x_min + 1.0;
    }
    let (y_min, mut y_max) = y_range.unwrap_or((d_min.min(0.0), d_max));
    if y_max <= y_min {
        y_max = y_min + 1.0;
    }

    let px = |x: f64| MARGIN_LEFT + (x - x_min) / (x_max - x_min) * plot_width;
    let py = |y: f64| MARGIN_TOP + plot_height - (y - y_min) / (y_max - y_min) * plot_height;

    let mut svg = String::new();
    open_svg(&mut svg, CHART_WIDTH, CHART_HEIGHT, title);

    for i in 0..=5 {
        let value = y_min + (i as f64 / 5.0) * (y_max - y_min);
        let y = py(value);
        let _ = write!(
            svg,
            r#"<line x1="{MARGIN_LEFT}" y1="{y}" x2="{}" y2="{y}" stroke="{COLOR_GRID}" stroke-width="1"/>"#,
            MARGIN_LEFT + plot_width
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" font-family="{FONT}" font-size="12" fill="{COLOR_TEXT}">{value:.3}</text>"#,
            MARGIN_LEFT - 10.0,
            y + 4.0
        );
    }

    let bottom = MARGIN_TOP + plot_height;
    let _ = write!(
        svg,
        r#"<line x1="{MARGIN_LEFT}" y1="{bottom}" x2="{}" y2="{bottom}" stroke="{COLOR_AXIS}" stroke-width="2"/>"#,
        MARGIN_LEFT + plot_width
    );
    let _ = write!(
        svg,
        r#"<line x1="{MARGIN_LEFT}" y1="{MARGIN_TOP}" x2="{MARGIN_LEFT}" y2="{bottom}" stroke="{COLOR_AXIS}" stroke-width="2"/>"#
    );
    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="{FONT}" font-size="14" fill="{COLOR_TEXT}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0,
        CHART_HEIGHT - 20.0,
        escape_xml(x_label)
    );
    let mid = CHART_HEIGHT / 2.0;
    let _ = write!(
        svg,
        r#"<text x="20" y="{mid}" text-anchor="middle" font-family="{FONT}" font-size="14" fill="{COLOR_TEXT}" transform="rotate(-90 20 {mid})">{}</text>"#,
        escape_xml(y_label)
    );

    for s in series.iter().filter(|s| !s.points.is_empty()) {
        let path: Vec<String> = s
            .points
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| {
                let cmd = if i == 0 { "M" } else { "L" };
                format!("{cmd} {:.2} {:.2}", px(x), py(y))
            })
            .collect();
        let _ = write!(
            svg,
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="3"/>"#,
            path.join(" "),
            s.color
        );
        for &(x, y) in &s.points {
            let _ = write!(
                svg,
                r#"<circle cx="{:.2}" cy="{:.2}" r="4" fill="{}" stroke="white" stroke-width="2"/>"#,
                px(x),
                py(y),
                s.color
            );
        }
    }

    if let Some(first) = series.first() {
        for &(x, _) in &first.points {
            let _ = write!(
                svg,
                r#"<text x="{:.2}" y="{}" text-anchor="middle" font-family="{FONT}" font-size="11" fill="{COLOR_TEXT}">{x:.0}</text>"#,
                px(x),
                bottom + 20.0
            );
        }
    }

    let legend_x = CHART_WIDTH - MARGIN_RIGHT + 20.0;
    for (i, s) in series.iter().enumerate() {
        let y = MARGIN_TOP + 10.0 + 25.0 * i as f64;
        let _ = write!(
            svg,
            r#"<rect x="{legend_x}" y="{y}" width="15" height="15" fill="{}"/>"#,
            s.color
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" font-family="{FONT}" font-size="12" fill="{COLOR_TEXT}">{}</text>"#,
            legend_x + 20.0,
            y + 12.0,
            escape_xml(&s.name)
        );
    }

    svg.push_str("</svg>");
    svg
}

/// Render one histogram panel per `(label, counts)` pair, two per row.
pub fn histogram_panels(
    title: &str,
    panels: &[(String, Vec<usize>)],
) -> String {
    let columns = 2;
    let rows = panels.len().div_ceil(columns).max(1);
    let width = columns as f64 * (PANEL_WIDTH + PANEL_MARGIN) + PANEL_MARGIN;
    let height = MARGIN_TOP + rows as f64 * (PANEL_HEIGHT + PANEL_MARGIN);

    let mut svg = String::new();
    open_svg(&mut svg, width, height, title);

    for (idx, (label, counts)) in panels.iter().enumerate() {
        let left = PANEL_MARGIN + (idx % columns) as f64 * (PANEL_WIDTH + PANEL_MARGIN);
        let top = MARGIN_TOP + (idx / columns) as f64 * (PANEL_HEIGHT + PANEL_MARGIN);
        let bottom = top + PANEL_HEIGHT - 20.0;
        let plot_height = PANEL_HEIGHT - 40.0;

        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="{FONT}" font-size="14" font-weight="bold" fill="{COLOR_TEXT}">{}</text>"#,
            left + PANEL_WIDTH / 2.0,
            top + 12.0,
            escape_xml(label)
        );
        let _ = write!(
            svg,
            r#"<line x1="{left}" y1="{bottom}" x2="{}" y2="{bottom}" stroke="{COLOR_AXIS}" stroke-width="1"/>"#,
            left + PANEL_WIDTH
        );

        let peak = counts.iter().copied().max().unwrap_or(0).max(1) as f64;
        let bar_width = PANEL_WIDTH / counts.len().max(1) as f64;
        for (b, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let h = count as f64 / peak * plot_height;
            let _ = write!(
                svg,
                r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{h:.2}" fill="{COLOR_BAR}"/>"#,
                left + b as f64 * bar_width,
                bottom - h,
                (bar_width - 1.0).max(0.5)
            );
        }

        for (tick, text) in [(0.0, "0.0"), (0.5, "0.5"), (1.0, "1.0")] {
            let _ = write!(
                svg,
                r#"<text x="{:.2}" y="{}" text-anchor="middle" font-family="{FONT}" font-size="11" fill="{COLOR_TEXT}">{text}</text>"#,
                left + tick * PANEL_WIDTH,
                bottom + 15.0
            );
        }
    }

    svg.push_str("</svg>");
    svg
}

/// Write an SVG document, creating the parent directory.
pub fn write_svg<P: AsRef<Path>>(
    path: P,
    svg: &str,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, svg)?;
    tracing::info!(path = %path.display(), "wrote chart");
    Ok(())
}
