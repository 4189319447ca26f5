use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgb, RgbImage};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::Row;
use crate::error::RenderError;

pub const DEMO_YEARS: i32 = 5;
pub const DEMO_MIN: i64 = 100;
pub const DEMO_MAX: i64 = 1000;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([60, 60, 60]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const SERIES: Rgb<u8> = Rgb([31, 119, 180]);
const MARGIN: u32 = 40;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    #[default]
    Bar,
    Line,
}

impl ChartKind {
    /// Line chart when the instruction has the word "line", bar chart otherwise.
    pub fn from_instruction(instruction: &str) -> Self {
        let wants_line = instruction
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word.eq_ignore_ascii_case("line"));

        if wants_line {
            ChartKind::Line
        } else {
            ChartKind::Bar
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
        }
    }
}

/// Labelled values, plotted left to right.
pub type Series = Vec<(String, f64)>;

/// Synthetic yearly values for the five years ending at `end_year`.
pub fn demo_series<R: Rng>(end_year: i32, rng: &mut R) -> Series {
    (end_year - DEMO_YEARS + 1..=end_year)
        .map(|year| (year.to_string(), rng.gen_range(DEMO_MIN..=DEMO_MAX) as f64))
        .collect()
}

/// Build a series from query rows.
///
/// Labels come from the first column holding text, or from the first column
/// when no column holds text. Values come from the first remaining column
/// holding numbers, falling back to one holding numeric strings. A single
/// column is labelled by row position. Rows without a usable value are skipped.
pub fn series_from_rows(rows: &[Row]) -> Result<Series, RenderError> {
    let first = rows.first().ok_or(RenderError::EmptySeries)?;
    let columns: Vec<&String> = first.keys().collect();
    let any_row = |column: &String, test: fn(&Value) -> bool| {
        rows.iter().any(|row| row.get(column).is_some_and(test))
    };

    let label_column = columns
        .iter()
        .copied()
        .find(|column| any_row(column, Value::is_string))
        .or_else(|| (columns.len() > 1).then(|| columns[0]));

    let candidates: Vec<&String> = columns
        .iter()
        .copied()
        .filter(|column| Some(*column) != label_column)
        .collect();
    let value_column = candidates
        .iter()
        .copied()
        .find(|column| any_row(column, Value::is_number))
        .or_else(|| {
            candidates
                .iter()
                .copied()
                .find(|column| any_row(column, |v| numeric(v).is_some()))
        })
        .ok_or(RenderError::NoNumericColumn)?;

    let series: Series = rows
        .iter()
        .enumerate()
        .filter_map(|(idx, row)| {
            let value = row.get(value_column).and_then(numeric)?;
            let label = match label_column.and_then(|column| row.get(column)) {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Null) | None => (idx + 1).to_string(),
                Some(other) => other.to_string(),
            };
            Some((label, value))
        })
        .collect();

    if series.is_empty() {
        return Err(RenderError::EmptySeries);
    }
    Ok(series)
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

pub trait ChartRenderer: Send + Sync {
    /// Render the series and return PNG bytes.
    fn render(&self, kind: ChartKind, series: &[(String, f64)]) -> Result<Vec<u8>, RenderError>;
}

pub struct PngChartRenderer {
    width: u32,
    height: u32,
}

impl Default for PngChartRenderer {
    fn default() -> Self {
        Self::new(640, 400)
    }
}

impl PngChartRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(MARGIN * 3),
            height: height.max(MARGIN * 3),
        }
    }

    fn draw(&self, kind: ChartKind, series: &[(String, f64)]) -> RgbImage {
        let mut img = RgbImage::from_pixel(self.width, self.height, BACKGROUND);

        let left = MARGIN;
        let right = self.width - MARGIN / 2;
        let top = MARGIN / 2;
        let bottom = self.height - MARGIN;
        let plot_height = (bottom - top) as f64;

        // Values are plotted from a zero baseline
        let max_value = series
            .iter()
            .map(|(_, v)| *v)
            .fold(0.0_f64, f64::max)
            .max(1.0);

        for step in 1..=4 {
            let y = bottom - (plot_height * step as f64 / 4.0) as u32;
            draw_line(&mut img, (left, y), (right, y), GRID);
        }

        let slot = ((right - left) / series.len() as u32).max(1);
        let y_for = |value: f64| -> u32 {
            let scaled = (value.max(0.0) / max_value * plot_height) as u32;
            bottom - scaled.min(bottom - top)
        };

        match kind {
            ChartKind::Bar => {
                let bar_width = (slot * 3 / 5).max(1);
                for (idx, (_, value)) in series.iter().enumerate() {
                    let x0 = left + slot * idx as u32 + (slot - bar_width) / 2;
                    fill_rect(&mut img, x0, y_for(*value), bar_width, bottom, SERIES);
                }
            }
            ChartKind::Line => {
                let points: Vec<(u32, u32)> = series
                    .iter()
                    .enumerate()
                    .map(|(idx, (_, value))| (left + slot * idx as u32 + slot / 2, y_for(*value)))
                    .collect();
                for pair in points.windows(2) {
                    draw_line(&mut img, pair[0], pair[1], SERIES);
                }
                for &(x, y) in &points {
                    fill_rect(&mut img, x.saturating_sub(2), y.saturating_sub(2), 5, y + 3, SERIES);
                }
            }
        }

        // Axes and one tick per label
        draw_line(&mut img, (left, top), (left, bottom), AXIS);
        draw_line(&mut img, (left, bottom), (right, bottom), AXIS);
        for idx in 0..series.len() as u32 {
            let x = left + slot * idx + slot / 2;
            draw_line(&mut img, (x, bottom), (x, bottom + 4), AXIS);
        }

        img
    }
}

impl ChartRenderer for PngChartRenderer {
    fn render(&self, kind: ChartKind, series: &[(String, f64)]) -> Result<Vec<u8>, RenderError> {
        if series.is_empty() {
            return Err(RenderError::EmptySeries);
        }
        if let Some((label, _)) = series.iter().find(|(_, v)| !v.is_finite()) {
            return Err(RenderError::InvalidValue(label.clone()));
        }

        let img = self.draw(kind, series);

        let mut png = Vec::new();
        PngEncoder::new(&mut png).write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            ColorType::Rgb8,
        )?;

        tracing::debug!(
            "Rendered {} chart: {} points, {} bytes",
            kind.as_str(),
            series.len(),
            png.len()
        );
        Ok(png)
    }
}

fn fill_rect(img: &mut RgbImage, x0: u32, y0: u32, width: u32, y1: u32, color: Rgb<u8>) {
    let x1 = (x0 + width).min(img.width());
    let y1 = y1.min(img.height());
    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x, y, color);
        }
    }
}

fn draw_line(img: &mut RgbImage, from: (u32, u32), to: (u32, u32), color: Rgb<u8>) {
    let (mut x, mut y) = (from.0 as i64, from.1 as i64);
    let (x1, y1) = (to.0 as i64, to.1 as i64);
    let dx = (x1 - x).abs();
    let dy = -(y1 - y).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
            img.put_pixel(x as u32, y as u32, color);
        }
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}
