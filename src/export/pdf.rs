//! PDF serializer (lopdf).
//!
//! Layout: title, optional metadata block, optional description, the data
//! table (first 50 rows, equal column widths, header repeated on each page),
//! grand totals, then the chart section. Every page gets a "Página i de n"
//! footer and the optional diagonal watermark.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, StringFormat};

use super::{
    metadata_entries, page_dimensions, report_title, ExportFormat, ExportOptions, ExportSerializer,
    Rendered, TableStyle,
};
use crate::cell::Cell;
use crate::chart::{self, ChartError, ChartSeries};
use crate::error::SerializationError;
use crate::model::{ChartConfig, ChartType, ReportData, ReportDefinition};

/// Table rows rendered per document.
pub const MAX_TABLE_ROWS: usize = 50;

const MARGIN: f64 = 40.0;
const FOOTER_SPACE: f64 = 24.0;
const ROW_HEIGHT: f64 = 16.0;
const BODY_SIZE: f64 = 9.0;
/// Average Helvetica glyph width as a fraction of the font size.
const GLYPH_WIDTH: f64 = 0.52;

type Rgb = (f64, f64, f64);

const HEADER_FILL: Rgb = (0.20, 0.29, 0.43);
const STRIPE_FILL: Rgb = (0.95, 0.96, 0.97);
const RULE_GRAY: Rgb = (0.75, 0.75, 0.75);
const TEXT_GRAY: Rgb = (0.35, 0.35, 0.35);
const PALETTE: [Rgb; 8] = [
    (0.23, 0.51, 0.96),
    (0.06, 0.73, 0.51),
    (0.96, 0.62, 0.04),
    (0.94, 0.27, 0.27),
    (0.55, 0.36, 0.96),
    (0.93, 0.29, 0.60),
    (0.08, 0.72, 0.65),
    (0.98, 0.45, 0.09),
];

pub struct PdfSerializer;

impl ExportSerializer for PdfSerializer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Pdf
    }

    fn serialize(
        &self,
        data: &ReportData,
        definition: &ReportDefinition,
        options: &ExportOptions,
    ) -> Result<Rendered, SerializationError> {
        let (width, height) = page_dimensions(options.page_size, options.orientation);
        let mut layout = Layout::new(width, height);
        let title = report_title(definition, options);

        layout.paragraph(&title, 18.0, Font::Bold, (0.0, 0.0, 0.0));
        layout.gap(6.0);

        if options.include_metadata {
            draw_metadata(&mut layout, data, definition, options);
        }

        if options.include_description && !definition.description.trim().is_empty() {
            layout.paragraph(&definition.description, 10.0, Font::Regular, TEXT_GRAY);
            layout.gap(8.0);
        }

        draw_table(&mut layout, data, options.table_style);
        draw_totals(&mut layout, data);

        let mut warnings = Vec::new();
        if options.include_charts && !definition.charts.is_empty() {
            warnings = draw_charts(&mut layout, data, &definition.charts);
        }

        let pages = layout.finish(options.watermark.as_deref());
        let bytes = build_document(pages, width, height, &title, data)?;
        Ok(Rendered { bytes, warnings })
    }
}

// ============================================================================
// Page layout
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }
}

fn real(v: f64) -> Object {
    Object::Real(v as _)
}

/// Latin-1 bytes for a WinAnsi-encoded Helvetica string.
fn encode_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            _ if c.is_control() => b' ',
            code @ (0x20..=0x7E | 0xA0..=0xFF) => code as u8,
            _ => b'?',
        })
        .collect()
}

fn text_width(text: &str, size: f64) -> f64 {
    text.chars().count() as f64 * size * GLYPH_WIDTH
}

/// Shorten `text` with "..." so it fits `width`.
fn fit_text(text: &str, width: f64, size: f64) -> String {
    let max = (width / (size * GLYPH_WIDTH)).floor().max(0.0) as usize;
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max <= 3 {
        return text.chars().take(max).collect();
    }
    let mut out: String = text.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

fn wrap_text(text: &str, width: f64, size: f64) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() { word.to_string() } else { format!("{} {}", line, word) };
            if text_width(&candidate, size) > width && !line.is_empty() {
                lines.push(std::mem::take(&mut line));
                line = word.to_string();
            } else {
                line = candidate;
            }
        }
        lines.push(line);
    }
    lines
}

fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{:.2}", v)
    }
}

/// Accumulates drawing operations page by page, top to bottom.
struct Layout {
    width: f64,
    height: f64,
    pages: Vec<Vec<Operation>>,
    ops: Vec<Operation>,
    y: f64,
}

impl Layout {
    fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            pages: Vec::new(),
            ops: Vec::new(),
            y: height - MARGIN,
        }
    }

    fn left(&self) -> f64 {
        MARGIN
    }

    fn content_width(&self) -> f64 {
        self.width - 2.0 * MARGIN
    }

    fn bottom(&self) -> f64 {
        MARGIN + FOOTER_SPACE
    }

    fn new_page(&mut self) {
        self.pages.push(std::mem::take(&mut self.ops));
        self.y = self.height - MARGIN;
    }

    /// Start a new page when `needed` points do not fit. Returns true on a break.
    fn ensure(&mut self, needed: f64) -> bool {
        if self.y - needed < self.bottom() {
            self.new_page();
            true
        } else {
            false
        }
    }

    fn gap(&mut self, h: f64) {
        self.y -= h;
    }

    fn text(&mut self, x: f64, y: f64, size: f64, font: Font, color: Rgb, text: &str) {
        self.ops.extend([
            Operation::new("BT", vec![]),
            Operation::new("rg", vec![real(color.0), real(color.1), real(color.2)]),
            Operation::new("Tf", vec![font.resource().into(), real(size)]),
            Operation::new("Td", vec![real(x), real(y)]),
            Operation::new("Tj", vec![Object::String(encode_text(text), StringFormat::Literal)]),
            Operation::new("ET", vec![]),
        ]);
    }

    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Rgb) {
        self.ops.extend([
            Operation::new("rg", vec![real(color.0), real(color.1), real(color.2)]),
            Operation::new("re", vec![real(x), real(y), real(w), real(h)]),
            Operation::new("f", vec![]),
        ]);
    }

    fn stroke_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Rgb) {
        self.ops.extend([
            Operation::new("RG", vec![real(color.0), real(color.1), real(color.2)]),
            Operation::new("w", vec![real(0.5)]),
            Operation::new("re", vec![real(x), real(y), real(w), real(h)]),
            Operation::new("S", vec![]),
        ]);
    }

    fn line(&mut self, from: (f64, f64), to: (f64, f64), color: Rgb, width: f64) {
        self.polyline(&[from, to], color, width);
    }

    fn polyline(&mut self, points: &[(f64, f64)], color: Rgb, width: f64) {
        let Some((first, rest)) = points.split_first() else {
            return;
        };
        self.ops.extend([
            Operation::new("RG", vec![real(color.0), real(color.1), real(color.2)]),
            Operation::new("w", vec![real(width)]),
            Operation::new("m", vec![real(first.0), real(first.1)]),
        ]);
        for p in rest {
            self.ops.push(Operation::new("l", vec![real(p.0), real(p.1)]));
        }
        self.ops.push(Operation::new("S", vec![]));
    }

    fn fill_polygon(&mut self, points: &[(f64, f64)], color: Rgb) {
        let Some((first, rest)) = points.split_first() else {
            return;
        };
        self.ops.extend([
            Operation::new("rg", vec![real(color.0), real(color.1), real(color.2)]),
            Operation::new("m", vec![real(first.0), real(first.1)]),
        ]);
        for p in rest {
            self.ops.push(Operation::new("l", vec![real(p.0), real(p.1)]));
        }
        self.ops.extend([Operation::new("h", vec![]), Operation::new("f", vec![])]);
    }

    /// Wrapped text block at the current position.
    fn paragraph(&mut self, text: &str, size: f64, font: Font, color: Rgb) {
        let leading = size * 1.3;
        for line in wrap_text(text, self.content_width(), size) {
            self.ensure(leading);
            self.y -= leading;
            let x = self.left();
            let y = self.y;
            self.text(x, y, size, font, color, &line);
        }
    }

    /// Close the last page, then add footers and watermark to every page.
    fn finish(mut self, watermark: Option<&str>) -> Vec<Vec<Operation>> {
        self.pages.push(std::mem::take(&mut self.ops));
        let total = self.pages.len();
        let (width, height) = (self.width, self.height);

        self.pages
            .into_iter()
            .enumerate()
            .map(|(i, body)| {
                let mut page = Layout::new(width, height);
                if let Some(mark) = watermark.filter(|m| !m.trim().is_empty()) {
                    page.watermark(mark);
                }
                page.ops.extend(body);
                let footer = format!("Página {} de {}", i + 1, total);
                let x = (width - text_width(&footer, 8.0)) / 2.0;
                page.text(x, MARGIN / 2.0, 8.0, Font::Regular, TEXT_GRAY, &footer);
                page.ops
            })
            .collect()
    }

    fn watermark(&mut self, mark: &str) {
        let size = 60.0;
        let (cos, sin) = (std::f64::consts::FRAC_1_SQRT_2, std::f64::consts::FRAC_1_SQRT_2);
        let half = text_width(mark, size) / 2.0;
        let x = self.width / 2.0 - half * cos;
        let y = self.height / 2.0 - half * sin;
        self.ops.extend([
            Operation::new("q", vec![]),
            Operation::new("BT", vec![]),
            Operation::new("rg", vec![real(0.9), real(0.9), real(0.9)]),
            Operation::new("Tf", vec![Font::Bold.resource().into(), real(size)]),
            Operation::new("Tm", vec![real(cos), real(sin), real(-sin), real(cos), real(x), real(y)]),
            Operation::new("Tj", vec![Object::String(encode_text(mark), StringFormat::Literal)]),
            Operation::new("ET", vec![]),
            Operation::new("Q", vec![]),
        ]);
    }
}

// ============================================================================
// Sections
// ============================================================================

fn section_heading(layout: &mut Layout, text: &str) {
    layout.ensure(28.0);
    layout.gap(18.0);
    let x = layout.left();
    let y = layout.y;
    layout.text(x, y, 12.0, Font::Bold, (0.0, 0.0, 0.0), text);
    layout.gap(6.0);
}

fn note(layout: &mut Layout, text: &str) {
    layout.paragraph(text, BODY_SIZE, Font::Regular, TEXT_GRAY);
}

fn draw_metadata(layout: &mut Layout, data: &ReportData, definition: &ReportDefinition, options: &ExportOptions) {
    section_heading(layout, "Información");
    for (key, value) in metadata_entries(data, definition, options) {
        // Title and description have their own place in the document.
        if matches!(key, "Título" | "Descripción") || value.is_empty() {
            continue;
        }
        layout.ensure(13.0);
        layout.gap(13.0);
        let (x, y) = (layout.left(), layout.y);
        layout.text(x, y, BODY_SIZE, Font::Bold, (0.0, 0.0, 0.0), &format!("{}:", key));
        layout.text(x + 110.0, y, BODY_SIZE, Font::Regular, (0.0, 0.0, 0.0), &value);
    }
    layout.gap(10.0);
}

fn draw_header_row(layout: &mut Layout, headers: &[String], col_width: f64, style: TableStyle) {
    let (left, top) = (layout.left(), layout.y);
    let bottom = top - ROW_HEIGHT;
    let text_color = match style {
        TableStyle::Minimal => (0.0, 0.0, 0.0),
        _ => (1.0, 1.0, 1.0),
    };

    match style {
        TableStyle::Minimal => {
            let width = layout.content_width();
            layout.line((left, bottom), (left + width, bottom), (0.0, 0.0, 0.0), 1.0);
        }
        _ => {
            let width = layout.content_width();
            layout.fill_rect(left, bottom, width, ROW_HEIGHT, HEADER_FILL);
        }
    }
    for (i, header) in headers.iter().enumerate() {
        let x = left + i as f64 * col_width;
        let label = fit_text(header, col_width - 6.0, BODY_SIZE);
        layout.text(x + 3.0, bottom + 5.0, BODY_SIZE, Font::Bold, text_color, &label);
    }
    layout.y = bottom;
}

fn draw_table(layout: &mut Layout, data: &ReportData, style: TableStyle) {
    section_heading(layout, "Datos");

    if data.headers.is_empty() {
        note(layout, "El reporte no tiene columnas.");
        return;
    }
    if data.rows.is_empty() {
        note(layout, "Sin resultados para los filtros aplicados.");
        return;
    }

    let col_width = layout.content_width() / data.headers.len() as f64;
    layout.ensure(ROW_HEIGHT * 2.0);
    draw_header_row(layout, &data.headers, col_width, style);

    for (i, row) in data.rows.iter().take(MAX_TABLE_ROWS).enumerate() {
        if layout.ensure(ROW_HEIGHT) {
            draw_header_row(layout, &data.headers, col_width, style);
        }
        let (left, bottom) = (layout.left(), layout.y - ROW_HEIGHT);

        match style {
            TableStyle::Striped if i % 2 == 1 => {
                let width = layout.content_width();
                layout.fill_rect(left, bottom, width, ROW_HEIGHT, STRIPE_FILL);
            }
            TableStyle::Bordered => {
                for col in 0..data.headers.len() {
                    layout.stroke_rect(left + col as f64 * col_width, bottom, col_width, ROW_HEIGHT, RULE_GRAY);
                }
            }
            _ => {}
        }

        for (col, cell) in row.iter().enumerate().take(data.headers.len()) {
            let text = fit_text(&cell.display(), col_width - 6.0, BODY_SIZE);
            if text.is_empty() {
                continue;
            }
            let x = left + col as f64 * col_width + 3.0;
            layout.text(x, bottom + 5.0, BODY_SIZE, Font::Regular, (0.0, 0.0, 0.0), &text);
        }
        layout.y = bottom;
    }

    if data.rows.len() > MAX_TABLE_ROWS {
        layout.gap(4.0);
        note(
            layout,
            &format!("Mostrando las primeras {} filas de {}", MAX_TABLE_ROWS, data.rows.len()),
        );
    }
}

fn draw_totals(layout: &mut Layout, data: &ReportData) {
    if data.aggregates.is_empty() {
        return;
    }
    section_heading(layout, "Totales");
    for aggregate in &data.aggregates {
        let value = match &aggregate.value {
            Cell::Num(n) => format_value(*n),
            other => other.display(),
        };
        note(layout, &format!("{}: {}", aggregate.label, value));
    }
}

// ============================================================================
// Charts
// ============================================================================

fn draw_charts(layout: &mut Layout, data: &ReportData, charts: &[ChartConfig]) -> Vec<SerializationError> {
    let mut warnings = Vec::new();
    section_heading(layout, "Gráficos");

    for config in charts {
        match chart::project(data, config) {
            Ok(series) => draw_chart(layout, &series, config),
            Err(ChartError::UnsupportedType(kind)) => {
                note(layout, &format!("{}: tipo de gráfico no soportado ({})", config.title, kind));
                warnings.push(SerializationError::UnsupportedChart {
                    title: config.title.clone(),
                    chart_type: kind,
                });
            }
            Err(err) => {
                note(layout, &format!("{}: no se pudo generar el gráfico", config.title));
                warnings.push(SerializationError::ChartProjection {
                    title: config.title.clone(),
                    reason: err.to_string(),
                });
            }
        }
        layout.gap(8.0);
    }
    warnings
}

fn draw_chart(layout: &mut Layout, series: &ChartSeries, config: &ChartConfig) {
    if config.chart_type == ChartType::Pie {
        draw_pie_legend(layout, series);
        return;
    }

    let plot_height = (f64::from(config.height) * 0.6).clamp(120.0, 260.0);
    layout.ensure(plot_height + 70.0);

    layout.gap(14.0);
    let (x, y) = (layout.left(), layout.y);
    layout.text(x, y, 10.0, Font::Bold, (0.0, 0.0, 0.0), &series.title);
    layout.gap(10.0);

    let left = layout.left() + 40.0;
    let plot_width = layout.content_width() - 40.0;
    let top = layout.y;
    let bottom = top - plot_height;

    let values: Vec<Vec<Option<f64>>> = series.y_keys.iter().map(|k| series.series_values(k)).collect();
    let flat = values.iter().flatten().flatten().copied();
    // The value axis always includes zero.
    let (min, mut max) = flat.fold((0.0_f64, 0.0_f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if (max - min).abs() < f64::EPSILON {
        max = min + 1.0;
    }
    let sy = |v: f64| bottom + (v - min) / (max - min) * plot_height;

    if config.show_grid {
        for step in 0..=4u32 {
            let v = min + (max - min) * f64::from(step) / 4.0;
            let gy = sy(v);
            layout.line((left, gy), (left + plot_width, gy), (0.9, 0.9, 0.9), 0.5);
            layout.text(layout.left(), gy - 3.0, 7.0, Font::Regular, TEXT_GRAY, &format_value(v));
        }
    } else {
        layout.text(layout.left(), bottom - 3.0, 7.0, Font::Regular, TEXT_GRAY, &format_value(min));
        layout.text(layout.left(), top - 3.0, 7.0, Font::Regular, TEXT_GRAY, &format_value(max));
    }
    layout.line((left, bottom), (left, top), RULE_GRAY, 0.8);
    layout.line((left, sy(0.0)), (left + plot_width, sy(0.0)), RULE_GRAY, 0.8);

    let n = series.records.len();
    if n == 0 {
        layout.text(left + 10.0, bottom + plot_height / 2.0, BODY_SIZE, Font::Regular, TEXT_GRAY, "Sin datos");
    } else {
        let slot = plot_width / n as f64;
        let center = move |i: usize| left + slot * (i as f64 + 0.5);

        match config.chart_type {
            ChartType::Bar => {
                let group = slot * 0.8;
                let bar = group / values.len().max(1) as f64;
                for (s, column) in values.iter().enumerate() {
                    for (i, v) in column.iter().enumerate() {
                        let Some(v) = v else { continue };
                        let x = left + slot * i as f64 + slot * 0.1 + bar * s as f64;
                        let (y0, y1) = (sy(0.0), sy(*v));
                        layout.fill_rect(x, y0.min(y1), bar, (y1 - y0).abs(), PALETTE[s % PALETTE.len()]);
                    }
                }
            }
            ChartType::Line | ChartType::Area => {
                for (s, column) in values.iter().enumerate() {
                    let color = PALETTE[s % PALETTE.len()];
                    if config.chart_type == ChartType::Area {
                        let mut polygon = vec![(center(0), sy(0.0))];
                        polygon.extend(column.iter().enumerate().map(|(i, v)| (center(i), sy(v.unwrap_or(0.0)))));
                        polygon.push((center(n - 1), sy(0.0)));
                        let light = (0.6 + color.0 * 0.4, 0.6 + color.1 * 0.4, 0.6 + color.2 * 0.4);
                        layout.fill_polygon(&polygon, light);
                    }
                    // Missing values break the line.
                    let mut run = Vec::new();
                    for (i, v) in column.iter().enumerate() {
                        match v {
                            Some(v) => run.push((center(i), sy(*v))),
                            None => layout.polyline(&std::mem::take(&mut run), color, 1.5),
                        }
                    }
                    layout.polyline(&run, color, 1.5);
                }
            }
            ChartType::Scatter => {
                let xs: Option<Vec<f64>> = series
                    .categories()
                    .iter()
                    .map(|c| c.trim().parse::<f64>().ok())
                    .collect();
                let position: Box<dyn Fn(usize) -> f64> = match xs {
                    Some(xs) if !xs.is_empty() => {
                        let lo = xs.iter().copied().fold(f64::INFINITY, f64::min);
                        let hi = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                        let span = if hi > lo { hi - lo } else { 1.0 };
                        Box::new(move |i| left + 4.0 + (xs[i] - lo) / span * (plot_width - 8.0))
                    }
                    _ => Box::new(center),
                };
                for (s, column) in values.iter().enumerate() {
                    for (i, v) in column.iter().enumerate() {
                        if let Some(v) = v {
                            layout.fill_rect(position(i) - 2.0, sy(*v) - 2.0, 4.0, 4.0, PALETTE[s % PALETTE.len()]);
                        }
                    }
                }
            }
            ChartType::Pie | ChartType::Other(_) => {}
        }

        let max_labels = (plot_width / 48.0).floor().max(1.0) as usize;
        let step = n.div_ceil(max_labels);
        for (i, category) in series.categories().iter().enumerate().step_by(step) {
            let label = fit_text(category, slot * step as f64 - 2.0, 7.0);
            let x = center(i) - text_width(&label, 7.0) / 2.0;
            layout.text(x, bottom - 10.0, 7.0, Font::Regular, TEXT_GRAY, &label);
        }
    }

    layout.y = bottom - 16.0;
    if config.show_legend {
        draw_series_legend(layout, &series.y_keys);
    }
}

fn draw_series_legend(layout: &mut Layout, names: &[String]) {
    layout.gap(12.0);
    let mut x = layout.left() + 40.0;
    let y = layout.y;
    for (s, name) in names.iter().enumerate() {
        layout.fill_rect(x, y - 1.0, 8.0, 8.0, PALETTE[s % PALETTE.len()]);
        layout.text(x + 11.0, y, 8.0, Font::Regular, (0.0, 0.0, 0.0), name);
        x += 24.0 + text_width(name, 8.0);
    }
}

/// Pie charts are rendered as a legend with each slice's share.
fn draw_pie_legend(layout: &mut Layout, series: &ChartSeries) {
    layout.ensure(40.0);
    layout.gap(14.0);
    let (x, y) = (layout.left(), layout.y);
    layout.text(x, y, 10.0, Font::Bold, (0.0, 0.0, 0.0), &series.title);
    layout.gap(4.0);

    let Some(key) = series.y_keys.first() else {
        return;
    };
    let values = series.series_values(key);
    let total: f64 = values.iter().flatten().filter(|v| **v > 0.0).sum();

    for (i, (name, value)) in series.categories().iter().zip(&values).enumerate() {
        let v = value.unwrap_or(0.0);
        let share = if total > 0.0 { v.max(0.0) / total * 100.0 } else { 0.0 };
        layout.ensure(13.0);
        layout.gap(13.0);
        let (x, y) = (layout.left(), layout.y);
        layout.fill_rect(x, y - 1.0, 8.0, 8.0, PALETTE[i % PALETTE.len()]);
        let label = format!("{}: {} ({:.1}%)", name, format_value(v), share);
        layout.text(x + 12.0, y, BODY_SIZE, Font::Regular, (0.0, 0.0, 0.0), &label);
    }

    if let Some(t) = &series.truncation {
        layout.gap(4.0);
        note(layout, &format!("Mostrando {} de {} categorías", t.shown, t.total));
    }
}

// ============================================================================
// Document assembly
// ============================================================================

fn build_document(
    pages: Vec<Vec<Operation>>,
    width: f64,
    height: f64,
    title: &str,
    data: &ReportData,
) -> Result<Vec<u8>, SerializationError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
        },
    });

    let page_count = pages.len();
    let mut kids: Vec<Object> = Vec::with_capacity(page_count);
    for operations in pages {
        let content = Content { operations };
        let content_id = doc.add_object(lopdf::Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => Object::Integer(page_count as i64),
        "Resources" => resources_id,
        "MediaBox" => vec![Object::Integer(0), Object::Integer(0), real(width), real(height)],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::String(encode_text(title), StringFormat::Literal),
        "Producer" => Object::string_literal("report-engine"),
        "CreationDate" => Object::string_literal(
            data.metadata.generated_at.format("D:%Y%m%d%H%M%SZ").to_string(),
        ),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| SerializationError::Pdf(e.to_string()))?;
    Ok(bytes)
}
