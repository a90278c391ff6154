//! PNG renderings of a batch run.

use std::fmt::Display;
use std::path::Path;

use image::RgbImage;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};

use crate::error::{Error, Result};
use crate::label::Label;
use crate::metrics::{ConfusionMatrix, RocCurve};

/// Cells in the sample prediction grid.
pub const GRID_ROWS: usize = 2;
pub const GRID_COLS: usize = 4;

const FONT: &str = "sans-serif";

// ends of the "Blues" ramp
const LIGHT_BLUE: (f64, f64, f64) = (247.0, 251.0, 255.0);
const DARK_BLUE: (f64, f64, f64) = (8.0, 48.0, 107.0);

fn plot_err<E: Display>(err: E) -> Error {
    Error::Plot(err.to_string())
}

fn blues(strength: f64) -> RGBColor {
    let s = strength.max(0.0).min(1.0);
    let mix = |a: f64, b: f64| (a + (b - a) * s).round() as u8;
    RGBColor(
        mix(LIGHT_BLUE.0, DARK_BLUE.0),
        mix(LIGHT_BLUE.1, DARK_BLUE.1),
        mix(LIGHT_BLUE.2, DARK_BLUE.2),
    )
}

fn centered(size: u32, color: &RGBColor) -> TextStyle<'static> {
    (FONT, size)
        .into_font()
        .color(color)
        .pos(Pos::new(HPos::Center, VPos::Center))
}

/// Annotated heatmap, true labels on the vertical axis (top row first).
pub fn render_confusion_matrix(path: &Path, cm: &ConfusionMatrix) -> Result<()> {
    let root = BitMapBackend::new(path, (600, 500)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption("Confusion Matrix", (FONT, 24))
        .set_label_area_size(LabelAreaPosition::Left, 120)
        .set_label_area_size(LabelAreaPosition::Bottom, 60)
        .build_cartesian_2d(0f64..2f64, 0f64..2f64)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(0)
        .y_labels(0)
        .x_desc("Predicted")
        .y_desc("True")
        .draw()
        .map_err(plot_err)?;

    let max = cm.max().max(1) as f64;
    for &truth in &Label::ALL {
        for &predicted in &Label::ALL {
            let count = cm.count(truth, predicted);
            let x = predicted.index() as f64;
            let y = (1 - truth.index()) as f64;
            let strength = count as f64 / max;

            chart
                .draw_series(std::iter::once(Rectangle::new(
                    [(x, y), (x + 1.0, y + 1.0)],
                    blues(strength).filled(),
                )))
                .map_err(plot_err)?;

            let ink = if strength > 0.5 { WHITE } else { BLACK };
            chart
                .draw_series(std::iter::once(Text::new(
                    count.to_string(),
                    (x + 0.5, y + 0.5),
                    centered(28, &ink),
                )))
                .map_err(plot_err)?;
        }
    }

    // class names as tick labels
    let tick = (FONT, 15).into_font().color(&BLACK);
    for &label in &Label::ALL {
        let (px, py) = chart.backend_coord(&(label.index() as f64 + 0.5, 0.0));
        root.draw(&Text::new(
            label.name(),
            (px, py + 8),
            tick.pos(Pos::new(HPos::Center, VPos::Top)),
        ))
        .map_err(plot_err)?;

        let row = (1 - label.index()) as f64 + 0.5;
        let (px, py) = chart.backend_coord(&(0.0, row));
        root.draw(&Text::new(
            label.name(),
            (px - 8, py),
            tick.pos(Pos::new(HPos::Right, VPos::Center)),
        ))
        .map_err(plot_err)?;
    }

    root.present().map_err(plot_err)?;
    Ok(())
}

/// ROC curve against the chance diagonal, AUC in the legend.
pub fn render_roc_curve(path: &Path, roc: &RocCurve) -> Result<()> {
    let root = BitMapBackend::new(path, (700, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption("Receiver Operating Characteristic (ROC)", (FONT, 22))
        .x_label_area_size(45)
        .y_label_area_size(55)
        .build_cartesian_2d(0f64..1f64, 0f64..1.05f64)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("False Positive Rate")
        .y_desc("True Positive Rate")
        .draw()
        .map_err(plot_err)?;

    let points: Vec<(f64, f64)> = roc
        .fpr
        .iter()
        .copied()
        .zip(roc.tpr.iter().copied())
        .collect();
    chart
        .draw_series(LineSeries::new(points, BLUE.stroke_width(2)))
        .map_err(plot_err)?
        .label(format!("ROC curve (AUC = {:.4})", roc.auc()))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE.stroke_width(2)));

    chart
        .draw_series(LineSeries::new(
            vec![(0.0, 0.0), (1.0, 1.0)],
            BLACK.mix(0.6).stroke_width(1),
        ))
        .map_err(plot_err)?
        .label("Random guess")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK.mix(0.6).stroke_width(1)));

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

/// One cell of the sample grid.
pub struct SamplePanel {
    pub image: RgbImage,
    pub truth: Label,
    pub predicted: Label,
    pub probability: f32,
}

/// Up to `GRID_ROWS * GRID_COLS` images with their true and predicted
/// labels; unused cells stay blank.
pub fn render_sample_grid(path: &Path, panels: &[SamplePanel]) -> Result<()> {
    let root = BitMapBackend::new(path, (1200, 640)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let cells = root.split_evenly((GRID_ROWS, GRID_COLS));
    let title = (FONT, 16)
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Center, VPos::Top));

    for (cell, panel) in cells.iter().zip(panels) {
        let (width, height) = cell.dim_in_pixel();
        let center = width as i32 / 2;

        cell.draw(&Text::new(
            format!("T: {}", panel.truth),
            (center, 6),
            title.clone(),
        ))
        .map_err(plot_err)?;
        cell.draw(&Text::new(
            format!("P: {} ({:.2})", panel.predicted, panel.probability),
            (center, 26),
            title.clone(),
        ))
        .map_err(plot_err)?;

        let left = (width as i32 - panel.image.width() as i32) / 2;
        let top = 50.max(height as i32 - panel.image.height() as i32 - 4);
        for (x, y, pixel) in panel.image.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            cell.draw_pixel((left + x as i32, top + y as i32), &RGBColor(r, g, b))
                .map_err(plot_err)?;
        }
    }

    root.present().map_err(plot_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_is_clamped() {
        assert_eq!(blues(-1.0), blues(0.0));
        assert_eq!(blues(0.0), RGBColor(247, 251, 255));
        assert_eq!(blues(7.0), RGBColor(8, 48, 107));
    }
}
