//! 学習過程の可視化と記録の保存。

use std::fs::{self, File};
use std::io::BufWriter;
use std::ops::Range;
use std::path::{Path, PathBuf};

use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::info;

use crate::config::{CONSTANT_NAMES, ExperimentConfig};
use crate::dataset::{CURRENT, Observed, ReferenceTrajectory, TIME, VELOCITY};
use crate::error::{PinnError, PinnResult};
use crate::training::{PredictionCurve, Reporter, TrajectoryLog};

const SNAPSHOT_SIZE: (u32, u32) = (1850, 1050);
const GIF_SIZE: (u32, u32) = (925, 525);
const COMPARISON_SIZE: (u32, u32) = (1400, 900);
const SUMMARY_SIZE: (u32, u32) = (1200, 900);

const LOSS_LABELS: [&str; 5] = [
    "Mechanical residual",
    "Electrical residual",
    "Data loss",
    "Total loss",
    "Validation loss",
];

/// スナップショットのファイル名 (反復番号は1始まり、8桁ゼロ埋め)。
pub fn snapshot_file_name(iteration: usize) -> String {
    format!("pinn_{:08}.png", iteration + 1)
}

pub fn comparison_file_name(iteration: usize) -> String {
    format!("prediction_{iteration:08}.svg")
}

/// 有限な値だけから、余白付きの描画範囲を求めます。
fn value_range(series: &[&[f32]]) -> Range<f32> {
    let (lo, hi) = series
        .iter()
        .flat_map(|s| s.iter())
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !(lo.is_finite() && hi.is_finite()) {
        return -1.0..1.0;
    }
    let pad = ((hi - lo) * 0.05).max(1e-3);
    (lo - pad)..(hi + pad)
}

fn points<'a>(xs: &'a [f32], ys: &'a [f32]) -> impl Iterator<Item = (f32, f32)> + 'a {
    xs.iter().zip(ys).map(|(&x, &y)| (x, y))
}

struct Panel<'p> {
    title: &'p str,
    observed: (&'p [f32], &'p [f32]),
    prediction: (&'p [f32], &'p [f32]),
    reference: Option<(&'p [f32], &'p [f32])>,
}

fn draw_panel<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>, panel: &Panel<'_>) -> PinnResult<()> {
    let (t_obs, y_obs) = panel.observed;
    let (t_pred, y_pred) = panel.prediction;
    let mut ts = vec![t_obs, t_pred];
    let mut ys = vec![y_obs, y_pred];
    if let Some((t_ref, y_ref)) = panel.reference {
        ts.push(t_ref);
        ys.push(y_ref);
    }

    let mut chart = ChartBuilder::on(area)
        .caption(panel.title, ("sans-serif", 24).into_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(60)
        .build_cartesian_2d(value_range(&ts), value_range(&ys))?;
    chart.configure_mesh().x_desc("t [s]").draw()?;

    if let Some((t_ref, y_ref)) = panel.reference {
        chart
            .draw_series(LineSeries::new(points(t_ref, y_ref), &BLACK.mix(0.4)))?
            .label("Exact solution")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLACK.mix(0.4)));
    }
    chart
        .draw_series(
            points(t_obs, y_obs).map(|p| Circle::new(p, 2, BLUE.mix(0.6).filled())),
        )?
        .label("Noisy observations")
        .legend(|(x, y)| Circle::new((x + 10, y), 3, BLUE.filled()));
    chart
        .draw_series(LineSeries::new(points(t_pred, y_pred), &GREEN))?
        .label("PINN solution")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &GREEN));
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    Ok(())
}

/// 観測値と PINN の予測を上下2段 (速度, 電流) に描きます。
fn render_snapshot<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    curve: &PredictionCurve,
    observed: &Observed,
) -> PinnResult<()> {
    root.fill(&WHITE)?;
    let root = root.titled(
        &format!(
            "Observations and PINN approximation at iter: {}",
            curve.iteration
        ),
        ("sans-serif", 30),
    )?;
    let panels = root.split_evenly((2, 1));
    draw_panel(
        &panels[0],
        &Panel {
            title: "Speed",
            observed: (&observed.times, &observed.velocity),
            prediction: (&curve.times, &curve.velocity),
            reference: None,
        },
    )?;
    draw_panel(
        &panels[1],
        &Panel {
            title: "Current",
            observed: (&observed.times, &observed.current),
            prediction: (&curve.times, &curve.current),
            reference: None,
        },
    )
}

/// 各物理定数の推定値の推移と真値を描きます。
fn render_constants<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    log: &TrajectoryLog,
    nominal: [f32; 6],
) -> PinnResult<()> {
    root.fill(&WHITE)?;
    let panels = root.split_evenly((3, 2));
    for (k, panel) in panels.iter().enumerate() {
        let values: Vec<f32> = log.constants.iter().map(|c| c[k]).collect();
        let truth = [nominal[k]];
        let last = values.len().max(2) - 1;

        let mut chart = ChartBuilder::on(panel)
            .caption(CONSTANT_NAMES[k], ("sans-serif", 22).into_font())
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(60)
            .build_cartesian_2d(0..last, value_range(&[&values[..], &truth[..]]))?;
        chart.configure_mesh().x_desc("Iterations").draw()?;
        chart
            .draw_series(LineSeries::new(
                values.iter().enumerate().map(|(i, &v)| (i, v)),
                &RED,
            ))?
            .label("PINN estimate")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
        chart
            .draw_series(LineSeries::new(
                vec![(0, nominal[k]), (last, nominal[k])],
                &BLUE,
            ))?
            .label("True value")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }
    Ok(())
}

/// 損失の各項の推移を log10 スケールで描きます。
fn render_losses<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    log: &TrajectoryLog,
) -> PinnResult<()> {
    root.fill(&WHITE)?;
    let series: Vec<Vec<(usize, f32)>> = (0..LOSS_LABELS.len())
        .map(|k| {
            log.losses
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    let v = [r.mechanical, r.electrical, r.data, r.total, r.validation][k];
                    (i, v)
                })
                .filter(|(_, v)| v.is_finite() && *v > 0.0)
                .map(|(i, v)| (i, v.log10()))
                .collect()
        })
        .collect();
    let logs: Vec<f32> = series.iter().flatten().map(|&(_, v)| v).collect();
    let last = log.len().max(2) - 1;

    let mut chart = ChartBuilder::on(root)
        .caption("Loss History", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0..last, value_range(&[&logs[..]]))?;
    chart
        .configure_mesh()
        .y_desc("Loss (log10 scale)")
        .x_desc("Iterations")
        .draw()?;

    let colors = [RED, BLUE, GREEN, MAGENTA, BLACK];
    for ((points, label), color) in series.into_iter().zip(LOSS_LABELS).zip(colors) {
        chart
            .draw_series(LineSeries::new(points, &color))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    Ok(())
}

/// 学習過程を PNG・SVG・GIF と JSON に書き出す `Reporter`。
#[derive(Debug)]
pub struct PlotReporter {
    out_dir: PathBuf,
    snapshot_dir: PathBuf,
    reference_times: Vec<f32>,
    reference_velocity: Vec<f32>,
    reference_current: Vec<f32>,
    nominal: [f32; 6],
    gif_fps: u32,
    frames: Vec<PredictionCurve>,
    observed: Option<Observed>,
}

impl PlotReporter {
    /// 出力先ディレクトリを作成し、比較用の参照軌道を保持します。
    pub fn new(
        out_dir: &Path,
        trajectory: &ReferenceTrajectory,
        config: &ExperimentConfig,
    ) -> PinnResult<Self> {
        let snapshot_dir = out_dir.join("snapshots");
        fs::create_dir_all(&snapshot_dir)?;
        Ok(Self {
            out_dir: out_dir.to_path_buf(),
            snapshot_dir,
            reference_times: trajectory.input_column(TIME),
            reference_velocity: trajectory.output_column(VELOCITY),
            reference_current: trajectory.output_column(CURRENT),
            nominal: config.motor.as_array(),
            gif_fps: config.gif_fps,
            frames: Vec::new(),
            observed: None,
        })
    }

    fn save_gif(&self, path: &Path) -> PinnResult<()> {
        let Some(observed) = &self.observed else {
            return Ok(());
        };
        let delay = (1000 / self.gif_fps.max(1)).max(1);
        let root = BitMapBackend::gif(path, GIF_SIZE, delay)
            .map_err(|e| PinnError::Plot(e.to_string()))?
            .into_drawing_area();
        for frame in &self.frames {
            render_snapshot(&root, frame, observed)?;
            root.present()?;
        }
        Ok(())
    }
}

impl Reporter for PlotReporter {
    fn snapshot(&mut self, curve: &PredictionCurve, observed: &Observed) -> PinnResult<()> {
        let path = self.snapshot_dir.join(snapshot_file_name(curve.iteration));
        let root = BitMapBackend::new(&path, SNAPSHOT_SIZE).into_drawing_area();
        render_snapshot(&root, curve, observed)?;
        root.present()?;

        if self.observed.is_none() {
            self.observed = Some(observed.clone());
        }
        self.frames.push(curve.clone());
        Ok(())
    }

    fn comparison(&mut self, curve: &PredictionCurve, observed: &Observed) -> PinnResult<()> {
        let path = self.out_dir.join(comparison_file_name(curve.iteration));
        let root = SVGBackend::new(&path, COMPARISON_SIZE).into_drawing_area();
        root.fill(&WHITE)?;
        let titled = root.titled(
            &format!("Reference, observations and PINN at iter: {}", curve.iteration),
            ("sans-serif", 26),
        )?;
        let panels = titled.split_evenly((2, 1));
        draw_panel(
            &panels[0],
            &Panel {
                title: "Speed",
                observed: (&observed.times, &observed.velocity),
                prediction: (&curve.times, &curve.velocity),
                reference: Some((&self.reference_times, &self.reference_velocity)),
            },
        )?;
        draw_panel(
            &panels[1],
            &Panel {
                title: "Current",
                observed: (&observed.times, &observed.current),
                prediction: (&curve.times, &curve.current),
                reference: Some((&self.reference_times, &self.reference_current)),
            },
        )?;
        root.present()?;
        Ok(())
    }

    fn finish(&mut self, log: &TrajectoryLog) -> PinnResult<()> {
        info!("学習過程のグラフを生成しています...");
        let constants_path = self.out_dir.join("constants.png");
        let root = BitMapBackend::new(&constants_path, SUMMARY_SIZE).into_drawing_area();
        render_constants(&root, log, self.nominal)?;
        root.present()?;

        let losses_path = self.out_dir.join("losses.png");
        let root = BitMapBackend::new(&losses_path, SUMMARY_SIZE).into_drawing_area();
        render_losses(&root, log)?;
        root.present()?;

        let writer = BufWriter::new(File::create(self.out_dir.join("trajectory.json"))?);
        serde_json::to_writer_pretty(writer, log)?;

        info!("GIFを生成しています...");
        self.save_gif(&self.out_dir.join("learning.gif"))?;
        info!("=> 結果を '{}' に保存しました。", self.out_dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_names_are_zero_padded_and_one_based() {
        assert_eq!(snapshot_file_name(0), "pinn_00000001.png");
        assert_eq!(snapshot_file_name(98), "pinn_00000099.png");
        assert_eq!(comparison_file_name(199), "prediction_00000199.svg");
    }

    #[test]
    fn range_ignores_non_finite_values() {
        let values = [1.0, f32::NAN, 3.0, f32::INFINITY];
        let range = value_range(&[&values[..]]);
        assert!(range.start < 1.0 && range.start > 0.8);
        assert!(range.end > 3.0 && range.end < 3.2);
    }

    #[test]
    fn range_falls_back_when_empty() {
        let empty: [f32; 0] = [];
        assert_eq!(value_range(&[&empty[..]]), -1.0..1.0);
    }

    #[test]
    fn flat_series_gets_padding() {
        let values = [2.0, 2.0];
        let range = value_range(&[&values[..]]);
        assert!(range.start < 2.0 && range.end > 2.0);
    }
}
