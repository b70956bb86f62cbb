//! Additive seasonal regression model.
//!
//! `y(t) = trend(t) + weekly(t) + yearly(t) + Σ βᵢ·xᵢ(t)` where the trend is
//! piecewise linear with hinge terms at evenly spaced changepoints and the
//! seasonal terms are Fourier series. Coefficients are fitted by ridge
//! regression on the normal equations (Cholesky); each block carries its own
//! penalty derived from its prior scale, so a small changepoint prior keeps
//! the trend stiff.

use std::f64::consts::PI;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::error::ForecastError;
use crate::features::RegressorFrame;
use crate::stats::quantile_normal;

const WEEK_DAYS: f64 = 7.0;
const YEAR_DAYS: f64 = 365.25;

/// Base jitter added to every diagonal entry.
const JITTER: f64 = 1e-8;

/// Fitting options, resolved from [`TrainingConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub yearly_seasonality: bool,
    pub weekly_seasonality: bool,
    pub yearly_fourier_order: usize,
    pub weekly_fourier_order: usize,
    pub n_changepoints: usize,
    pub changepoint_range: f64,
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub regressor_prior_scale: f64,
    pub interval_width: f64,
}

impl From<&TrainingConfig> for ModelSpec {
    fn from(cfg: &TrainingConfig) -> Self {
        Self {
            yearly_seasonality: cfg.yearly_seasonality,
            weekly_seasonality: cfg.weekly_seasonality,
            yearly_fourier_order: cfg.yearly_fourier_order,
            weekly_fourier_order: cfg.weekly_fourier_order,
            n_changepoints: cfg.n_changepoints,
            changepoint_range: cfg.changepoint_range,
            changepoint_prior_scale: cfg.changepoint_prior_scale,
            seasonality_prior_scale: cfg.seasonality_prior_scale,
            regressor_prior_scale: cfg.regressor_prior_scale,
            interval_width: cfg.interval_width,
        }
    }
}

/// A fitted model. This is the serialised model body of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalModel {
    /// First training date (t = 0).
    pub start: NaiveDate,
    /// Last training date; horizons are counted from here.
    pub end: NaiveDate,
    /// Training span in days (t = 1 at `end`).
    pub t_scale: f64,
    /// Target scale (max |y|) applied before fitting.
    pub y_scale: f64,
    /// Changepoint locations in scaled time.
    pub changepoints: Vec<f64>,
    pub weekly_order: usize,
    pub yearly_order: usize,
    pub regressors: Vec<String>,
    pub coefficients: Vec<f64>,
    /// Residual standard deviation in scaled units.
    pub sigma: f64,
    pub interval_width: f64,
}

/// Point forecasts with an uncertainty band, in target units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutput {
    pub yhat: Vec<f64>,
    pub yhat_lower: Vec<f64>,
    pub yhat_upper: Vec<f64>,
}

impl ModelOutput {
    pub fn len(&self) -> usize {
        self.yhat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.yhat.is_empty()
    }

    /// Apply `f` to every value of all three series.
    pub fn map(mut self, f: impl Fn(f64) -> f64) -> Self {
        for v in self
            .yhat
            .iter_mut()
            .chain(self.yhat_lower.iter_mut())
            .chain(self.yhat_upper.iter_mut())
        {
            *v = f(*v);
        }
        self
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
enum Block {
    Free,
    Changepoint,
    Seasonal,
    Regressor,
}

impl SeasonalModel {
    /// Fit against `y` using the named `regressors` columns of `frame`.
    pub fn fit(
        spec: &ModelSpec,
        frame: &RegressorFrame,
        y: &[f64],
        regressors: &[String],
    ) -> Result<Self, ForecastError> {
        let n = y.len();
        if n < 2 {
            return Err(ForecastError::InsufficientData { needed: 2, got: n });
        }
        if frame.len() != n {
            return Err(ForecastError::fit(format!(
                "frame has {} rows but target has {n}",
                frame.len()
            )));
        }
        if let Some(v) = y.iter().find(|v| !v.is_finite()) {
            return Err(ForecastError::fit(format!("non-finite target value {v}")));
        }

        let dates = frame.dates();
        let start = dates[0];
        let end = dates[n - 1];
        let span_days = (end - start).num_days();
        let t_scale = span_days.max(1) as f64;

        let y_scale = y.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let y_scale = if y_scale > 0.0 { y_scale } else { 1.0 };

        let weekly_order = if spec.weekly_seasonality && span_days >= 14 {
            spec.weekly_fourier_order
        } else {
            0
        };
        let yearly_order = if spec.yearly_seasonality && span_days >= 365 {
            spec.yearly_fourier_order
        } else {
            0
        };

        let t: Vec<f64> = dates
            .iter()
            .map(|d| (*d - start).num_days() as f64 / t_scale)
            .collect();
        let changepoints = place_changepoints(&t, spec.n_changepoints, spec.changepoint_range);

        let mut model = Self {
            start,
            end,
            t_scale,
            y_scale,
            changepoints,
            weekly_order,
            yearly_order,
            regressors: regressors.to_vec(),
            coefficients: Vec::new(),
            sigma: 0.0,
            interval_width: spec.interval_width,
        };

        let x = model.design(frame)?;
        let blocks = model.blocks();
        let penalty = |b: Block| match b {
            Block::Free => 0.0,
            Block::Changepoint => 1.0 / (spec.changepoint_prior_scale * spec.changepoint_prior_scale),
            Block::Seasonal => 1.0 / (spec.seasonality_prior_scale * spec.seasonality_prior_scale),
            Block::Regressor => 1.0 / (spec.regressor_prior_scale * spec.regressor_prior_scale),
        };

        let k = blocks.len();
        let ys: Vec<f64> = y.iter().map(|v| v / y_scale).collect();
        let mut xtx = vec![vec![0.0; k]; k];
        let mut xty = vec![0.0; k];
        for (row, &yv) in x.iter().zip(&ys) {
            for i in 0..k {
                let xi = row[i];
                if xi == 0.0 {
                    continue;
                }
                xty[i] += xi * yv;
                for j in 0..=i {
                    xtx[i][j] += xi * row[j];
                }
            }
        }
        for i in 0..k {
            for j in 0..i {
                xtx[j][i] = xtx[i][j];
            }
            xtx[i][i] += JITTER + penalty(blocks[i]);
        }

        let beta = solve_symmetric(&xtx, &xty)
            .ok_or_else(|| ForecastError::fit("normal equations are not positive definite"))?;
        if beta.iter().any(|b| !b.is_finite()) {
            return Err(ForecastError::fit("non-finite coefficients"));
        }
        model.coefficients = beta;

        let resid_ss: f64 = x
            .iter()
            .zip(&ys)
            .map(|(row, yv)| {
                let e = yv - dot(row, &model.coefficients);
                e * e
            })
            .sum();
        model.sigma = (resid_ss / (n.saturating_sub(1).max(1) as f64)).sqrt();

        Ok(model)
    }

    /// Forecast every row of `frame`. The frame must carry every regressor.
    pub fn predict(&self, frame: &RegressorFrame) -> Result<ModelOutput, ForecastError> {
        let x = self.design(frame)?;
        let z = quantile_normal((1.0 + self.interval_width) / 2.0);

        let mut out = ModelOutput {
            yhat: Vec::with_capacity(x.len()),
            yhat_lower: Vec::with_capacity(x.len()),
            yhat_upper: Vec::with_capacity(x.len()),
        };

        for (row, date) in x.iter().zip(frame.dates()) {
            let mean = dot(row, &self.coefficients) * self.y_scale;
            // The band widens with distance past the training window.
            let horizon = (*date - self.end).num_days().max(0) as f64;
            let half = z * self.sigma * self.y_scale * (1.0 + horizon / self.t_scale).sqrt();
            out.yhat.push(mean);
            out.yhat_lower.push(mean - half);
            out.yhat_upper.push(mean + half);
        }

        Ok(out)
    }

    fn blocks(&self) -> Vec<Block> {
        let mut blocks = vec![Block::Free, Block::Free];
        blocks.extend(std::iter::repeat_n(Block::Changepoint, self.changepoints.len()));
        blocks.extend(std::iter::repeat_n(
            Block::Seasonal,
            2 * (self.weekly_order + self.yearly_order),
        ));
        blocks.extend(std::iter::repeat_n(Block::Regressor, self.regressors.len()));
        blocks
    }

    fn design(&self, frame: &RegressorFrame) -> Result<Vec<Vec<f64>>, ForecastError> {
        let columns: Vec<&[f64]> = self
            .regressors
            .iter()
            .map(|name| {
                frame.column(name).ok_or_else(|| {
                    ForecastError::InvalidInput(format!("frame is missing regressor column {name}"))
                })
            })
            .collect::<Result<_, _>>()?;

        let epoch = NaiveDate::default();
        let width = self.blocks().len();
        let mut rows = Vec::with_capacity(frame.len());

        for (idx, date) in frame.dates().iter().enumerate() {
            let mut row = Vec::with_capacity(width);
            let t = (*date - self.start).num_days() as f64 / self.t_scale;
            row.push(1.0);
            row.push(t);
            row.extend(self.changepoints.iter().map(|c| (t - c).max(0.0)));

            let day = (*date - epoch).num_days() as f64;
            fourier(&mut row, day, WEEK_DAYS, self.weekly_order);
            fourier(&mut row, day, YEAR_DAYS, self.yearly_order);

            row.extend(columns.iter().map(|col| col[idx]));
            rows.push(row);
        }

        Ok(rows)
    }
}

fn fourier(row: &mut Vec<f64>, day: f64, period: f64, order: usize) {
    for k in 1..=order {
        let x = 2.0 * PI * (k as f64) * day / period;
        row.push(x.sin());
        row.push(x.cos());
    }
}

/// Evenly spaced changepoints over the first `range` share of `t`.
fn place_changepoints(t: &[f64], n_changepoints: usize, range: f64) -> Vec<f64> {
    let hist = ((t.len() as f64) * range).floor() as usize;
    if hist < 3 || n_changepoints == 0 {
        return Vec::new();
    }
    let n = n_changepoints.min(hist - 2);
    (1..=n)
        .map(|i| {
            let idx = ((i as f64) * ((hist - 1) as f64) / ((n + 1) as f64)).round() as usize;
            t[idx]
        })
        .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Solve `A x = b` for symmetric positive definite `A` (Cholesky).
fn solve_symmetric(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    if n == 0 || a.len() != n {
        return None;
    }

    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[i][j] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i][j] * y[j];
        }
        y[i] = sum / l[i][i];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j][i] * x[j];
        }
        x[i] = sum / l[i][i];
    }

    Some(x)
}
