//! MaGA: two-stage linear-regression forecasting of the next major
//! collection.
//!
//! Stage one fits young-generation usage against old-generation usage to
//! estimate how full the young generation gets by the time the old
//! generation approaches exhaustion. Stage two fits elapsed time against
//! young-generation usage to estimate when that threshold is reached. Each
//! relation is near-linear over short horizons; their composition is not,
//! which is why the stages stay separate.

use std::time::Duration;
use tokio::time::Instant;

use crate::telemetry::HeapSnapshot;

/// Minimum number of snapshots a forecast needs.
pub const MIN_WINDOW: usize = 5;

/// Window size at which confidence saturates at 1.0.
const CONFIDENCE_SATURATION: f64 = 20.0;

/// Fraction of old-generation capacity treated as exhaustion.
const OLD_GEN_EXHAUSTION: f64 = 0.9;

/// Regressions with a normal-equation denominator below this are treated
/// as singular and produce no forecast.
const DENOMINATOR_EPSILON: f64 = 1e-10;

/// A predicted major-collection event.
#[derive(Debug, Clone)]
pub struct MagcForecast {
    /// Predicted start of the next major collection.
    pub predicted_at: Instant,
    /// Forecast confidence in `[0, 1]`.
    pub confidence: f64,
    /// Predicted young-generation usage at collection time.
    pub young_threshold: usize,
    /// Milliseconds until the predicted collection, measured at creation.
    pub time_to_magc_ms: u64,
    /// When the forecast was produced.
    pub created_at: Instant,
}

impl MagcForecast {
    /// Returns true once the forecast has outlived `stale_after`.
    #[must_use]
    pub fn is_stale(&self, now: Instant, stale_after: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > stale_after
    }

    /// Milliseconds until the predicted collection as seen from `now`;
    /// `None` once the predicted instant has passed.
    #[must_use]
    pub fn time_until_ms(&self, now: Instant) -> Option<u64> {
        if now > self.predicted_at {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let remaining_ms = self.predicted_at.duration_since(now).as_millis() as u64;
        Some(remaining_ms)
    }
}

/// Least-squares fit `y ≈ slope·x + intercept`.
///
/// Returns `None` when the normal-equation denominator is numerically zero
/// (all `x` identical, or too few points).
fn linear_fit(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    #[allow(clippy::cast_precision_loss)]
    let n = points.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_x2) = (0.0, 0.0, 0.0, 0.0);

    for &(x, y) in points {
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator.abs() < DENOMINATOR_EPSILON {
        return None;
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    Some((slope, intercept))
}

/// Stage one: predicted young-generation usage when the old generation
/// reaches exhaustion. Negative predictions clamp to zero.
fn young_threshold_at_exhaustion(window: &[HeapSnapshot], old_max: usize) -> Option<f64> {
    #[allow(clippy::cast_precision_loss)]
    let points: Vec<(f64, f64)> = window
        .iter()
        .map(|s| (s.old_used as f64, s.young_used as f64))
        .collect();

    let (slope, intercept) = linear_fit(&points)?;

    #[allow(clippy::cast_precision_loss)]
    let old_threshold = old_max as f64 * OLD_GEN_EXHAUSTION;
    Some((slope * old_threshold + intercept).max(0.0))
}

/// Stage two: milliseconds from `now` until young-generation usage reaches
/// `young_threshold`. Predictions in the past clamp to zero.
fn time_to_threshold_ms(
    window: &[HeapSnapshot],
    young_threshold: f64,
    now: Instant,
) -> Option<f64> {
    let origin = window.first()?.taken_at;

    #[allow(clippy::cast_precision_loss)]
    let points: Vec<(f64, f64)> = window
        .iter()
        .map(|s| {
            let elapsed_ms = s.taken_at.saturating_duration_since(origin).as_millis() as f64;
            (s.young_used as f64, elapsed_ms)
        })
        .collect();

    let (slope, intercept) = linear_fit(&points)?;

    let predicted_ms = slope * young_threshold + intercept;
    let now_ms = now.saturating_duration_since(origin).as_millis() as f64;
    Some((predicted_ms - now_ms).max(0.0))
}

/// Confidence grows with window size, saturating at 20 samples, and is
/// halved when the newest snapshot is older than `stale_after`.
fn confidence(window: &[HeapSnapshot], now: Instant, stale_after: Duration) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let mut confidence = (window.len() as f64 / CONFIDENCE_SATURATION).min(1.0);

    if let Some(latest) = window.last() {
        if now.saturating_duration_since(latest.taken_at) > stale_after {
            confidence *= 0.5;
        }
    }

    confidence
}

/// Runs the full MaGA over a window of snapshots.
///
/// Returns `None` when the window is too small or either regression is
/// singular; the caller keeps its previous forecast in that case.
#[must_use]
pub fn forecast_magc(
    window: &[HeapSnapshot],
    old_max: usize,
    now: Instant,
    stale_after: Duration,
) -> Option<MagcForecast> {
    if window.len() < MIN_WINDOW {
        return None;
    }

    let young_threshold = young_threshold_at_exhaustion(window, old_max)?;
    let time_to_magc = time_to_threshold_ms(window, young_threshold, now)?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let time_to_magc_ms = time_to_magc as u64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let young_threshold = young_threshold as usize;

    Some(MagcForecast {
        predicted_at: now + Duration::from_millis(time_to_magc_ms),
        confidence: confidence(window, now, stale_after),
        young_threshold,
        time_to_magc_ms,
        created_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STALE: Duration = Duration::from_secs(30);

    /// Snapshots on a clean linear ramp: every second, old grows by
    /// `old_step` and young by `young_step`.
    fn ramp(base: Instant, count: usize, old_step: usize, young_step: usize) -> Vec<HeapSnapshot> {
        (0..count)
            .map(|i| HeapSnapshot {
                taken_at: base + Duration::from_secs(i as u64),
                young_used: young_step * i,
                old_used: old_step * i,
                young_max: 50,
                old_max: 50,
                total_used: young_step * i + old_step * i,
                total_max: 100,
                gc_count: 0,
                last_magc_end: None,
                last_magc_duration_ms: 0,
                collecting: false,
            })
            .collect()
    }

    #[test]
    fn linear_fit_recovers_exact_line() {
        let points: Vec<(f64, f64)> = (0..10).map(|i| (f64::from(i), 3.0 * f64::from(i) + 7.0)).collect();
        let (slope, intercept) = linear_fit(&points).unwrap();
        assert!((slope - 3.0).abs() < 1e-9);
        assert!((intercept - 7.0).abs() < 1e-9);
    }

    #[test]
    fn linear_fit_rejects_constant_x() {
        let points = vec![(5.0, 1.0), (5.0, 2.0), (5.0, 3.0)];
        assert!(linear_fit(&points).is_none());
    }

    #[test]
    fn forecast_predicts_ramp_intersection() {
        let base = Instant::now();
        // young = old (slope 1): threshold = 0.9 * 50 = 45.
        // young grows 10/s, so young reaches 45 at t = 4500ms.
        let window = ramp(base, 5, 10, 10);
        let now = window.last().unwrap().taken_at;

        let forecast = forecast_magc(&window, 50, now, STALE).unwrap();
        assert_eq!(forecast.young_threshold, 45);
        // now is t = 4000ms, so 500ms remain.
        assert_eq!(forecast.time_to_magc_ms, 500);
        assert!((forecast.confidence - 0.25).abs() < 1e-9);
    }

    #[test]
    fn forecast_requires_minimum_window() {
        let base = Instant::now();
        let window = ramp(base, MIN_WINDOW - 1, 10, 10);
        let now = base + Duration::from_secs(10);
        assert!(forecast_magc(&window, 50, now, STALE).is_none());
    }

    #[test]
    fn forecast_aborts_on_singular_stage_one() {
        let base = Instant::now();
        // Old generation never moves: stage one cannot fit a line.
        let window = ramp(base, 8, 0, 10);
        let now = base + Duration::from_secs(8);
        assert!(forecast_magc(&window, 50, now, STALE).is_none());
    }

    #[test]
    fn forecast_clamps_past_predictions_to_zero() {
        let base = Instant::now();
        let window = ramp(base, 5, 10, 10);
        // Well past the predicted intersection at 4500ms.
        let now = base + Duration::from_secs(60);

        let forecast = forecast_magc(&window, 50, now, STALE).unwrap();
        assert_eq!(forecast.time_to_magc_ms, 0);
    }

    #[test]
    fn confidence_is_monotone_in_window_size() {
        let base = Instant::now();
        let mut last = 0.0;
        for size in MIN_WINDOW..=25 {
            let window = ramp(base, size, 10, 10);
            let now = window.last().unwrap().taken_at;
            let forecast = forecast_magc(&window, 50, now, STALE).unwrap();
            assert!(forecast.confidence >= last);
            last = forecast.confidence;
        }
        // Saturates at 1.0 from 20 samples on.
        assert!((last - 1.0).abs() < 1e-9);
    }

    #[test]
    fn confidence_halves_past_staleness_boundary() {
        let base = Instant::now();
        let window = ramp(base, 20, 2, 2);
        let fresh_now = window.last().unwrap().taken_at;

        let fresh = forecast_magc(&window, 50, fresh_now, STALE).unwrap();
        assert!((fresh.confidence - 1.0).abs() < 1e-9);

        let stale_now = fresh_now + Duration::from_secs(31);
        let stale = forecast_magc(&window, 50, stale_now, STALE).unwrap();
        assert!((stale.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn staleness_and_time_until() {
        let now = Instant::now();
        let forecast = MagcForecast {
            predicted_at: now + Duration::from_millis(1_500),
            confidence: 1.0,
            young_threshold: 40,
            time_to_magc_ms: 1_500,
            created_at: now,
        };

        assert!(!forecast.is_stale(now + Duration::from_secs(30), STALE));
        assert!(forecast.is_stale(now + Duration::from_secs(31), STALE));

        assert_eq!(forecast.time_until_ms(now + Duration::from_millis(500)), Some(1_000));
        assert_eq!(forecast.time_until_ms(now + Duration::from_secs(2)), None);
    }
}
