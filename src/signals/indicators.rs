//! Indicator math over f64 series: EMA, MACD histogram, VWAP, volume
//! resonance, zero-line crosses and the momentum gate.

use crate::domain::Candle;

/// Exponential moving average seeded with the first sample.
pub fn ema(series: &[f64], span: usize) -> Vec<f64> {
    let Some(&first) = series.first() else {
        return Vec::new();
    };
    let k = 2.0 / (span as f64 + 1.0);
    let mut value = first;
    series
        .iter()
        .map(|v| {
            value = v * k + value * (1.0 - k);
            value
        })
        .collect()
}

/// MACD histogram series (MACD line minus its signal line).
pub fn macd_hist(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<f64> {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let sig = ema(&line, signal);
    line.iter().zip(sig.iter()).map(|(l, s)| l - s).collect()
}

/// Standard 12/26/9 histogram.
pub fn macd_hist_default(closes: &[f64]) -> Vec<f64> {
    macd_hist(closes, 12, 26, 9)
}

pub fn last_or_zero(series: &[f64]) -> f64 {
    series.last().copied().unwrap_or(0.0)
}

/// Volume-weighted typical price. Falls back to the last close when the
/// window has no volume.
pub fn vwap(candles: &[Candle]) -> f64 {
    let (num, den) = candles.iter().fold((0.0, 0.0), |(n, d), c| {
        (n + c.typical_price() * c.volume, d + c.volume)
    });
    if den > 0.0 {
        num / den
    } else {
        candles.last().map(|c| c.close).unwrap_or(0.0)
    }
}

/// Volume confirmation: mean of the last 3 volumes against the last 20.
///
/// Returns `(bull, bear)`; both false with fewer than 20 samples.
pub fn volume_resonance(volumes: &[f64]) -> (bool, bool) {
    if volumes.len() < 20 {
        return (false, false);
    }
    let mean = |s: &[f64]| s.iter().sum::<f64>() / s.len() as f64;
    let ma20 = mean(&volumes[volumes.len() - 20..]);
    let ma3 = mean(&volumes[volumes.len() - 3..]);
    (ma3 > ma20 * 1.1, ma3 < ma20 * 0.9)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cross {
    /// Histogram moved from below zero to above.
    Golden,
    /// Histogram moved from above zero to below.
    Death,
}

/// Zero-line cross between `hist[end - 2]` and `hist[end - 1]`.
pub fn zero_cross_at(hist: &[f64], end: usize) -> Option<Cross> {
    if end < 2 || end > hist.len() {
        return None;
    }
    let (a, b) = (hist[end - 2], hist[end - 1]);
    if a < 0.0 && b > 0.0 {
        Some(Cross::Golden)
    } else if a > 0.0 && b < 0.0 {
        Some(Cross::Death)
    } else {
        None
    }
}

/// Momentum gate: `|h_last| >= alpha * mean(|h|)` over the `window` bars
/// before the last one.
pub fn momentum_ok(hist: &[f64], alpha: f64, window: usize) -> bool {
    if window == 0 || hist.len() < window + 1 {
        return false;
    }
    let last = hist[hist.len() - 1].abs();
    let prior = &hist[hist.len() - 1 - window..hist.len() - 1];
    let mean = prior.iter().map(|h| h.abs()).sum::<f64>() / window as f64;
    last >= alpha * mean
}

/// The last two bars share the sign `positive`.
pub fn two_bars_same_sign(hist: &[f64], positive: bool) -> bool {
    if hist.len() < 2 {
        return false;
    }
    hist[hist.len() - 2..]
        .iter()
        .all(|h| if positive { *h > 0.0 } else { *h < 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64, volume: f64) -> Candle {
        Candle {
            ts_ms: 0,
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    #[test]
    fn test_ema_seeded_with_first_value() {
        let out = ema(&[10.0, 10.0, 10.0], 5);
        assert_eq!(out, vec![10.0, 10.0, 10.0]);
        assert!(ema(&[], 5).is_empty());
        let rising = ema(&[1.0, 2.0], 3);
        assert!((rising[1] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_macd_hist_sign_follows_trend() {
        let up: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let down: Vec<f64> = (0..80).map(|i| 200.0 - i as f64).collect();
        let mut turn = up.clone();
        turn.extend((0..10).map(|i| 179.0 - 3.0 * i as f64));
        assert!(last_or_zero(&macd_hist_default(&up)) >= 0.0);
        assert!(last_or_zero(&macd_hist_default(&down)) <= 0.0);
        assert!(last_or_zero(&macd_hist_default(&turn)) < 0.0);
    }

    #[test]
    fn test_vwap() {
        let candles = vec![candle(10.0, 1.0), candle(20.0, 3.0)];
        assert!((vwap(&candles) - 17.5).abs() < 1e-12);
        let no_volume = vec![candle(10.0, 0.0), candle(12.0, 0.0)];
        assert_eq!(vwap(&no_volume), 12.0);
    }

    #[test]
    fn test_volume_resonance() {
        let mut vols = vec![10.0; 17];
        vols.extend([30.0, 30.0, 30.0]);
        assert_eq!(volume_resonance(&vols), (true, false));
        let mut quiet = vec![10.0; 17];
        quiet.extend([1.0, 1.0, 1.0]);
        assert_eq!(volume_resonance(&quiet), (false, true));
        assert_eq!(volume_resonance(&[10.0; 5]), (false, false));
    }

    #[test]
    fn test_zero_cross() {
        let hist = [-1.0, -0.5, 0.3, 0.4];
        assert_eq!(zero_cross_at(&hist, 3), Some(Cross::Golden));
        assert_eq!(zero_cross_at(&hist, 4), None);
        assert_eq!(zero_cross_at(&[0.2, -0.1], 2), Some(Cross::Death));
        assert_eq!(zero_cross_at(&[0.2], 1), None);
    }

    #[test]
    fn test_momentum_gate() {
        let mut hist = vec![1.0; 20];
        hist.push(1.3);
        assert!(momentum_ok(&hist, 1.2, 20));
        *hist.last_mut().unwrap() = 1.1;
        assert!(!momentum_ok(&hist, 1.2, 20));
        assert!(!momentum_ok(&[1.0, 2.0], 1.2, 20));
    }

    #[test]
    fn test_two_bars() {
        assert!(two_bars_same_sign(&[-1.0, 0.2, 0.3], true));
        assert!(!two_bars_same_sign(&[0.2, -0.3], false));
        assert!(two_bars_same_sign(&[-0.2, -0.3], false));
    }
}
