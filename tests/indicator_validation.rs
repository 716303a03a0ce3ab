//! Indicator validation against direct reference formulas
//!
//! Run with: cargo test --test indicator_validation
//!
//! Each vectorized indicator is checked bar by bar against a naive
//! implementation of its textbook definition on a deterministic random walk.

use rolling_backtest::filters::ButterworthFilter;
use rolling_backtest::*;

/// Tolerance for floating point comparison
const EPSILON: f64 = 1e-9;

/// Recursive filters accumulate rounding over hundreds of bars
const EPSILON_RELAXED: f64 = 1e-6;

struct Ohlcv {
    highs: Vec<f64>,
    lows: Vec<f64>,
    closes: Vec<f64>,
    volumes: Vec<f64>,
}

/// Random walk with a 1-3% range per bar and volume between 500 and 1500
fn fixture(n: usize) -> Ohlcv {
    let mut state = 0x5eed_u64;
    let mut uniform = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (state >> 11) as f64 / (1u64 << 53) as f64
    };

    let mut close = 100.0;
    let mut data = Ohlcv { highs: vec![], lows: vec![], closes: vec![], volumes: vec![] };
    for _ in 0..n {
        close *= 1.0 + (uniform() - 0.5) * 0.04;
        let range = close * (0.01 + uniform() * 0.02);
        let low = close - range * uniform();
        data.highs.push(low + range);
        data.lows.push(low);
        data.closes.push(close);
        data.volumes.push(500.0 + 1000.0 * uniform());
    }
    data
}

fn compare_vectors(name: &str, expected: &[Option<f64>], actual: &[f64], epsilon: f64) {
    assert_eq!(
        expected.len(),
        actual.len(),
        "{}: Length mismatch: expected {}, got {}",
        name,
        expected.len(),
        actual.len()
    );

    let mut max_diff = 0.0f64;
    let mut diff_count = 0;
    let mut first_diff_idx = None;

    for (i, (exp, act)) in expected.iter().zip(actual.iter()).enumerate() {
        let mismatch = match exp {
            None => !act.is_nan(),
            Some(_) if act.is_nan() => true,
            Some(e) => {
                let diff = (e - act).abs();
                max_diff = max_diff.max(diff);
                diff > epsilon
            }
        };
        if mismatch {
            first_diff_idx.get_or_insert(i);
            diff_count += 1;
        }
    }

    if let Some(idx) = first_diff_idx {
        panic!(
            "{}: {} differences found (max diff: {:.2e}). First at index {}: expected {:?}, got {}",
            name, diff_count, max_diff, idx, expected[idx], actual[idx]
        );
    }
}

fn naive_window<F: Fn(&[f64]) -> f64>(values: &[f64], period: usize, f: F) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| if i + 1 >= period { Some(f(&values[i + 1 - period..=i])) } else { None })
        .collect()
}

fn naive_true_range(d: &Ohlcv) -> Vec<Option<f64>> {
    (0..d.closes.len())
        .map(|i| {
            if i == 0 {
                return None;
            }
            let prev = d.closes[i - 1];
            Some((d.highs[i] - d.lows[i]).max((d.highs[i] - prev).abs()).max((d.lows[i] - prev).abs()))
        })
        .collect()
}

// ============== Moving Average Tests ==============

#[test]
fn test_sma_vs_reference() {
    let d = fixture(300);
    for period in [3, 10, 30] {
        let expected = naive_window(&d.closes, period, |w| w.iter().sum::<f64>() / w.len() as f64);
        compare_vectors(&format!("sma_{period}"), &expected, &sma(&d.closes, period), EPSILON);
    }
}

#[test]
fn test_ema_vs_reference() {
    let d = fixture(300);
    let period = 12;
    let k = 2.0 / (period as f64 + 1.0);

    let mut expected = vec![None; d.closes.len()];
    let mut prev = d.closes[..period].iter().sum::<f64>() / period as f64;
    expected[period - 1] = Some(prev);
    for i in period..d.closes.len() {
        prev = d.closes[i] * k + prev * (1.0 - k);
        expected[i] = Some(prev);
    }

    compare_vectors("ema_12", &expected, &ema(&d.closes, period), EPSILON_RELAXED);
}

// ============== Volatility Tests ==============

#[test]
fn test_true_range_vs_reference() {
    let d = fixture(200);
    compare_vectors("trange", &naive_true_range(&d), &true_range(&d.highs, &d.lows, &d.closes), EPSILON);
}

#[test]
fn test_atr_vs_reference() {
    let d = fixture(300);
    let period = 14;
    let tr = naive_true_range(&d);

    // Wilder: seed with the mean of the first `period` true ranges (bars 1..=period)
    let mut expected = vec![None; d.closes.len()];
    let mut prev = (1..=period).map(|i| tr[i].unwrap_or(0.0)).sum::<f64>() / period as f64;
    expected[period] = Some(prev);
    for i in period + 1..d.closes.len() {
        prev = (prev * (period as f64 - 1.0) + tr[i].unwrap_or(0.0)) / period as f64;
        expected[i] = Some(prev);
    }

    compare_vectors("atr_14", &expected, &atr(&d.highs, &d.lows, &d.closes, period), EPSILON_RELAXED);
}

#[test]
fn test_std_dev_vs_reference() {
    let d = fixture(200);
    let expected = naive_window(&d.closes, 20, |w| {
        let m = w.iter().sum::<f64>() / w.len() as f64;
        (w.iter().map(|x| (x - m).powi(2)).sum::<f64>() / w.len() as f64).sqrt()
    });
    compare_vectors("stddev_20", &expected, &std_dev(&d.closes, 20), EPSILON);
}

// ============== Volume Tests ==============

#[test]
fn test_rolling_vwap_vs_reference() {
    let d = fixture(200);
    let period = 7;
    let expected: Vec<Option<f64>> = (0..d.closes.len())
        .map(|i| {
            if i + 1 < period {
                return None;
            }
            let window = i + 1 - period..=i;
            let tpv: f64 = window.clone().map(|j| (d.highs[j] + d.lows[j] + d.closes[j]) / 3.0 * d.volumes[j]).sum();
            let vol: f64 = window.map(|j| d.volumes[j]).sum();
            Some(tpv / vol)
        })
        .collect();

    compare_vectors(
        "vwap_7",
        &expected,
        &rolling_vwap(&d.highs, &d.lows, &d.closes, &d.volumes, period),
        EPSILON,
    );
}

#[test]
fn test_close_position_bounds() {
    let d = fixture(200);
    for (i, p) in close_position(&d.highs, &d.lows, &d.closes).iter().enumerate() {
        assert!((0.0..=1.0).contains(p), "close_position[{i}] = {p}");
    }
}

// ============== Momentum Tests ==============

#[test]
fn test_adx_bounds() {
    let d = fixture(300);
    let values = adx(&d.highs, &d.lows, &d.closes, 14);
    let valid: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    assert!(!valid.is_empty());
    assert!(valid.iter().all(|v| (0.0..=100.0).contains(v)));
    assert!(values[..14].iter().all(|v| v.is_nan()));
}

// ============== Filter Tests ==============

#[test]
fn test_butterworth_coefficients_vs_closed_form() {
    // Second-order bilinear-transform design: K = tan(pi * wn / 2)
    for (cutoff, expected_b0, expected_a1, expected_a2) in [
        (0.15, 0.041_253_537_241_720_3, -1.348_967_745_252_794_4, 0.513_981_894_219_675_7),
        (0.05, 0.005_542_717_210_280_682, -1.778_631_777_824_584_8, 0.800_802_646_665_707_6),
    ] {
        let (b, a) = butter_lowpass(2, cutoff).unwrap();
        compare_vectors(
            &format!("butter_b_{cutoff}"),
            &[Some(expected_b0), Some(2.0 * expected_b0), Some(expected_b0)],
            &b,
            1e-12,
        );
        compare_vectors(
            &format!("butter_a_{cutoff}"),
            &[Some(1.0), Some(expected_a1), Some(expected_a2)],
            &a,
            1e-12,
        );
    }
}

#[test]
fn test_butterworth_stream_vs_direct_form() {
    let d = fixture(250);
    let (order, cutoff, lookback) = (2, 0.15, 50);
    let filter = ButterworthFilter::new(order, cutoff, lookback).unwrap();
    let (b, a) = filter.coefficients();
    let (b, a) = (b.to_vec(), a.to_vec());
    let zi_unit = lfilter_zi(&b, &a).unwrap();

    // Transposed direct form II started from the steady state of the lookback-th price
    let mut expected: Vec<Option<f64>> = d.closes[..lookback - 1].iter().map(|c| Some(*c)).collect();
    let x0 = d.closes[lookback - 1];
    let mut z: Vec<f64> = zi_unit.iter().map(|v| v * x0).collect();
    for &x in &d.closes[lookback - 1..] {
        let y = b[0] * x + z[0];
        z[0] = b[1] * x - a[1] * y + z[1];
        z[1] = b[2] * x - a[2] * y;
        expected.push(Some(y));
    }

    let actual = ButterworthFilter::apply(order, cutoff, lookback, &d.closes).unwrap();
    compare_vectors("butterworth_stream", &expected, &actual, EPSILON_RELAXED);
}

// ============== Regression Tests ==============

#[test]
fn test_linregress_vs_normal_equations() {
    let d = fixture(60);
    let x: Vec<f64> = (0..d.closes.len()).map(|i| i as f64).collect();
    let n = x.len() as f64;

    let (sx, sy) = (x.iter().sum::<f64>(), d.closes.iter().sum::<f64>());
    let sxy: f64 = x.iter().zip(&d.closes).map(|(a, b)| a * b).sum();
    let sxx: f64 = x.iter().map(|a| a * a).sum();
    let slope = (n * sxy - sx * sy) / (n * sxx - sx * sx);
    let intercept = (sy - slope * sx) / n;

    let fit = linregress(&x, &d.closes).unwrap();
    compare_vectors("linregress", &[Some(slope), Some(intercept)], &[fit.slope, fit.intercept], EPSILON_RELAXED);
}

#[test]
fn test_polynomial_channel_brackets_regression() {
    let d = fixture(200);
    let channel = polynomial_channel(&d.closes, 3, 2.0, 30);
    for i in 0..d.closes.len() {
        if channel.regression[i].is_nan() {
            continue;
        }
        assert!(channel.upper[i] >= channel.regression[i], "upper below regression at {i}");
        assert!(channel.lower[i] <= channel.regression[i], "lower above regression at {i}");
    }
    assert!(channel.regression[..29].iter().all(|v| v.is_nan()));
}
