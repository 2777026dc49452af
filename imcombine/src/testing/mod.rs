//! Testing utilities for imcombine.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::fmt::MakeWriter;

use crate::{Buffer2, Frame, Unit};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Shared buffer collecting formatted log lines.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with a thread-local subscriber and return its result together with
/// everything logged at debug level and above on this thread.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
    (result, logs)
}

/// Dimensionless frame with every pixel set to `value`.
pub fn constant_frame(height: usize, width: usize, value: f64) -> Frame<f64> {
    Frame::new(Buffer2::new_filled(width, height, value), Unit::Dimensionless)
}

/// Frames of gaussian-ish noise around `level`, with a few hot pixels,
/// random masks and per-pixel uncertainties. Deterministic for a given seed.
pub fn noisy_frames(
    seed: u64,
    count: usize,
    height: usize,
    width: usize,
    level: f64,
) -> Vec<Frame<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let pixels: Vec<f64> = (0..height * width)
                .map(|_| {
                    // Sum of uniforms: cheap approximately normal noise.
                    let noise: f64 = (0..4).map(|_| rng.random::<f64>() - 0.5).sum();
                    if rng.random_bool(0.01) {
                        level * 50.0
                    } else {
                        level + noise * 10.0
                    }
                })
                .collect();
            let mask: Vec<bool> = (0..height * width).map(|_| rng.random_bool(0.05)).collect();
            let unct: Vec<f64> = (0..height * width)
                .map(|_| 1.0 + rng.random::<f64>())
                .collect();

            Frame::from_parts(
                Buffer2::new(width, height, pixels),
                Some(Buffer2::new(width, height, mask)),
                Some(Buffer2::new(width, height, unct)),
                Unit::named("adu"),
            )
            .unwrap()
        })
        .collect()
}

/// Assert two float slices agree, treating NaN as equal to NaN.
pub fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        if e.is_nan() {
            assert!(a.is_nan(), "index {i}: expected NaN, got {a}");
        } else {
            assert!((a - e).abs() <= tol, "index {i}: expected {e}, got {a}");
        }
    }
}
