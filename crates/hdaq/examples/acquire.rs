//! Simulated acquisition loop: three channels sampled per tick, plus a
//! per-tick flag vector and calibration attributes.
//!
//! Run with `RUST_LOG=hdaq=debug cargo run --example acquire -- <base>`.

use std::time::Instant;

use hdaq::{Attribute, Container};
use tracing_subscriber::EnvFilter;

const TICKS: usize = 1_000;

fn main() -> hdaq::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let base = std::env::args().nth(1).unwrap_or_else(|| "acquire".to_string());
    let mut run = Container::create(&base)?;

    let start = Instant::now();
    for tick in 0..TICKS {
        let t = tick as f64 * 1e-3;
        let samples = [t.sin(), t.cos(), (3.0 * t).sin() * 0.5];
        run.insert(&samples, "daq/adc")?;
        run.insert(&[samples[0] > 0.0, samples[1] > 0.0], "daq/above_zero")?;
    }
    run.insert_attribute(&Attribute::new("gain", vec![1.0f32, 1.0, 0.5]), "daq/adc")?;
    run.write_attribute("daq/adc", "sample_period_ns", &[1_000_000usize])?;
    let elapsed = start.elapsed();

    let info = run.dataset_info("daq/adc")?;
    println!(
        "{}: {} units of {} x {} in {:.2?}",
        run.path().map(|p| p.display().to_string()).unwrap_or_default(),
        info.growth(),
        info.row_count(),
        info.element_type(),
        elapsed
    );
    println!("last unit: {:?}", run.read_unit("daq/adc", info.growth() - 1)?.to_f64());
    run.close()
}
