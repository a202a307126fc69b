use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use cachegrab::{Dataset, Sample, Trace};

/// Write a synthetic dataset of cache-probe captures.
#[derive(Parser)]
#[command(name = "generate_dataset")]
#[command(version)]
struct Args {
    /// Output dataset directory (a dataset already there is replaced)
    #[arg(short, long, default_value = "sample_dataset")]
    output: PathBuf,

    /// Number of captures
    #[arg(short = 'n', long, default_value_t = 8)]
    samples: usize,

    /// Probe rounds per capture (trace rows)
    #[arg(short, long, default_value_t = 200)]
    rows: usize,

    /// Cache sets per trace (trace columns)
    #[arg(long, default_value_t = 64)]
    sets: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next_f64() * n as f64) as usize % n.max(1)
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Probe latencies: a noisy floor everywhere, plus a few hot sets that the
/// victim touches in roughly a third of the rounds.
fn probe_trace(rng: &mut SimpleRng, rows: usize, sets: usize, hot: &[usize]) -> Result<Trace> {
    let mut data = Vec::with_capacity(rows * sets);
    for _ in 0..rows {
        let victim_ran = rng.next_f64() < 0.35;
        for set in 0..sets {
            let floor = rng.gauss(4.0, 1.5);
            let hit = if victim_ran && hot.contains(&set) {
                rng.gauss(40.0, 8.0)
            } else {
                0.0
            };
            data.push((floor + hit).clamp(0.0, 255.0) as u8);
        }
    }
    Ok(Trace::new(rows, sets, data)?)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut rng = SimpleRng::new(args.seed);

    let hot_data: Vec<usize> = (0..3).map(|_| rng.below(args.sets)).collect();
    let hot_inst: Vec<usize> = (0..2).map(|_| rng.below(args.sets)).collect();
    info!("hot data sets {hot_data:?}, hot instruction sets {hot_inst:?}");

    let mut dataset = Dataset::new();
    for i in 0..args.samples {
        let mut sample = Sample::new()
            .with_trace("L1D", probe_trace(&mut rng, args.rows, args.sets, &hot_data)?)
            .with_trace("L1I", probe_trace(&mut rng, args.rows, args.sets, &hot_inst)?);
        sample.add_extra("command", "openssl speed aes-128-cbc");
        sample.add_extra("return_code", 0);
        sample.add_extra("time_delta", 2500 + rng.below(1000) as u64);
        sample.add_extra("capture", i as u64);
        dataset.push(sample);
    }

    dataset
        .save(&args.output)
        .with_context(|| format!("saving dataset to {}", args.output.display()))?;
    println!(
        "Wrote {} samples ({} x {} per trace) to {}",
        dataset.len(),
        args.rows,
        args.sets,
        args.output.display()
    );
    Ok(())
}
