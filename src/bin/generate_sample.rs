use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

use fra_lens::ml::network::{Activation, ArtifactFile, LayerSpec};
use fra_lens::ml::DEFAULT_MODEL_FILE;

/// Resonance: (centre frequency Hz, quality factor, gain dB).
type Resonance = (f64, f64, f64);

fn resonance_db(f: f64, (f0, q, gain): Resonance) -> f64 {
    let r = f / f0;
    let denom = ((1.0 - r * r).powi(2) + (r / q).powi(2)).sqrt();
    gain * (1.0 / denom).log10() / q.log10()
}

fn generate_sweep(
    freqs: &[f64],
    resonances: &[Resonance],
    noise_level: f64,
    rng: &mut SimpleRng,
) -> Vec<f64> {
    freqs
        .iter()
        .map(|&f| {
            let base = -20.0 * (f / 1.0e3).log10().max(0.0) * 0.3;
            let shaped: f64 = resonances.iter().map(|&r| resonance_db(f, r)).sum();
            base + shaped + rng.gauss(0.0, noise_level)
        })
        .collect()
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

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }

    fn weights(&mut self, n: usize, scale: f64) -> Vec<f64> {
        (0..n).map(|_| self.gauss(0.0, scale)).collect()
    }
}

fn write_csv(path: &Path, freqs: &[f64], mags: &[f64]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).context("creating CSV")?;
    writer.write_record(["Frequency (Hz)", "Magnitude (dB)"])?;
    for (f, m) in freqs.iter().zip(mags) {
        writer.write_record([f.to_string(), m.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_xml(path: &Path, freqs: &[f64], mags: &[f64]) -> Result<()> {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<fra>\n  <sweep>\n");
    for (f, m) in freqs.iter().zip(mags) {
        writeln!(out, "    <point freq=\"{f}\" mag=\"{m}\"/>")?;
    }
    out.push_str("  </sweep>\n</fra>\n");
    std::fs::write(path, out).context("writing XML")?;
    Ok(())
}

/// Small untrained classifier with the production layer stack, for smoke
/// tests of the pipeline.
fn demo_model(input_length: usize, labels: &[&str], rng: &mut SimpleRng) -> ArtifactFile {
    let conv = |rng: &mut SimpleRng, k: usize, cin: usize, cout: usize| LayerSpec::Conv1d {
        kernel: (0..k)
            .map(|_| (0..cin).map(|_| rng.weights(cout, 0.3)).collect())
            .collect(),
        bias: vec![0.0; cout],
        activation: Activation::Relu,
    };
    let norm = |c: usize| LayerSpec::BatchNorm {
        gamma: vec![1.0; c],
        beta: vec![0.0; c],
        moving_mean: vec![0.0; c],
        moving_variance: vec![1.0; c],
        epsilon: 1e-3,
    };

    let classes = labels.len();
    let layers = vec![
        conv(rng, 11, 1, 8),
        norm(8),
        LayerSpec::MaxPool1d { size: 2 },
        conv(rng, 7, 8, 16),
        norm(16),
        LayerSpec::MaxPool1d { size: 2 },
        conv(rng, 3, 16, 32),
        LayerSpec::GlobalAveragePool1d,
        LayerSpec::Dropout { rate: 0.4 },
        LayerSpec::Dense {
            weights: (0..32).map(|_| rng.weights(classes, 0.5)).collect(),
            bias: vec![0.0; classes],
            activation: Activation::Softmax,
        },
    ];

    ArtifactFile {
        name: "fra_classifier_demo".to_string(),
        input_shape: vec![None, Some(input_length), Some(1)],
        labels: labels.iter().map(|l| l.to_string()).collect(),
        layers,
    }
}

fn main() -> Result<()> {
    let mut rng = SimpleRng::new(42);

    // Log-spaced sweep: 20 Hz → 2 MHz, 400 points.
    let n = 400;
    let freqs: Vec<f64> = (0..n)
        .map(|i| 20.0 * 10f64.powf(5.0 * i as f64 / (n - 1) as f64))
        .collect();

    let conditions: [(&str, Vec<Resonance>); 3] = [
        ("healthy", vec![(2.0e3, 8.0, 12.0), (4.5e4, 12.0, 9.0), (3.1e5, 6.0, 6.0)]),
        ("axial_displacement", vec![(2.0e3, 8.0, 12.0), (5.8e4, 10.0, 11.0), (3.6e5, 5.0, 7.0)]),
        ("winding_short", vec![(3.4e3, 5.0, 6.0), (4.5e4, 12.0, 9.0), (2.4e5, 9.0, 8.0)]),
    ];

    let out_dir = Path::new("samples");
    std::fs::create_dir_all(out_dir).context("creating samples directory")?;

    for (name, resonances) in &conditions {
        let mags = generate_sweep(&freqs, resonances, 0.15, &mut rng);
        write_csv(&out_dir.join(format!("{name}.csv")), &freqs, &mags)?;
        write_xml(&out_dir.join(format!("{name}.xml")), &freqs, &mags)?;
    }

    let labels: Vec<&str> = conditions.iter().map(|(name, _)| *name).collect();
    let model = demo_model(256, &labels, &mut rng);
    let model_dir = out_dir.join("model");
    std::fs::create_dir_all(&model_dir).context("creating model directory")?;
    let model_path = model_dir.join(DEFAULT_MODEL_FILE);
    std::fs::write(&model_path, serde_json::to_vec(&model)?).context("writing model")?;

    println!(
        "Wrote {} sweeps ({n} points each) and a demo model to {}",
        conditions.len(),
        out_dir.display()
    );
    Ok(())
}
