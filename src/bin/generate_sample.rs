use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use arrow::array::{Float64Array, Float64Builder, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use clap::Parser;
use parquet::arrow::ArrowWriter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Write synthetic quasar-like spectra in the stacker's Parquet layout.
#[derive(Parser, Debug)]
#[command(name = "generate-sample", version, about)]
struct Args {
    #[arg(long, default_value = "sample_spectra.parquet")]
    output: PathBuf,

    /// Number of spectra
    #[arg(long, default_value_t = 200)]
    count: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Observed-frame coverage of the fake instrument, in Angstrom.
const OBSERVED_START: f64 = 3600.0;
const OBSERVED_END: f64 = 9000.0;
const OBSERVED_STEP: f64 = 1.5;

/// Rest-frame emission lines: (centre, sigma, amplitude relative to the continuum).
const LINES: &[(f64, f64, f64)] = &[
    (1215.67, 12.0, 3.0),
    (1549.06, 15.0, 1.2),
    (1908.73, 18.0, 0.6),
    (2798.75, 25.0, 0.8),
];

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Box-Muller transform on top of the uniform generator.
fn gauss(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1e-15);
    let u2: f64 = rng.random();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z
}

struct Sample {
    wavelength: Vec<f64>,
    flux: Vec<f64>,
    ivar: Vec<f64>,
}

/// One spectrum moved to its rest frame: a power-law continuum with emission
/// lines, scaled by a random luminosity, plus gaussian noise.
fn generate_spectrum(z: f64, scale: f64, snr: f64, rng: &mut StdRng) -> Sample {
    let n = ((OBSERVED_END - OBSERVED_START) / OBSERVED_STEP) as usize + 1;
    let wavelength: Vec<f64> = (0..n)
        .map(|i| (OBSERVED_START + i as f64 * OBSERVED_STEP) / (1.0 + z))
        .collect();

    let sigma = scale / snr;
    let mut flux = Vec::with_capacity(n);
    let mut ivar = Vec::with_capacity(n);
    for &l in &wavelength {
        let continuum = (l / 1450.0).powf(-0.5);
        let lines: f64 = LINES
            .iter()
            .map(|&(mu, width, amp)| gaussian(l, mu, width, amp))
            .sum();
        flux.push(scale * continuum * (1.0 + lines) + gauss(rng, 0.0, sigma));
        // a few bad pixels, as a pipeline mask would flag them
        ivar.push(if rng.random_bool(0.01) { 0.0 } else { 1.0 / (sigma * sigma) });
    }
    Sample {
        wavelength,
        flux,
        ivar,
    }
}

fn list_array(rows: &[Vec<f64>]) -> arrow::array::ListArray {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        builder.values().append_slice(row);
        builder.append(true);
    }
    builder.finish()
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut ids = Vec::with_capacity(args.count);
    let mut redshifts = Vec::with_capacity(args.count);
    let mut snrs = Vec::with_capacity(args.count);
    let mut wavelengths = Vec::with_capacity(args.count);
    let mut fluxes = Vec::with_capacity(args.count);
    let mut ivars = Vec::with_capacity(args.count);

    for i in 0..args.count {
        let z = rng.random_range(1.8..3.2);
        let scale = 10f64.powf(rng.random_range(-0.5..0.5));
        let snr = rng.random_range(3.0..30.0);
        let sample = generate_spectrum(z, scale, snr, &mut rng);

        ids.push(format!("qso-{i:05}"));
        redshifts.push(z);
        snrs.push(snr);
        wavelengths.push(sample.wavelength);
        fluxes.push(sample.flux);
        ivars.push(sample.ivar);
    }

    let item = || Arc::new(Field::new("item", DataType::Float64, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("specid", DataType::Utf8, false),
        Field::new("wavelength", DataType::List(item()), false),
        Field::new("flux", DataType::List(item()), false),
        Field::new("ivar", DataType::List(item()), false),
        Field::new("z", DataType::Float64, false),
        Field::new("snr", DataType::Float64, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(list_array(&wavelengths)),
            Arc::new(list_array(&fluxes)),
            Arc::new(list_array(&ivars)),
            Arc::new(Float64Array::from(redshifts)),
            Arc::new(Float64Array::from(snrs)),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("closing parquet writer")?;

    println!(
        "Wrote {} spectra to {} (rest frame, z between 1.8 and 3.2)",
        args.count,
        args.output.display()
    );
    Ok(())
}
