use std::sync::Arc;

use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

/// Seasonal index curve: rises to a peak mid-season, then senesces.
fn seasonal_curve(t: f64, base: f64, amplitude: f64) -> f64 {
    base + amplitude * (std::f64::consts::PI * t).sin()
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
}

const MEASUREMENTS: i64 = 11;

fn main() {
    let mut rng = SimpleRng::new(42);

    let cultivars = ["Enrosadira", "Polonez"];
    let shoots = [2, 3, 4, 5];
    let methods = ["Bounded", "Edges"];
    let altitudes = [30_i64, 50];
    // (index, base level, seasonal amplitude)
    let indices = [
        ("GNDVI", 0.62, 0.25),
        ("NDRE", 0.18, 0.22),
        ("OSAVI", 0.50, 0.28),
        ("MCARI2", 0.55, 0.35),
    ];

    let mut names: Vec<String> = Vec::new();
    let mut index_names: Vec<&str> = Vec::new();
    let mut alts: Vec<i64> = Vec::new();
    let mut types: Vec<&str> = Vec::new();
    let mut measurement: Vec<i64> = Vec::new();
    let mut mean_value: Vec<f64> = Vec::new();
    let mut sd_value: Vec<f64> = Vec::new();

    for cultivar in &cultivars {
        for &n in &shoots {
            for &method in &methods {
                let name = format!("{cultivar} {n} {method}");
                for &altitude in &altitudes {
                    for &(index, base, amplitude) in &indices {
                        // denser canopies sit a little higher
                        let level = base + 0.01 * n as f64;
                        let noise = 0.004 * altitude as f64 / 30.0;
                        for m in 1..=MEASUREMENTS {
                            let t = (m - 1) as f64 / (MEASUREMENTS - 1) as f64;
                            let y = seasonal_curve(t, level, amplitude) + rng.gauss(0.0, noise);

                            names.push(name.clone());
                            index_names.push(index);
                            alts.push(altitude);
                            types.push(method);
                            measurement.push(m);
                            mean_value.push(y);
                            sd_value.push(rng.gauss(0.04, 0.01).abs());
                        }
                    }
                }
            }
        }
    }

    // CSV first; the Parquet batch takes ownership of the columns
    let csv_path = "sample_measurements.csv";
    let mut csv_writer = csv::Writer::from_path(csv_path).expect("Failed to create CSV file");
    csv_writer
        .write_record([
            "Name",
            "index_name",
            "altitude_m",
            "Type",
            "measurement",
            "Mean index value",
            "SD index value",
        ])
        .expect("Failed to write CSV header");
    for i in 0..names.len() {
        csv_writer
            .write_record([
                names[i].clone(),
                index_names[i].to_string(),
                alts[i].to_string(),
                types[i].to_string(),
                measurement[i].to_string(),
                mean_value[i].to_string(),
                sd_value[i].to_string(),
            ])
            .expect("Failed to write CSV row");
    }
    csv_writer.flush().expect("Failed to flush CSV file");

    let total = names.len();
    let schema = Arc::new(Schema::new(vec![
        Field::new("Name", DataType::Utf8, false),
        Field::new("index_name", DataType::Utf8, false),
        Field::new("altitude_m", DataType::Int64, false),
        Field::new("Type", DataType::Utf8, false),
        Field::new("measurement", DataType::Int64, false),
        Field::new("Mean index value", DataType::Float64, false),
        Field::new("SD index value", DataType::Float64, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(names)),
            Arc::new(StringArray::from(index_names)),
            Arc::new(Int64Array::from(alts)),
            Arc::new(StringArray::from(types)),
            Arc::new(Int64Array::from(measurement)),
            Arc::new(Float64Array::from(mean_value)),
            Arc::new(Float64Array::from(sd_value)),
        ],
    )
    .expect("Failed to create RecordBatch");

    let parquet_path = "sample_measurements.parquet";
    let file = std::fs::File::create(parquet_path).expect("Failed to create output file");
    let mut writer = ArrowWriter::try_new(file, schema, None).expect("Failed to create writer");
    writer.write(&batch).expect("Failed to write batch");
    writer.close().expect("Failed to close writer");

    println!(
        "Wrote {} measurements ({} series x {MEASUREMENTS}) to {parquet_path} and {csv_path}",
        total,
        total as i64 / MEASUREMENTS
    );
}
