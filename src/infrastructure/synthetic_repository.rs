// Synthetic six-axis trace generator, used when no database is reachable
use crate::application::telemetry_repository::TelemetryRepository;
use crate::domain::channels::{
    AxisId, SignalRole, A_ACT, B_ACT, CART_VEL_ACT, C_ACT, X_ACT, Y_ACT, Z_ACT,
};
use crate::domain::telemetry::{SampleMeta, TelemetryTable};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

const DEFAULT_SAMPLES: usize = 1000;
const TRACE_SECONDS: f64 = 100.0;
const ANOMALY_RATE: f64 = 0.05;
/// Joint limits in degrees for axes 1 to 6.
const JOINT_RANGES: [(f64, f64); 6] = [
    (-170.0, 170.0),
    (-190.0, 45.0),
    (-120.0, 156.0),
    (-185.0, 185.0),
    (-120.0, 120.0),
    (-350.0, 350.0),
];
const MOTION_TYPES: [(&str, f64); 3] = [("LIN", 0.5), ("PTP", 0.3), ("CIRC", 0.2)];

#[derive(Debug, Clone)]
pub struct SyntheticRepository {
    seed: u64,
    robots: u32,
}

impl SyntheticRepository {
    pub fn new(seed: u64, robots: u32) -> Self {
        Self {
            seed,
            robots: robots.max(1),
        }
    }

    pub fn generate(&self, samples: usize) -> Result<TelemetryTable> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut trace = Generator {
            rng: &mut rng,
            n: samples,
        };

        let mut zeit: Vec<f64> = (0..samples)
            .map(|i| {
                let step = if samples > 1 {
                    TRACE_SECONDS / (samples - 1) as f64
                } else {
                    0.0
                };
                i as f64 * step
            })
            .collect();
        let jitter = trace.noise(0.001)?;
        for (t, j) in zeit.iter_mut().zip(jitter) {
            *t += j;
        }
        zeit.sort_by(f64::total_cmp);

        let meta = (0..samples).map(|_| trace.meta(self.robots)).collect();
        let mut table = TelemetryTable::new(zeit.clone(), meta)?;
        let t = &zeit;

        let wave = |f: fn(f64) -> f64, k: f64| -> Vec<f64> { t.iter().map(|&t| f(t * k)).collect() };
        let add = |a: Vec<f64>, b: Vec<f64>| -> Vec<f64> { a.iter().zip(&b).map(|(x, y)| x + y).collect() };
        let affine = |offset: f64, scale: f64, v: Vec<f64>| -> Vec<f64> { v.iter().map(|x| offset + scale * x).collect() };

        let cartesian = [
            (X_ACT, add(affine(500.0, 100.0, wave(f64::sin, 0.1)), affine(0.0, 50.0, wave(f64::cos, 0.05))), 2.0),
            (Y_ACT, add(affine(200.0, 80.0, wave(f64::cos, 0.08)), affine(0.0, 30.0, wave(f64::sin, 0.12))), 1.5),
            (Z_ACT, add(affine(100.0, 40.0, wave(f64::sin, 0.06)), affine(0.0, 20.0, wave(f64::cos, 0.15))), 1.0),
            (A_ACT, affine(0.0, 10.0, wave(f64::sin, 0.03)), 2.0),
            (B_ACT, affine(90.0, 20.0, wave(f64::cos, 0.04)), 3.0),
            (C_ACT, affine(0.0, 5.0, wave(f64::sin, 0.07)), 1.5),
        ];
        for (name, base, sigma) in cartesian {
            let values = add(base, trace.noise(sigma)?);
            table.insert_channel(name, values.into_iter().map(Some).collect())?;
        }
        let speed: Vec<f64> = add(affine(50.0, 30.0, wave(f64::sin, 0.05)), trace.noise(5.0)?)
            .into_iter()
            .map(f64::abs)
            .collect();
        table.insert_channel(CART_VEL_ACT, speed.into_iter().map(Some).collect())?;

        for (i, &(lo, hi)) in JOINT_RANGES.iter().enumerate() {
            let number = i as u32 + 1;
            let axis = AxisId::new(number).context("joint numbers start at 1")?;
            for (name, values) in trace.axis(axis, t, lo, hi)? {
                table.insert_channel(name, values.into_iter().map(Some).collect())?;
            }
        }

        Ok(table)
    }
}

struct Generator<'a> {
    rng: &'a mut StdRng,
    n: usize,
}

impl Generator<'_> {
    fn noise(&mut self, sigma: f64) -> Result<Vec<f64>> {
        let normal = Normal::new(0.0, sigma).context("invalid noise level")?;
        Ok((0..self.n).map(|_| normal.sample(&mut *self.rng)).collect())
    }

    fn meta(&mut self, robots: u32) -> SampleMeta {
        let mut pick = self.rng.random::<f64>();
        let motion = MOTION_TYPES
            .iter()
            .find(|(_, p)| {
                pick -= p;
                pick < 0.0
            })
            .map_or("CIRC", |&(m, _)| m);

        SampleMeta {
            instance_id: Some(self.rng.random_range(1..=robots).to_string()),
            trace_id: Some(self.rng.random_range(1..=20u32).to_string()),
            motion_type: Some(motion.to_string()),
            point_name: Some(format!("P{:03}", self.rng.random_range(1..=100u32))),
        }
    }

    /// Joint angle, set-point/actual pairs, collected errors, temperature and current of one axis.
    fn axis(&mut self, axis: AxisId, t: &[f64], lo: f64, hi: f64) -> Result<Vec<(String, Vec<f64>)>> {
        let k = axis.get() as f64;
        let center = (lo + hi) / 2.0;
        let amplitude = (hi - lo) / 6.0;

        let jitter = self.noise(1.0)?;
        let spikes = self.noise(10.0)?;
        let position: Vec<f64> = t
            .iter()
            .zip(jitter.iter().zip(&spikes))
            .map(|(&t, (j, s))| {
                let normal = center + amplitude * (t * 0.02 * k + k).sin() + j;
                if self.rng.random::<f64>() < ANOMALY_RATE { normal + s } else { normal }
            })
            .collect();

        let target_position: Vec<f64> = position.iter().zip(self.noise(0.05)?).map(|(p, e)| p + e).collect();
        let velocity = gradient(&position, t);
        let target_velocity: Vec<f64> = velocity.iter().zip(self.noise(0.5)?).map(|(v, e)| v + e).collect();
        let actual_velocity: Vec<f64> = velocity.iter().zip(self.noise(0.3)?).map(|(v, e)| v + e).collect();

        let target_torque: Vec<f64> = t
            .iter()
            .zip(self.noise(3.0)?)
            .map(|(&t, e)| e * (1.0 + 0.5 * (t * 0.01 * k).sin()))
            .collect();
        let actual_torque: Vec<f64> = target_torque.iter().zip(self.noise(0.1)?).map(|(m, e)| m + e).collect();

        let temperature: Vec<f64> = t
            .iter()
            .zip(&actual_torque)
            .zip(self.noise(2.0)?)
            .map(|((&t, m), e)| 35.0 + 2.0 * k + m.abs() * 0.5 + 25.0 + 5.0 * (t * 0.001).sin() + e)
            .collect();
        let current: Vec<f64> = actual_torque
            .iter()
            .zip(&temperature)
            .zip(self.noise(0.2)?)
            .map(|((m, temp), e)| (1.5 + m * 0.3 + (temp - 40.0) * 0.01 + e).abs())
            .collect();

        let diff = |a: &[f64], b: &[f64]| -> Vec<f64> { a.iter().zip(b).map(|(x, y)| x - y).collect() };
        let channel = |role: SignalRole| role.channel_name(axis);

        Ok(vec![
            (channel(SignalRole::PositionError), diff(&target_position, &position)),
            (channel(SignalRole::VelocityError), diff(&target_velocity, &actual_velocity)),
            (channel(SignalRole::JointAngle), position.clone()),
            (channel(SignalRole::TargetPosition), target_position),
            (channel(SignalRole::ActualPosition), position),
            (channel(SignalRole::TargetVelocity), target_velocity),
            (channel(SignalRole::ActualVelocity), actual_velocity),
            (channel(SignalRole::TargetTorque), target_torque),
            (channel(SignalRole::ActualTorque), actual_torque),
            (channel(SignalRole::MotorTemperature), temperature),
            (channel(SignalRole::Current), current),
        ])
    }
}

/// Second-order central differences inside, one-sided at the ends.
fn gradient(values: &[f64], t: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let slope = |a: usize, b: usize| {
        let dt = t[b] - t[a];
        if dt.abs() > f64::EPSILON { (values[b] - values[a]) / dt } else { 0.0 }
    };
    (0..n)
        .map(|i| match i {
            0 => slope(0, 1),
            i if i == n - 1 => slope(n - 2, n - 1),
            i => slope(i - 1, i + 1),
        })
        .collect()
}

#[async_trait]
impl TelemetryRepository for SyntheticRepository {
    fn source_name(&self) -> &str {
        "synthetic"
    }

    async fn load_table(&self, limit: Option<usize>) -> Result<TelemetryTable> {
        let samples = limit.unwrap_or(DEFAULT_SAMPLES);
        let generator = self.clone();
        let table = tokio::task::spawn_blocking(move || generator.generate(samples))
            .await
            .context("trace generator worker failed")??;
        tracing::info!(
            "Generated {} synthetic samples over {} channels",
            table.len(),
            table.channel_names().count()
        );
        Ok(table)
    }
}
