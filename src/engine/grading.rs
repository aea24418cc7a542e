// Threshold grading of axis statistics into health and quality verdicts
//
// Every band is strict on its lower side: a value equal to a boundary falls
// into the worse category (an RMS error of exactly 0.05 is "fair").
use crate::domain::channels::AxisId;
use crate::engine::statistics::{Summary, EPSILON};
use serde::Serialize;

/// Ordered best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionGrade {
    Excellent,
    Good,
    Fair,
    NeedsImprovement,
}

impl PrecisionGrade {
    fn from_bands(rms: f64, bands: [f64; 3]) -> Self {
        if rms < bands[0] {
            PrecisionGrade::Excellent
        } else if rms < bands[1] {
            PrecisionGrade::Good
        } else if rms < bands[2] {
            PrecisionGrade::Fair
        } else {
            PrecisionGrade::NeedsImprovement
        }
    }

    /// RMS following error in degrees.
    pub fn for_position(rms: f64) -> Self {
        Self::from_bands(rms, [0.01, 0.05, 0.1])
    }

    /// RMS velocity error in degrees per second.
    pub fn for_velocity(rms: f64) -> Self {
        Self::from_bands(rms, [1.0, 5.0, 10.0])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStability {
    Stable,
    ModeratelyVariable,
    HighlyVariable,
}

impl LoadStability {
    /// `ratio` is peak over mean of absolute torque.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio < 2.0 {
            LoadStability::Stable
        } else if ratio < 5.0 {
            LoadStability::ModeratelyVariable
        } else {
            LoadStability::HighlyVariable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalHealth {
    Normal,
    Warning,
    Critical,
}

impl ThermalHealth {
    pub fn from_max(max_temperature: f64) -> Self {
        if max_temperature > 80.0 {
            ThermalHealth::Critical
        } else if max_temperature > 60.0 {
            ThermalHealth::Warning
        } else {
            ThermalHealth::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentHealth {
    Stable,
    Fluctuating,
    AbnormalSpike,
}

impl CurrentHealth {
    pub fn assess(current: &Summary) -> Self {
        if current.max > current.mean + 3.0 * current.std {
            CurrentHealth::AbnormalSpike
        } else if relative_spread(current) > 0.5 {
            CurrentHealth::Fluctuating
        } else {
            CurrentHealth::Stable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityStability {
    High,
    Moderate,
    Poor,
}

impl VelocityStability {
    pub fn from_cv(cv: f64) -> Self {
        if cv < 0.1 {
            VelocityStability::High
        } else if cv < 0.3 {
            VelocityStability::Moderate
        } else {
            VelocityStability::Poor
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Coupling {
    Strong,
    Moderate,
    Weak,
}

impl Coupling {
    pub fn from_correlation(correlation: f64) -> Self {
        let r = correlation.abs();
        if r > 0.7 {
            Coupling::Strong
        } else if r > 0.3 {
            Coupling::Moderate
        } else {
            Coupling::Weak
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthRating {
    Excellent,
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthScore {
    /// 0 (worst) to 10 (best).
    pub score: f64,
    pub rating: HealthRating,
}

impl HealthScore {
    pub fn compute(temperature: &Summary, current: &Summary) -> Self {
        let temp_score = ((80.0 - temperature.mean) / 5.0).clamp(0.0, 10.0);
        let current_score = (10.0 - relative_spread(current) * 10.0).clamp(0.0, 10.0);
        let score = (temp_score + current_score) / 2.0;
        let rating = if score < 4.0 {
            HealthRating::Poor
        } else if score < 6.0 {
            HealthRating::Fair
        } else if score < 8.0 {
            HealthRating::Good
        } else {
            HealthRating::Excellent
        };
        Self { score, rating }
    }
}

fn relative_spread(summary: &Summary) -> f64 {
    summary.std / (summary.mean.abs() + EPSILON)
}

/// Everything the grader reads for one axis. Absent inputs leave the
/// corresponding verdict empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AxisStatistics {
    pub position_error: Option<Summary>,
    pub velocity_error: Option<Summary>,
    pub torque_error: Option<Summary>,
    /// Absolute actual torque.
    pub torque_load: Option<Summary>,
    /// Peak over mean of absolute actual torque.
    pub peak_load_ratio: Option<f64>,
    pub velocity: Option<Summary>,
    pub temperature: Option<Summary>,
    /// Least-squares slope per sample.
    pub temperature_trend: Option<f64>,
    pub current: Option<Summary>,
    pub temperature_current_correlation: Option<f64>,
    pub torque_current_correlation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeReport {
    pub axis: AxisId,
    pub position_precision: Option<PrecisionGrade>,
    pub velocity_precision: Option<PrecisionGrade>,
    pub load_stability: Option<LoadStability>,
    pub thermal_health: Option<ThermalHealth>,
    pub current_health: Option<CurrentHealth>,
    pub velocity_stability: Option<VelocityStability>,
    pub temperature_current_coupling: Option<Coupling>,
    pub health: Option<HealthScore>,
}

pub fn grade_axis(axis: AxisId, stats: &AxisStatistics) -> GradeReport {
    GradeReport {
        axis,
        position_precision: stats.position_error.map(|s| PrecisionGrade::for_position(s.rms)),
        velocity_precision: stats.velocity_error.map(|s| PrecisionGrade::for_velocity(s.rms)),
        load_stability: stats.peak_load_ratio.map(LoadStability::from_ratio),
        thermal_health: stats.temperature.map(|s| ThermalHealth::from_max(s.max)),
        current_health: stats.current.as_ref().map(CurrentHealth::assess),
        velocity_stability: stats.velocity.map(|s| VelocityStability::from_cv(s.cv)),
        temperature_current_coupling: stats
            .temperature_current_correlation
            .map(Coupling::from_correlation),
        health: stats
            .temperature
            .zip(stats.current)
            .map(|(t, c)| HealthScore::compute(&t, &c)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Thermal,
    Current,
    Position,
    Velocity,
    Load,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    /// 1 (low) to 10 (urgent).
    pub priority: u8,
    pub subsystem: Subsystem,
    pub message: String,
}

impl Recommendation {
    fn new(priority: u8, subsystem: Subsystem, message: &str) -> Self {
        Self {
            priority,
            subsystem,
            message: message.to_string(),
        }
    }
}

/// Maintenance actions ordered by descending priority.
pub fn recommend_maintenance(stats: &AxisStatistics) -> Vec<Recommendation> {
    let mut out = Vec::new();

    if let Some(t) = stats.temperature {
        if t.max > 80.0 {
            out.push(Recommendation::new(10, Subsystem::Thermal, "motor temperature critical: check cooling and lubrication immediately"));
        } else if t.max > 70.0 {
            out.push(Recommendation::new(8, Subsystem::Thermal, "motor temperature high: inspect cooling fan and clean heat sink"));
        } else if t.mean > 55.0 {
            out.push(Recommendation::new(6, Subsystem::Thermal, "average operating temperature elevated: reduce duty cycle"));
        }
    }
    if stats.temperature_trend.is_some_and(|slope| slope > 0.01) {
        out.push(Recommendation::new(7, Subsystem::Thermal, "rising temperature trend: monitor cooling performance"));
    }

    if let Some(c) = stats.current {
        if relative_spread(&c) > 0.3 {
            out.push(Recommendation::new(6, Subsystem::Current, "current fluctuates strongly: check drive train and load stability"));
        }
        if c.max > c.mean + 3.0 * c.std {
            out.push(Recommendation::new(8, Subsystem::Current, "current spike detected: possible mechanical resistance or wear"));
        }
    }

    if let Some(e) = stats.position_error {
        if e.rms > 0.1 {
            out.push(Recommendation::new(7, Subsystem::Position, "position accuracy degraded: recalibrate axis control parameters"));
        }
        if e.peak_abs() > 0.5 {
            out.push(Recommendation::new(8, Subsystem::Position, "maximum position error too large: check backlash and encoder"));
        }
    }

    if stats.velocity.is_some_and(|v| v.cv > 0.3) {
        out.push(Recommendation::new(6, Subsystem::Velocity, "velocity unstable: review controller tuning"));
    }

    if stats.peak_load_ratio.is_some_and(|ratio| ratio > 5.0) {
        out.push(Recommendation::new(6, Subsystem::Load, "load varies sharply: smooth trajectory and velocity profile"));
    }

    // stable sort keeps rule order among equal priorities
    out.sort_by(|a, b| b.priority.cmp(&a.priority));
    out
}
