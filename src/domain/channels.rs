// Channel naming registry and per-axis channel resolution
use super::telemetry::TelemetryTable;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::num::NonZeroU32;

/// Cartesian and global channels that are not scoped to an axis.
pub const X_ACT: &str = "x_act";
pub const Y_ACT: &str = "y_act";
pub const Z_ACT: &str = "z_act";
pub const A_ACT: &str = "a_act";
pub const B_ACT: &str = "b_act";
pub const C_ACT: &str = "c_act";
pub const CART_VEL_ACT: &str = "cart_vel_act";

/// Axis number, 1-based. No upper bound is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AxisId(NonZeroU32);

impl AxisId {
    pub fn new(axis: u32) -> Option<Self> {
        NonZeroU32::new(axis).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical role of an axis-scoped channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalRole {
    TargetPosition,
    ActualPosition,
    PositionError,
    TargetVelocity,
    ActualVelocity,
    VelocityError,
    TargetTorque,
    ActualTorque,
    MotorTemperature,
    Current,
    JointAngle,
}

impl SignalRole {
    pub const ALL: [SignalRole; 11] = [
        SignalRole::TargetPosition,
        SignalRole::ActualPosition,
        SignalRole::PositionError,
        SignalRole::TargetVelocity,
        SignalRole::ActualVelocity,
        SignalRole::VelocityError,
        SignalRole::TargetTorque,
        SignalRole::ActualTorque,
        SignalRole::MotorTemperature,
        SignalRole::Current,
        SignalRole::JointAngle,
    ];

    /// Channels a complete axis recording carries.
    pub const EXPECTED: [SignalRole; 8] = [
        SignalRole::TargetPosition,
        SignalRole::ActualPosition,
        SignalRole::PositionError,
        SignalRole::TargetVelocity,
        SignalRole::ActualVelocity,
        SignalRole::VelocityError,
        SignalRole::MotorTemperature,
        SignalRole::Current,
    ];

    /// Name prefix; the axis number follows it directly.
    fn prefix(self) -> &'static str {
        match self {
            SignalRole::TargetPosition => "sollposition_",
            SignalRole::ActualPosition => "istposition_",
            SignalRole::PositionError => "positionsschleppfehler_",
            SignalRole::TargetVelocity => "sollgeschwindigkeit_",
            SignalRole::ActualVelocity => "istgeschwindigkeit_",
            SignalRole::VelocityError => "geschwindigkeitsdifferenz_",
            SignalRole::TargetTorque => "sollmoment_",
            SignalRole::ActualTorque => "istmoment_",
            SignalRole::MotorTemperature => "motortemperatur_",
            SignalRole::Current => "iststrom_",
            SignalRole::JointAngle => "axis_pos_act",
        }
    }

    pub fn channel_name(self, axis: AxisId) -> String {
        format!("{}{}", self.prefix(), axis)
    }

    /// Inverse of [`SignalRole::channel_name`].
    pub fn parse_channel(name: &str) -> Option<(SignalRole, AxisId)> {
        Self::ALL.iter().find_map(|&role| {
            let digits = name.strip_prefix(role.prefix())?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let axis = AxisId::new(digits.parse().ok()?)?;
            Some((role, axis))
        })
    }
}

/// Concrete channel names of one axis, restricted to roles present in a table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisChannelSet {
    pub axis: AxisId,
    channels: BTreeMap<SignalRole, String>,
}

impl AxisChannelSet {
    pub fn get(&self, role: SignalRole) -> Option<&str> {
        self.channels.get(&role).map(String::as_str)
    }

    pub fn contains(&self, role: SignalRole) -> bool {
        self.channels.contains_key(&role)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.values().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Expected roles with no channel in the table.
    pub fn missing(&self) -> Vec<SignalRole> {
        SignalRole::EXPECTED
            .into_iter()
            .filter(|role| !self.contains(*role))
            .collect()
    }
}

pub fn resolve(table: &TelemetryTable, axis: AxisId) -> AxisChannelSet {
    let channels = SignalRole::ALL
        .iter()
        .map(|&role| (role, role.channel_name(axis)))
        .filter(|(_, name)| table.has_channel(name))
        .collect();

    AxisChannelSet { axis, channels }
}

/// Every axis with at least one resolvable channel, ascending.
pub fn axes_present(table: &TelemetryTable) -> Vec<AxisId> {
    table
        .channel_names()
        .filter_map(SignalRole::parse_channel)
        .map(|(_, axis)| axis)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(n: u32) -> AxisId {
        AxisId::new(n).unwrap()
    }

    #[test]
    fn test_axis_zero_is_rejected() {
        assert!(AxisId::new(0).is_none());
        assert_eq!(axis(12).get(), 12);
    }

    #[test]
    fn test_missing_lists_absent_expected_roles() {
        let table = TelemetryTable::from_timestamps(vec![0.0])
            .unwrap()
            .with_channel("sollposition_1", vec![1.0])
            .unwrap()
            .with_channel("istposition_1", vec![1.0])
            .unwrap()
            .with_channel("istmoment_1", vec![1.0])
            .unwrap();

        let missing = resolve(&table, axis(1)).missing();
        assert_eq!(missing.len(), 6);
        assert!(!missing.contains(&SignalRole::TargetPosition));
        assert!(missing.contains(&SignalRole::MotorTemperature));
        // torque is not part of the expected set
        assert!(!missing.contains(&SignalRole::ActualTorque));
        assert_eq!(resolve(&table, axis(2)).missing(), SignalRole::EXPECTED.to_vec());
    }

    #[test]
    fn test_channel_names_follow_convention() {
        assert_eq!(SignalRole::TargetPosition.channel_name(axis(3)), "sollposition_3");
        assert_eq!(SignalRole::JointAngle.channel_name(axis(3)), "axis_pos_act3");
        assert_eq!(SignalRole::Current.channel_name(axis(10)), "iststrom_10");
    }

    #[test]
    fn test_parse_channel_round_trips_every_role() {
        for role in SignalRole::ALL {
            let name = role.channel_name(axis(7));
            assert_eq!(SignalRole::parse_channel(&name), Some((role, axis(7))));
        }
        assert_eq!(SignalRole::parse_channel("x_act"), None);
        assert_eq!(SignalRole::parse_channel("iststrom_"), None);
        assert_eq!(SignalRole::parse_channel("iststrom_0"), None);
        assert_eq!(SignalRole::parse_channel("iststrom_1a"), None);
    }

    #[test]
    fn test_resolve_omits_absent_roles() {
        let table = TelemetryTable::from_timestamps(vec![0.0])
            .unwrap()
            .with_channel("sollposition_2", vec![1.0])
            .unwrap()
            .with_channel("istposition_2", vec![1.0])
            .unwrap()
            .with_channel("istposition_1", vec![1.0])
            .unwrap();

        let set = resolve(&table, axis(2));
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(SignalRole::TargetPosition), Some("sollposition_2"));
        assert_eq!(set.get(SignalRole::Current), None);

        assert!(resolve(&table, axis(9)).is_empty());
    }

    #[test]
    fn test_axes_present_supports_more_than_seven_axes() {
        let table = TelemetryTable::from_timestamps(vec![0.0])
            .unwrap()
            .with_channel("iststrom_8", vec![1.0])
            .unwrap()
            .with_channel("motortemperatur_2", vec![1.0])
            .unwrap()
            .with_channel("iststrom_2", vec![1.0])
            .unwrap()
            .with_channel("x_act", vec![1.0])
            .unwrap();

        assert_eq!(axes_present(&table), vec![axis(2), axis(8)]);
    }
}
