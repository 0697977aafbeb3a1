//! Two-state operator switches.

use crate::model::SignalModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Voltage,
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoltageRelative {
    Ocv,
    ZeroV,
}

/// Every switchable value an operator button can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Bool(bool),
    ControlMode(ControlMode),
    MonitorMode(MonitorMode),
    VoltageRelative(VoltageRelative),
}

impl Toggle {
    /// The other state of the same kind.
    pub fn toggled(self) -> Self {
        match self {
            Self::Bool(b) => Self::Bool(!b),
            Self::ControlMode(ControlMode::Voltage) => Self::ControlMode(ControlMode::Current),
            Self::ControlMode(ControlMode::Current) => Self::ControlMode(ControlMode::Voltage),
            Self::MonitorMode(MonitorMode::On) => Self::MonitorMode(MonitorMode::Off),
            Self::MonitorMode(MonitorMode::Off) => Self::MonitorMode(MonitorMode::On),
            Self::VoltageRelative(VoltageRelative::Ocv) => {
                Self::VoltageRelative(VoltageRelative::ZeroV)
            }
            Self::VoltageRelative(VoltageRelative::ZeroV) => {
                Self::VoltageRelative(VoltageRelative::Ocv)
            }
        }
    }

    /// Whether the switch is in its "true" position.
    pub fn is_on(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::ControlMode(mode) => *mode == ControlMode::Voltage,
            Self::MonitorMode(mode) => *mode == MonitorMode::On,
            Self::VoltageRelative(rel) => *rel == VoltageRelative::Ocv,
        }
    }
}

impl From<bool> for Toggle {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Flip the switch held by `model`, returning the new state.
pub fn toggle(model: &SignalModel<Toggle>) -> Toggle {
    model.update(|state| {
        *state = state.toggled();
        *state
    })
}
