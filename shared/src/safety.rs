//! The per-class "safe to heat" flag.

use tracing::{error, info};

use crate::model::SignalModel;

/// Shared gate for every zone of one heater class (furnaces, humidifiers).
///
/// Any zone may declare the class unsafe. Only an operator re-arm makes it
/// safe again; nothing in the control path ever sets it back to `true`.
pub struct SafetyFlag {
    class: String,
    safe: SignalModel<bool>,
}

impl SafetyFlag {
    pub fn new(class: &str) -> Self {
        Self {
            class: class.to_owned(),
            safe: SignalModel::new(true),
        }
    }

    #[inline]
    pub fn class(&self) -> &str {
        &self.class
    }

    #[inline]
    pub fn is_safe(&self) -> bool {
        self.safe.get()
    }

    /// Clear the flag. Returns `true` only for the call that actually
    /// cleared it.
    pub fn declare_unsafe(&self, reason: &str) -> bool {
        let cleared = self.safe.update(|safe| std::mem::replace(safe, false));

        if cleared {
            error!(class = %self.class, "*FAULT* declaring unsafe: {}", reason);
        }

        cleared
    }

    /// Operator re-arm.
    pub fn rearm(&self) {
        self.safe.set(true);
        info!(class = %self.class, "safety re-armed by operator");
    }

    pub fn on_change(&self, f: impl Fn(&bool) + Send + Sync + 'static) {
        self.safe.on_change(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_first_clear_reports() {
        let flag = SafetyFlag::new("furnace");

        assert!(flag.is_safe());
        assert!(flag.declare_unsafe("test"));
        assert!(!flag.declare_unsafe("test again"));
        assert!(!flag.is_safe());

        flag.rearm();
        assert!(flag.is_safe());
    }
}
