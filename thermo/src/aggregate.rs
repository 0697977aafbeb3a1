//! Reduces a zone's thermocouples to one control temperature.

/// A reading of exactly zero means the thermocouple is disconnected
pub const DISCONNECTED_C: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlReading {
    Valid(f64),
    /// Every control thermocouple is disconnected or has never reported
    NoValidReading,
}

impl ControlReading {
    #[inline]
    pub fn value(self) -> Option<f64> {
        match self {
            Self::Valid(temp_c) => Some(temp_c),
            Self::NoValidReading => None,
        }
    }
}

/// Mean of the latest reading of every control thermocouple, ignoring
/// disconnected ones. Takes `(latest reading, is control)` per sensor.
pub fn control_temperature(readings: impl IntoIterator<Item = (Option<f64>, bool)>) -> ControlReading {
    let (sum, count) = readings
        .into_iter()
        .filter_map(|(reading, is_control)| reading.filter(|_| is_control))
        .filter(|temp_c| *temp_c != DISCONNECTED_C)
        .fold((0.0, 0_u32), |(sum, count), temp_c| (sum + temp_c, count + 1));

    match count {
        0 => ControlReading::NoValidReading,
        _ => ControlReading::Valid(sum / count as f64),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn ignores_extra_and_disconnected() {
        let reading = control_temperature([
            (Some(100.0), true),
            (Some(0.0), true),
            (Some(110.0), true),
            (Some(500.0), false),
            (None, true),
        ]);

        assert_eq!(reading, ControlReading::Valid(105.0));
    }

    #[test]
    fn nothing_valid_is_not_zero() {
        assert_eq!(control_temperature([]), ControlReading::NoValidReading);
        assert_eq!(
            control_temperature([(Some(0.0), true), (Some(0.0), true)]),
            ControlReading::NoValidReading
        );
        assert_eq!(
            control_temperature([(Some(250.0), false)]),
            ControlReading::NoValidReading
        );
    }

    proptest! {
        #[test]
        fn mean_of_nonzero_control_readings(
            readings in prop::collection::vec((prop_oneof![Just(0.0), -50.0..1200.0_f64], any::<bool>()), 0..12)
        ) {
            let valid: Vec<f64> = readings
                .iter()
                .filter(|(temp_c, is_control)| *is_control && *temp_c != 0.0)
                .map(|(temp_c, _)| *temp_c)
                .collect();

            let reading = control_temperature(readings.iter().map(|(t, c)| (Some(*t), *c)));

            match valid.is_empty() {
                true => prop_assert_eq!(reading, ControlReading::NoValidReading),
                false => {
                    let mean = valid.iter().sum::<f64>() / valid.len() as f64;
                    let ControlReading::Valid(temp_c) = reading else {
                        return Err(TestCaseError::fail("expected a valid reading"));
                    };
                    prop_assert!((temp_c - mean).abs() < 1e-9);
                }
            }
        }
    }
}
