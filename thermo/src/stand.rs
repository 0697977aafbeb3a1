//! Assembles zones, sensors and safety flags from a `StandConfig`.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, Local};
use shared::{ListModel, SafetyFlag, Toggle};

use crate::{
    actuation::ActuationDriver,
    clock::Clock,
    config::{SensorConfig, StandConfig, CLASSES},
    pid::PidGains,
    registry::ZoneRegistry,
    telemetry::{ClassSensors, Sensor},
    zone::{ZoneController, ZoneEvent, ZoneParams, ZoneSettings},
    Result,
};

/// One armed safety flag per heater class, in `CLASSES` order.
pub fn class_flags() -> Vec<Arc<SafetyFlag>> {
    CLASSES
        .iter()
        .map(|class| Arc::new(SafetyFlag::new(class)))
        .collect()
}

pub struct Stand {
    pub registry: Arc<ZoneRegistry>,
    pub flags: Vec<Arc<SafetyFlag>>,
    /// Every thermocouple, grouped by the flag its limits guard
    pub sensors: Vec<ClassSensors>,
    pub events: Arc<ListModel<ZoneEvent>>,
    /// When each thermocouple reading was taken
    pub times: Arc<ListModel<DateTime<Local>>>,
    shutdown: AtomicBool,
}

fn sensor(config: &SensorConfig, is_control: bool, max_data: usize) -> Arc<Sensor> {
    let mut sensor = Sensor::new(&config.display_name, config.channel, is_control, max_data);
    sensor.offset = config.offset;
    sensor.max_temp = config.max_temp;
    Arc::new(sensor)
}

impl Stand {
    /// Zones are numbered across classes, furnaces first.
    pub fn build(
        config: &StandConfig,
        flags: Vec<Arc<SafetyFlag>>,
        driver: Arc<dyn ActuationDriver>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let events = Arc::new(ListModel::new(Some(config.max_events)));
        let max_data = config
            .classes()
            .iter()
            .map(|(_, class)| class.max_data)
            .max()
            .unwrap_or(1);
        let times = Arc::new(ListModel::new(Some(max_data)));

        let mut zones = Vec::new();
        let mut sensors = Vec::new();

        for ((_, class), flag) in config.classes().into_iter().zip(&flags) {
            let first_id = zones.len() + 1;
            let mut class_sensors = Vec::new();

            for (index, zone) in class.zones.iter().enumerate() {
                let zone_sensors: Vec<Arc<Sensor>> = zone
                    .control_sensors
                    .iter()
                    .map(|s| sensor(s, true, class.max_data))
                    .chain(zone.extra_sensors.iter().map(|s| sensor(s, false, class.max_data)))
                    .collect();

                class_sensors.extend(zone_sensors.iter().cloned());

                let settings = ZoneSettings::default();
                settings.target.set(zone.target);
                settings.ramp_rate.set(zone.ramp_rate);
                settings.gains.set(PidGains {
                    p: zone.p,
                    i: zone.i,
                    d: zone.d,
                });
                settings.max_output.set(zone.max_output);
                settings.integral_min.set(zone.integral_min);
                settings.integral_max.set(zone.integral_max);
                settings.output_bias.set(zone.output_bias);
                settings
                    .zero_integral_on_crossover
                    .set(Toggle::from(zone.zero_integral_on_crossover));
                settings.duty_clamp_min.set(zone.duty_clamp_min);
                settings.duty_clamp_max.set(zone.duty_clamp_max);

                zones.push(ZoneController::new(
                    ZoneParams {
                        id: first_id + index,
                        name: zone.display_name.clone(),
                        output_line: zone.output_line,
                        supervisor: zone.supervisor.map(|sup| first_id + sup - 1),
                        safety_range: zone.temp_safety_range,
                        cooling_range: zone.cooling_wait_range,
                    },
                    zone_sensors,
                    settings,
                    flag.clone(),
                    driver.clone(),
                    clock.clone(),
                    events.clone(),
                ));
            }

            sensors.push(ClassSensors {
                flag: flag.clone(),
                sensors: class_sensors,
            });
        }

        Ok(Self {
            registry: Arc::new(ZoneRegistry::new(zones)?),
            flags,
            sensors,
            events,
            times,
            shutdown: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn flag(&self, class: &str) -> Option<&Arc<SafetyFlag>> {
        self.flags.iter().find(|flag| flag.class() == class)
    }
}
