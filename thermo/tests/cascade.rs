use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use thermo::{
    actuation::ActuationDriver,
    clock::ManualClock,
    config::StandConfig,
    safety::Fault,
    stand::{class_flags, Stand},
    zone::{CycleOutcome, ZoneController, ZoneEventKind},
};

const CONFIG: &str = r#"{
    "furnace": {
        "zones": [
            {
                "display-name": "a",
                "output-line": 1,
                "target": 200.0,
                "temp-safety-range": 50.0,
                "cooling-wait-range": 10.0,
                "ramp-rate": 10.0,
                "integral-max": 20.0,
                "integral-min": -20.0,
                "output-bias": 30.0,
                "p": 2.0,
                "i": 0.01,
                "control-sensors": [{ "display-name": "a tc", "channel": 0 }]
            },
            {
                "display-name": "b",
                "output-line": 2,
                "supervisor": 1,
                "temp-safety-range": 50.0,
                "cooling-wait-range": 10.0,
                "ramp-rate": 10.0,
                "integral-max": 5.0,
                "integral-min": -5.0,
                "p": 0.5,
                "control-sensors": [{ "display-name": "b tc", "channel": 1 }]
            }
        ]
    },
    "humidifier": {
        "zones": [
            {
                "display-name": "h",
                "output-line": 3,
                "target": 80.0,
                "temp-safety-range": 20.0,
                "cooling-wait-range": 5.0,
                "ramp-rate": 2.0,
                "integral-max": 10.0,
                "integral-min": 0.0,
                "output-bias": 15.0,
                "control-sensors": [{ "display-name": "h tc", "channel": 2 }]
            }
        ]
    }
}"#;

#[derive(Default)]
struct Lines(Mutex<BTreeMap<u16, u8>>);

impl Lines {
    fn duty(&self, line: u16) -> Option<u8> {
        self.0.lock().unwrap().get(&line).copied()
    }
}

impl ActuationDriver for Lines {
    fn write(&self, line: u16, duty: u8) {
        self.0.lock().unwrap().insert(line, duty);
    }

    fn all_off(&self) {
        self.0.lock().unwrap().values_mut().for_each(|duty| *duty = 0);
    }
}

fn stand() -> (Stand, Arc<Lines>, Arc<ManualClock>) {
    let config: StandConfig = CONFIG.parse().unwrap();
    let lines = Arc::new(Lines::default());
    let clock = Arc::new(ManualClock::new());

    let stand = Stand::build(&config, class_flags(), lines.clone(), clock.clone()).unwrap();

    (stand, lines, clock)
}

fn feed(zone: &ZoneController, temp_c: f64) {
    zone.sensors()[0].readings.append(temp_c);
}

#[test]
fn supervisee_follows_supervisor() {
    let (stand, lines, clock) = stand();
    let registry = &stand.registry;
    let (a, b) = (registry.zone(1).unwrap(), registry.zone(2).unwrap());

    feed(a, 20.0);
    feed(b, 15.0);
    registry.start(1).unwrap();
    assert!(b.is_heating());
    assert_eq!(b.settings().target.get(), Some(200.0));

    // a plant that tracks the setpoint perfectly, b trailing by 5 degrees
    let mut a_c = 20.0;
    for _ in 0..2000 {
        a.run_cycle(registry);
        b.run_cycle(registry);

        a_c = a.outputs().setpoint.get().unwrap();
        clock.advance(Duration::from_secs(1));
        feed(a, a_c);
        feed(b, a_c - 5.0);

        if a_c == 200.0 {
            break;
        }
    }
    assert_eq!(a_c, 200.0);

    a.run_cycle(registry);
    b.run_cycle(registry);

    assert_eq!(b.outputs().setpoint.get(), Some(200.0));

    let a_duty = a.outputs().unclamped_output.get().unwrap();
    let b_duty = b.outputs().output.get().unwrap();

    assert!(a_duty >= 30.0);
    assert!(b_duty >= 0.99 * a_duty - 1e-9 && b_duty <= 1.01 * a_duty + 1e-9);
    assert_eq!(lines.duty(2), Some(b_duty as u8));

    registry.stop(1).unwrap();
    assert!(!b.is_heating());
    assert_eq!(lines.duty(1), Some(0));
    assert_eq!(lines.duty(2), Some(0));
}

#[test]
fn overheat_stops_the_whole_class() {
    let (stand, lines, clock) = stand();
    let registry = &stand.registry;
    let (a, b, h) = (
        registry.zone(1).unwrap(),
        registry.zone(2).unwrap(),
        registry.zone(3).unwrap(),
    );

    feed(a, 100.0);
    feed(b, 100.0);
    feed(h, 80.0);
    registry.start(1).unwrap();
    registry.start(3).unwrap();

    a.run_cycle(registry);
    h.run_cycle(registry);
    assert_eq!(lines.duty(3), Some(15));

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        clock.advance(Duration::from_secs(1));
        feed(a, 160.0);
        outcomes.push(a.run_cycle(registry));
        h.run_cycle(registry);
    }

    assert_eq!(outcomes[4], CycleOutcome::Halted(Fault::Overheat));
    assert!(!stand.flag("furnace").unwrap().is_safe());
    assert!(stand.flag("humidifier").unwrap().is_safe());

    assert!(!a.is_heating());
    assert!(!b.is_heating());
    assert_eq!(lines.duty(1), Some(0));
    assert_eq!(lines.duty(2), Some(0));

    assert!(h.is_heating());
    assert!(lines.duty(3).unwrap() > 0);

    // no restart until re-armed
    assert!(registry.start(1).is_err());
    stand.flag("furnace").unwrap().rearm();
    registry.start(1).unwrap();

    let kinds: Vec<_> = stand
        .events
        .snapshot()
        .into_iter()
        .filter(|event| event.zone == 1)
        .map(|event| event.kind)
        .collect();

    assert_eq!(
        kinds,
        vec![
            ZoneEventKind::Started,
            ZoneEventKind::EmergencyStop(Fault::Overheat),
            ZoneEventKind::Started,
        ]
    );
}
