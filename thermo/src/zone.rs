//! One heating zone: its operator settings, its published outputs and the
//! per-cycle control pipeline.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};

use chrono::{DateTime, Local};
use shared::{ListModel, SafetyFlag, SignalModel, Toggle, MAX_DUTY};
use tracing::{error, info, warn};

use crate::{
    actuation::ActuationDriver,
    aggregate::{self, ControlReading, DISCONNECTED_C},
    cascade::{self, DEFAULT_DUTY_CLAMP_MAX, DEFAULT_DUTY_CLAMP_MIN},
    clamp,
    clock::Clock,
    pid::{PidEngine, PidGains, PidLimits, PidTerms},
    ramp::{RampParams, SetpointRamper},
    registry::ZoneRegistry,
    safety::{Fault, SafetySupervisor, SafetyVerdict},
    telemetry::Sensor,
    Error, Result, ZoneId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Operator,
    Fault(Fault),
    /// Stopped along with this supervisor
    Supervisor(ZoneId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneEventKind {
    Started,
    /// Stopped by an operator or along with a supervisor
    Stopped(StopReason),
    EmergencyStop(Fault),
    /// The zone could not keep up with its setpoint
    UnderTemperature,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneEvent {
    pub zone: ZoneId,
    pub at: DateTime<Local>,
    pub kind: ZoneEventKind,
}

/// Fixed properties of a zone.
#[derive(Debug, Clone)]
pub struct ZoneParams {
    pub id: ZoneId,
    pub name: String,
    /// Relay channel, `None` for a zone that only monitors
    pub output_line: Option<u16>,
    pub supervisor: Option<ZoneId>,
    pub safety_range: f64,
    pub cooling_range: f64,
}

/// Operator-adjustable values, picked up at the start of each cycle.
pub struct ZoneSettings {
    pub target: SignalModel<Option<f64>>,
    /// Degrees per minute
    pub ramp_rate: SignalModel<f64>,
    pub gains: SignalModel<PidGains>,
    pub max_output: SignalModel<f64>,
    pub integral_min: SignalModel<f64>,
    pub integral_max: SignalModel<f64>,
    pub output_bias: SignalModel<f64>,
    pub output_override: SignalModel<f64>,
    pub apply_override: SignalModel<Toggle>,
    pub zero_integral_on_crossover: SignalModel<Toggle>,
    pub duty_clamp_min: SignalModel<f64>,
    pub duty_clamp_max: SignalModel<f64>,
}

impl Default for ZoneSettings {
    fn default() -> Self {
        Self {
            target: SignalModel::new(None),
            ramp_rate: SignalModel::new(1.0),
            gains: SignalModel::new(PidGains {
                p: 0.0,
                i: 0.0,
                d: 0.0,
            }),
            max_output: SignalModel::new(MAX_DUTY as f64),
            integral_min: SignalModel::new(-(MAX_DUTY as f64)),
            integral_max: SignalModel::new(MAX_DUTY as f64),
            output_bias: SignalModel::new(0.0),
            output_override: SignalModel::new(0.0),
            apply_override: SignalModel::new(Toggle::from(false)),
            zero_integral_on_crossover: SignalModel::new(Toggle::from(false)),
            duty_clamp_min: SignalModel::new(DEFAULT_DUTY_CLAMP_MIN),
            duty_clamp_max: SignalModel::new(DEFAULT_DUTY_CLAMP_MAX),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CycleSettings {
    target: Option<f64>,
    ramp_rate: f64,
    gains: PidGains,
    limits: PidLimits,
    max_output: f64,
    output_bias: f64,
    output_override: Option<f64>,
    duty_band: (f64, f64),
}

impl ZoneSettings {
    fn snapshot(&self) -> CycleSettings {
        CycleSettings {
            target: self.target.get(),
            ramp_rate: self.ramp_rate.get(),
            gains: self.gains.get(),
            limits: PidLimits {
                integral_min: self.integral_min.get(),
                integral_max: self.integral_max.get(),
                zero_on_crossover: self.zero_integral_on_crossover.get().is_on(),
            },
            max_output: self.max_output.get(),
            output_bias: self.output_bias.get(),
            output_override: self
                .apply_override
                .get()
                .is_on()
                .then(|| self.output_override.get()),
            duty_band: (self.duty_clamp_min.get(), self.duty_clamp_max.get()),
        }
    }
}

/// Everything a zone publishes for operators and other zones.
#[derive(Default)]
pub struct ZoneOutputs {
    pub heating: SignalModel<bool>,
    pub control_temperature: SignalModel<Option<f64>>,
    pub setpoint: SignalModel<Option<f64>>,
    /// Duty as applied, in percent
    pub output: SignalModel<Option<f64>>,
    /// Duty before the `[0, max_output]` clamp, what supervisees follow
    pub unclamped_output: SignalModel<Option<f64>>,
    pub terms: SignalModel<Option<PidTerms>>,
}

impl ZoneOutputs {
    fn clear(&self) {
        self.setpoint.set(None);
        self.output.set(None);
        self.unclamped_output.set(None);
        self.terms.set(None);
    }
}

/// Owned by whichever worker runs the zone's cycle.
#[derive(Debug, Default)]
struct ControlState {
    setpoint: Option<f64>,
    ramper: SetpointRamper,
    pid: PidEngine,
    safety: SafetySupervisor,
}

impl ControlState {
    fn reset(&mut self) {
        self.setpoint = None;
        self.ramper.reset();
        self.pid.reset();
        self.safety.reset();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// Not heating, or stopped while the cycle ran
    Idle,
    Driven { setpoint: f64, output: f64 },
    Halted(Fault),
}

/// Percent duty for the relay daemon.
#[inline]
pub fn duty_percent(output: f64) -> u8 {
    clamp(output, 0.0, MAX_DUTY as f64) as u8
}

pub struct ZoneController {
    params: ZoneParams,
    sensors: Vec<Arc<Sensor>>,
    settings: ZoneSettings,
    outputs: ZoneOutputs,
    state: Mutex<ControlState>,
    reset_pending: AtomicBool,
    flag: Arc<SafetyFlag>,
    driver: Arc<dyn ActuationDriver>,
    clock: Arc<dyn Clock>,
    events: Arc<ListModel<ZoneEvent>>,
}

impl ZoneController {
    pub fn new(
        params: ZoneParams,
        sensors: Vec<Arc<Sensor>>,
        settings: ZoneSettings,
        flag: Arc<SafetyFlag>,
        driver: Arc<dyn ActuationDriver>,
        clock: Arc<dyn Clock>,
        events: Arc<ListModel<ZoneEvent>>,
    ) -> Self {
        Self {
            params,
            sensors,
            settings,
            outputs: ZoneOutputs::default(),
            state: Mutex::new(ControlState::default()),
            reset_pending: AtomicBool::new(false),
            flag,
            driver,
            clock,
            events,
        }
    }

    #[inline]
    pub fn id(&self) -> ZoneId {
        self.params.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.params.name
    }

    #[inline]
    pub fn params(&self) -> &ZoneParams {
        &self.params
    }

    #[inline]
    pub fn supervisor(&self) -> Option<ZoneId> {
        self.params.supervisor
    }

    #[inline]
    pub fn sensors(&self) -> &[Arc<Sensor>] {
        &self.sensors
    }

    #[inline]
    pub fn settings(&self) -> &ZoneSettings {
        &self.settings
    }

    #[inline]
    pub fn outputs(&self) -> &ZoneOutputs {
        &self.outputs
    }

    #[inline]
    pub fn flag(&self) -> &SafetyFlag {
        &self.flag
    }

    #[inline]
    pub fn is_heating(&self) -> bool {
        self.outputs.heating.get()
    }

    /// Aggregate of the latest control thermocouple readings.
    pub fn control_reading(&self) -> ControlReading {
        aggregate::control_temperature(
            self.sensors
                .iter()
                .map(|sensor| (sensor.latest(), sensor.is_control)),
        )
    }

    /// Start heating toward the current target. Refused without a target or
    /// while the class is not armed.
    pub fn start(&self) -> Result<()> {
        let Some(target) = self.settings.target.get() else {
            return Err(Error::NoTarget(self.id()));
        };

        if !self.flag.is_safe() {
            return Err(Error::Unsafe(self.flag.class().to_owned()));
        }

        self.reset_pending.store(true, Ordering::SeqCst);
        self.outputs.setpoint.set(None);
        self.outputs.heating.set(true);

        info!(zone = %self.name(), target_c = target, "heating started");
        self.emit(ZoneEventKind::Started);

        Ok(())
    }

    /// Stop heating and zero the output line. Once this returns, no cycle
    /// that is already in flight can write a non-zero duty.
    pub fn stop(&self, reason: StopReason) {
        let was_heating = self.outputs.heating.update(|heating| {
            if let Some(line) = self.params.output_line {
                self.driver.write(line, 0);
            }
            self.outputs.clear();

            std::mem::replace(heating, false)
        });

        self.reset_pending.store(true, Ordering::SeqCst);

        if !was_heating {
            return;
        }

        match reason {
            StopReason::Fault(fault) => {
                error!(zone = %self.name(), "*FAULT* emergency stop: {}", fault)
            }
            StopReason::Operator => info!(zone = %self.name(), "heating stopped"),
            StopReason::Supervisor(id) => {
                info!(zone = %self.name(), supervisor = id, "heating stopped with supervisor")
            }
        }

        match reason {
            StopReason::Fault(fault) => {
                self.emit(ZoneEventKind::EmergencyStop(fault));

                if fault == Fault::UnderTemperature {
                    self.emit(ZoneEventKind::UnderTemperature);
                }
            }
            _ => self.emit(ZoneEventKind::Stopped(reason)),
        }
    }

    /// One control period. `registry` supplies the supervisor and receives
    /// the stop request on a fault.
    pub fn run_cycle(&self, registry: &ZoneRegistry) -> CycleOutcome {
        // # 1: Aggregate, published even while idle
        let reading = self.control_reading();
        self.outputs.control_temperature.set(reading.value());

        if !self.is_heating() {
            return CycleOutcome::Idle;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if self.reset_pending.swap(false, Ordering::SeqCst) {
            state.reset();
        }

        let settings = self.settings.snapshot();
        let now = self.clock.now();

        // # 2: Seed the setpoint
        let context = cascade::supervisor_context(registry, self);

        // only unset without a valid reading, which halts below
        let setpoint = context
            .and_then(|ctx| ctx.control_temperature)
            .or(state.setpoint)
            .or(reading.value())
            .unwrap_or(DISCONNECTED_C);

        // # 3: Interlocks
        let verdict = state.safety.evaluate(
            reading,
            setpoint,
            self.params.safety_range,
            &self.params.name,
            &self.flag,
        );

        let control_c = match (verdict, reading) {
            (SafetyVerdict::Proceed, ControlReading::Valid(control_c)) => control_c,
            (SafetyVerdict::Halt(fault), _) => return self.halt(registry, fault),
            (SafetyVerdict::Proceed, ControlReading::NoValidReading) => {
                return self.halt(registry, Fault::SensorLoss)
            }
        };

        let target = settings.target.unwrap_or(setpoint);

        // # 4: Ramp, supervisees follow their supervisor instead
        let setpoint = match context {
            Some(_) => setpoint,
            None => state.ramper.advance(
                setpoint,
                control_c,
                RampParams {
                    target,
                    rate: settings.ramp_rate,
                    cooling_range: self.params.cooling_range,
                },
                now,
            ),
        };
        state.setpoint = Some(setpoint);

        // # 5: PID and output shaping
        let terms = state
            .pid
            .compute(setpoint, control_c, target, settings.gains, settings.limits, now);

        let mut unclamped = terms.output();

        if let Some(ctx) = context {
            unclamped = cascade::combine(unclamped, ctx.duty, settings.duty_band.0, settings.duty_band.1);
        }

        unclamped += settings.output_bias;

        let mut output = clamp(unclamped, 0.0, settings.max_output);

        if let Some(forced) = settings.output_override {
            output = forced;
            unclamped = forced;
        }

        drop(state);

        // # 6: Publish and actuate, unless a stop got in first
        let applied = self.outputs.heating.with(|heating| {
            if !*heating {
                return false;
            }

            self.outputs.setpoint.set(Some(setpoint));
            self.outputs.terms.set(Some(terms));
            self.outputs.unclamped_output.set(Some(unclamped));
            self.outputs.output.set(Some(output));

            if let Some(line) = self.params.output_line {
                self.driver.write(line, duty_percent(output));
            }

            true
        });

        match applied {
            true => CycleOutcome::Driven { setpoint, output },
            false => CycleOutcome::Idle,
        }
    }

    fn halt(&self, registry: &ZoneRegistry, fault: Fault) -> CycleOutcome {
        if !fault.is_global() {
            warn!(zone = %self.name(), "{}, stopping this zone only", fault);
        }

        registry.stop_with(self.id(), StopReason::Fault(fault));

        CycleOutcome::Halted(fault)
    }

    fn emit(&self, kind: ZoneEventKind) {
        self.events.append(ZoneEvent {
            zone: self.id(),
            at: Local::now(),
            kind,
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::BTreeMap,
        sync::mpsc::{self, Receiver, Sender},
        thread,
        time::{Duration, Instant},
    };

    use crate::clock::ManualClock;

    use super::*;

    /// Keeps the last duty per line and every write in order.
    #[derive(Default)]
    pub struct RecordingDriver {
        pub writes: Mutex<Vec<(u16, u8)>>,
    }

    impl RecordingDriver {
        pub fn last(&self) -> BTreeMap<u16, u8> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .copied()
                .collect()
        }
    }

    impl ActuationDriver for RecordingDriver {
        fn write(&self, line: u16, duty: u8) {
            self.writes.lock().unwrap().push((line, duty));
        }

        fn all_off(&self) {
            let lines: Vec<u16> = self.last().into_keys().collect();
            for line in lines {
                self.write(line, 0);
            }
        }
    }

    pub struct Fixture {
        pub flag: Arc<SafetyFlag>,
        pub driver: Arc<RecordingDriver>,
        pub clock: Arc<ManualClock>,
        pub events: Arc<ListModel<ZoneEvent>>,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                flag: Arc::new(SafetyFlag::new("furnace")),
                driver: Arc::new(RecordingDriver::default()),
                clock: Arc::new(ManualClock::new()),
                events: Arc::new(ListModel::new(Some(100))),
            }
        }

        /// A zone on line `id` with one control thermocouple.
        pub fn zone(&self, id: ZoneId, supervisor: Option<ZoneId>) -> ZoneController {
            self.zone_with(id, supervisor, self.driver.clone(), self.clock.clone())
        }

        pub fn zone_with(
            &self,
            id: ZoneId,
            supervisor: Option<ZoneId>,
            driver: Arc<dyn ActuationDriver>,
            clock: Arc<dyn Clock>,
        ) -> ZoneController {
            let sensor = Arc::new(Sensor::new(&format!("z{} tc", id), id - 1, true, 100));

            ZoneController::new(
                ZoneParams {
                    id,
                    name: format!("z{}", id),
                    output_line: Some(id as u16),
                    supervisor,
                    safety_range: 30.0,
                    cooling_range: 10.0,
                },
                vec![sensor],
                ZoneSettings::default(),
                self.flag.clone(),
                driver,
                clock,
                self.events.clone(),
            )
        }

        pub fn kinds(&self) -> Vec<ZoneEventKind> {
            self.events.snapshot().into_iter().map(|e| e.kind).collect()
        }
    }

    fn single(fixture: &Fixture) -> ZoneRegistry {
        let registry = ZoneRegistry::new(vec![fixture.zone(1, None)]).unwrap();
        registry.zone(1).unwrap().settings().target.set(Some(200.0));
        registry
    }

    fn read(zone: &ZoneController, temp_c: f64) {
        zone.sensors()[0].readings.append(temp_c);
    }

    #[test]
    fn start_needs_target_and_safety() {
        let fixture = Fixture::new();
        let zone = fixture.zone(1, None);

        assert!(matches!(zone.start(), Err(Error::NoTarget(1))));

        zone.settings().target.set(Some(100.0));
        fixture.flag.declare_unsafe("test");
        assert!(matches!(zone.start(), Err(Error::Unsafe(_))));
        assert!(!zone.is_heating());

        fixture.flag.rearm();
        zone.start().unwrap();
        assert!(zone.is_heating());
        assert_eq!(fixture.kinds(), vec![ZoneEventKind::Started]);
    }

    #[test]
    fn first_cycle_holds_at_control_temperature() {
        let fixture = Fixture::new();
        let registry = single(&fixture);
        let zone = registry.zone(1).unwrap();
        zone.settings().gains.set(PidGains {
            p: 2.0,
            i: 0.0,
            d: 0.0,
        });
        zone.settings().output_bias.set(5.0);

        read(zone, 100.0);
        zone.start().unwrap();

        assert_eq!(
            zone.run_cycle(&registry),
            CycleOutcome::Driven {
                setpoint: 100.0,
                output: 5.0
            }
        );
        assert_eq!(fixture.driver.last()[&1], 5);
        assert_eq!(zone.outputs().control_temperature.get(), Some(100.0));
    }

    #[test]
    fn output_clamped_and_overridden() {
        let fixture = Fixture::new();
        let registry = single(&fixture);
        let zone = registry.zone(1).unwrap();
        zone.settings().gains.set(PidGains {
            p: 10.0,
            i: 0.0,
            d: 0.0,
        });
        zone.settings().max_output.set(60.0);

        read(zone, 100.0);
        zone.start().unwrap();
        zone.run_cycle(&registry);

        // setpoint still at 100 on the first cycle, so force an error
        read(zone, 80.0);
        fixture.clock.advance(std::time::Duration::from_secs(1));
        zone.run_cycle(&registry);

        assert_eq!(zone.outputs().output.get(), Some(60.0));
        assert!(zone.outputs().unclamped_output.get().unwrap() > 60.0);
        assert_eq!(fixture.driver.last()[&1], 60);

        zone.settings().output_override.set(12.5);
        zone.settings().apply_override.set(Toggle::from(true));
        zone.run_cycle(&registry);

        assert_eq!(zone.outputs().output.get(), Some(12.5));
        assert_eq!(zone.outputs().unclamped_output.get(), Some(12.5));
        assert_eq!(fixture.driver.last()[&1], 12);
    }

    #[test]
    fn stop_wins_over_later_cycles() {
        let fixture = Fixture::new();
        let registry = single(&fixture);
        let zone = registry.zone(1).unwrap();
        zone.settings().output_bias.set(40.0);

        read(zone, 100.0);
        zone.start().unwrap();
        zone.run_cycle(&registry);
        assert_eq!(fixture.driver.last()[&1], 40);

        zone.stop(StopReason::Operator);

        assert_eq!(zone.run_cycle(&registry), CycleOutcome::Idle);
        assert_eq!(fixture.driver.last()[&1], 0);
        assert_eq!(zone.outputs().setpoint.get(), None);
        assert_eq!(zone.outputs().output.get(), None);
        assert_eq!(
            fixture.kinds(),
            vec![
                ZoneEventKind::Started,
                ZoneEventKind::Stopped(StopReason::Operator)
            ]
        );
    }

    #[test]
    fn sensor_loss_stops_and_clears_flag() {
        let fixture = Fixture::new();
        let registry = single(&fixture);
        let zone = registry.zone(1).unwrap();

        read(zone, 0.0);
        zone.start().unwrap();

        assert_eq!(zone.run_cycle(&registry), CycleOutcome::Halted(Fault::SensorLoss));
        assert!(!zone.is_heating());
        assert!(!fixture.flag.is_safe());
        assert_eq!(fixture.driver.last()[&1], 0);
        assert!(matches!(zone.start(), Err(Error::Unsafe(_))));
        assert_eq!(
            fixture.kinds(),
            vec![
                ZoneEventKind::Started,
                ZoneEventKind::EmergencyStop(Fault::SensorLoss)
            ]
        );
    }

    #[test]
    fn under_temperature_stops_zone_only() {
        let fixture = Fixture::new();
        let registry = single(&fixture);
        let zone = registry.zone(1).unwrap();

        read(zone, 150.0);
        zone.start().unwrap();
        zone.run_cycle(&registry);

        let outcomes: Vec<_> = (0..5)
            .map(|_| {
                read(zone, 100.0);
                fixture.clock.advance(std::time::Duration::from_secs(1));
                zone.run_cycle(&registry)
            })
            .collect();

        assert!(matches!(outcomes[3], CycleOutcome::Driven { .. }));
        assert_eq!(outcomes[4], CycleOutcome::Halted(Fault::UnderTemperature));
        assert!(fixture.flag.is_safe());
        assert_eq!(
            fixture.kinds()[1..],
            [
                ZoneEventKind::EmergencyStop(Fault::UnderTemperature),
                ZoneEventKind::UnderTemperature
            ]
        );
    }

    /// Parks the first thread through `pass` until `release` is sent.
    struct Gate {
        entered: Mutex<Option<Sender<()>>>,
        release: Mutex<Receiver<()>>,
    }

    impl Gate {
        /// The gate, the entered signal and the release handle.
        fn new() -> (Self, Receiver<()>, Sender<()>) {
            let (entered_tx, entered_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();

            let gate = Self {
                entered: Mutex::new(Some(entered_tx)),
                release: Mutex::new(release_rx),
            };

            (gate, entered_rx, release_tx)
        }

        fn pass(&self) {
            let entered = self.entered.lock().unwrap().take();

            if let Some(entered) = entered {
                entered.send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
        }
    }

    /// Holds the cycle between its start and its write.
    struct GatedClock {
        base: Instant,
        gate: Gate,
    }

    impl Clock for GatedClock {
        fn now(&self) -> Instant {
            self.gate.pass();
            self.base
        }
    }

    /// Holds the first non-zero write until released.
    struct GatedDriver {
        writes: Mutex<Vec<(u16, u8)>>,
        gate: Gate,
    }

    impl ActuationDriver for GatedDriver {
        fn write(&self, line: u16, duty: u8) {
            self.writes.lock().unwrap().push((line, duty));

            if duty > 0 {
                self.gate.pass();
            }
        }

        fn all_off(&self) {}
    }

    fn started(zone: ZoneController) -> ZoneRegistry {
        let registry = ZoneRegistry::new(vec![zone]).unwrap();
        let zone = registry.zone(1).unwrap();

        zone.settings().target.set(Some(200.0));
        zone.settings().output_bias.set(40.0);
        read(zone, 100.0);
        zone.start().unwrap();

        registry
    }

    #[test]
    fn stop_mid_cycle_keeps_line_off() {
        let fixture = Fixture::new();
        let (gate, entered, release) = Gate::new();
        let clock = Arc::new(GatedClock {
            base: Instant::now(),
            gate,
        });

        let registry = started(fixture.zone_with(1, None, fixture.driver.clone(), clock));
        let zone = registry.zone(1).unwrap();

        thread::scope(|scope| {
            let cycle = scope.spawn(|| zone.run_cycle(&registry));

            entered.recv().unwrap();
            zone.stop(StopReason::Operator);
            release.send(()).unwrap();

            assert_eq!(cycle.join().unwrap(), CycleOutcome::Idle);
        });

        assert_eq!(*fixture.driver.writes.lock().unwrap(), vec![(1, 0)]);
        assert_eq!(zone.outputs().output.get(), None);
        assert_eq!(zone.outputs().setpoint.get(), None);
        assert!(!zone.is_heating());
    }

    #[test]
    fn stop_during_write_zeroes_after_it() {
        let fixture = Fixture::new();
        let (gate, entered, release) = Gate::new();
        let driver = Arc::new(GatedDriver {
            writes: Mutex::new(Vec::new()),
            gate,
        });

        let registry = started(fixture.zone_with(1, None, driver.clone(), fixture.clock.clone()));
        let zone = registry.zone(1).unwrap();

        thread::scope(|scope| {
            let cycle = scope.spawn(|| zone.run_cycle(&registry));

            entered.recv().unwrap();
            let stopper = scope.spawn(|| zone.stop(StopReason::Operator));

            // the write in flight holds the stop back
            thread::sleep(Duration::from_millis(50));
            assert!(!stopper.is_finished());

            release.send(()).unwrap();

            assert!(matches!(cycle.join().unwrap(), CycleOutcome::Driven { .. }));
            stopper.join().unwrap();
        });

        assert_eq!(*driver.writes.lock().unwrap(), vec![(1, 40), (1, 0)]);
        assert_eq!(zone.outputs().output.get(), None);
        assert!(!zone.is_heating());
    }
}
