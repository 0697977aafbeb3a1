//! The set of zones and the supervisor links between them.

use tracing::warn;

use crate::{
    zone::{StopReason, ZoneController},
    Error, Result, ZoneId,
};

pub struct ZoneRegistry {
    zones: Vec<ZoneController>,
}

impl ZoneRegistry {
    /// Zones must be numbered `1..=n` in order. Supervisor links must stay
    /// within one safety class and must not form a cycle.
    pub fn new(zones: Vec<ZoneController>) -> Result<Self> {
        for (index, zone) in zones.iter().enumerate() {
            if zone.id() != index + 1 {
                return Err(Error::Topology(format!(
                    "zone {} listed at position {}",
                    zone.id(),
                    index + 1
                )));
            }
        }

        let registry = Self { zones };

        for zone in &registry.zones {
            registry.check_chain(zone)?;
        }

        Ok(registry)
    }

    fn check_chain(&self, zone: &ZoneController) -> Result<()> {
        let mut current = zone;

        // a chain longer than the registry must revisit a zone
        for _ in 0..self.zones.len() {
            let Some(id) = current.supervisor() else {
                return Ok(());
            };

            let supervisor = self.zone(id).ok_or_else(|| {
                Error::Topology(format!("zone {} supervised by missing zone {}", current.id(), id))
            })?;

            if supervisor.flag().class() != current.flag().class() {
                return Err(Error::Topology(format!(
                    "zone {} ({}) supervised by zone {} ({})",
                    current.id(),
                    current.flag().class(),
                    id,
                    supervisor.flag().class()
                )));
            }

            current = supervisor;
        }

        Err(Error::Topology(format!(
            "supervisor chain of zone {} loops",
            zone.id()
        )))
    }

    #[inline]
    pub fn zone(&self, id: ZoneId) -> Option<&ZoneController> {
        id.checked_sub(1).and_then(|index| self.zones.get(index))
    }

    #[inline]
    pub fn zones(&self) -> &[ZoneController] {
        &self.zones
    }

    pub fn supervisees(&self, id: ZoneId) -> impl Iterator<Item = &ZoneController> {
        self.zones
            .iter()
            .filter(move |zone| zone.supervisor() == Some(id))
    }

    /// Start `id` and every zone it supervises, handing down its target.
    /// A supervisee that refuses to start does not undo the others.
    pub fn start(&self, id: ZoneId) -> Result<()> {
        let zone = self.zone(id).ok_or(Error::UnknownZone(id))?;

        zone.start()?;

        let target = zone.settings().target.get();

        for supervisee in self.supervisees(id) {
            supervisee.settings().target.set(target);

            if let Err(e) = self.start(supervisee.id()) {
                warn!(zone = %supervisee.name(), "supervisee not started: {}", e);
            }
        }

        Ok(())
    }

    #[inline]
    pub fn stop(&self, id: ZoneId) -> Result<()> {
        self.zone(id).ok_or(Error::UnknownZone(id))?;
        self.stop_with(id, StopReason::Operator);
        Ok(())
    }

    /// Stop `id` for `reason` and everything below it.
    pub fn stop_with(&self, id: ZoneId, reason: StopReason) {
        let Some(zone) = self.zone(id) else {
            return;
        };

        zone.stop(reason);

        for supervisee in self.supervisees(id) {
            self.stop_with(supervisee.id(), StopReason::Supervisor(id));
        }
    }

    pub fn stop_all(&self) {
        for zone in &self.zones {
            zone.stop(StopReason::Operator);
        }
    }
}
