//! The fleet controller: slots, invariants, fire/hire decisions.
//!
//! Invariants, enforced on every mutation:
//! - a filled slot holds exactly one supplier IDURL;
//! - no IDURL occupies two slots;
//! - the customer's own IDURL never appears.
//!
//! The controller is a decision table, not an actor: connector state
//! changes and clock ticks go in, [`FleetAction`]s come out. The driver
//! turns actions into packets, finder runs and matrix updates, and feeds
//! the results back. Time is an argument, which keeps firing policy
//! testable without timers.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use garner_types::IdUrl;
use tracing::{debug, info};

use crate::connector::ConnectorState;
use crate::{FleetError, Result};

/// Fleet-wide tuning.
#[derive(Clone, Debug)]
pub struct FleetConfig {
    /// Number of slots (N of the erasure layout).
    pub desired_suppliers: usize,
    /// How long a slot may stay disconnected before it is fired.
    pub fire_timeout: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            desired_suppliers: 4,
            fire_timeout: Duration::from_secs(600),
        }
    }
}

/// Decisions the controller hands to its driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FleetAction {
    /// Send `CancelService` to a fired supplier.
    FireSupplier { slot: usize, supplier: IdUrl },
    /// Run the finder to fill a slot.
    StartFinder { slot: usize },
    /// A slot changed hands; heal every block at these positions.
    RebuildPositions { positions: Vec<u32> },
    /// The slot swap itself, for observers.
    SupplierReplaced {
        slot: usize,
        old: Option<IdUrl>,
        new: IdUrl,
    },
}

/// The ordered supplier vector of one customer.
pub struct FleetController {
    customer: IdUrl,
    config: FleetConfig,
    slots: Vec<Option<IdUrl>>,
    states: HashMap<IdUrl, ConnectorState>,
    disconnected_since: HashMap<IdUrl, Instant>,
    searching: HashSet<usize>,
}

impl FleetController {
    /// Create a fleet with every slot empty.
    pub fn new(customer: IdUrl, config: FleetConfig) -> Self {
        let slots = vec![None; config.desired_suppliers];
        Self {
            customer,
            config,
            slots,
            states: HashMap::new(),
            disconnected_since: HashMap::new(),
            searching: HashSet::new(),
        }
    }

    /// The slot vector, in position order.
    pub fn suppliers(&self) -> &[Option<IdUrl>] {
        &self.slots
    }

    /// The supplier at a slot.
    pub fn slot(&self, slot: usize) -> Result<Option<&IdUrl>> {
        self.slots
            .get(slot)
            .map(Option::as_ref)
            .ok_or(FleetError::NoSuchSlot(slot))
    }

    /// The slot a supplier occupies.
    pub fn position_of(&self, supplier: &IdUrl) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref() == Some(supplier))
    }

    /// Slots with no supplier and no finder running.
    pub fn empty_slots(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(slot, supplier)| supplier.is_none() && !self.searching.contains(slot))
            .map(|(slot, _)| slot)
            .collect()
    }

    /// Slots with a connected supplier.
    pub fn connected_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|supplier| {
                self.states.get(*supplier) == Some(&ConnectorState::Connected)
            })
            .count()
    }

    /// Validate a candidate against the fleet invariants.
    pub fn validate_candidate(&self, candidate: &IdUrl) -> Result<()> {
        if *candidate == self.customer {
            return Err(FleetError::SelfSupplier);
        }
        if self.position_of(candidate).is_some() {
            return Err(FleetError::DuplicateSupplier(candidate.to_string()));
        }
        Ok(())
    }

    /// Atomically swap a slot to a supplier that reached `Connected`.
    ///
    /// Emits the swap notification and, when the slot changed hands, a
    /// rebuild for that position.
    pub fn hire(&mut self, slot: usize, supplier: IdUrl) -> Result<Vec<FleetAction>> {
        if slot >= self.slots.len() {
            return Err(FleetError::NoSuchSlot(slot));
        }
        self.validate_candidate(&supplier)?;

        let old = self.slots[slot].take();
        if let Some(old_supplier) = &old {
            self.states.remove(old_supplier);
            self.disconnected_since.remove(old_supplier);
        }
        self.slots[slot] = Some(supplier.clone());
        self.states.insert(supplier.clone(), ConnectorState::Connected);
        self.searching.remove(&slot);

        info!(slot, supplier = %supplier, "slot hired");
        let mut actions = vec![FleetAction::SupplierReplaced {
            slot,
            old: old.clone(),
            new: supplier,
        }];
        if old.is_some() {
            actions.push(FleetAction::RebuildPositions {
                positions: vec![slot as u32],
            });
        }
        Ok(actions)
    }

    /// Manual assignment: same invariants, caller handshook already.
    pub fn change(&mut self, slot: usize, supplier: IdUrl) -> Result<Vec<FleetAction>> {
        self.hire(slot, supplier)
    }

    /// User-initiated fire of a slot: cancel the old supplier and search.
    pub fn replace(&mut self, slot: usize) -> Result<Vec<FleetAction>> {
        let supplier = self
            .slots
            .get(slot)
            .ok_or(FleetError::NoSuchSlot(slot))?
            .clone()
            .ok_or(FleetError::EmptySlot(slot))?;

        self.slots[slot] = None;
        self.states.remove(&supplier);
        self.disconnected_since.remove(&supplier);
        self.searching.insert(slot);

        info!(slot, supplier = %supplier, "slot fired by request");
        Ok(vec![
            FleetAction::FireSupplier {
                slot,
                supplier,
            },
            FleetAction::RebuildPositions {
                positions: vec![slot as u32],
            },
            FleetAction::StartFinder { slot },
        ])
    }

    /// Fold a connector state change into the firing clock.
    pub fn on_state_change(
        &mut self,
        supplier: &IdUrl,
        state: ConnectorState,
        now: Instant,
    ) -> Vec<FleetAction> {
        let Some(slot) = self.position_of(supplier) else {
            return Vec::new();
        };
        self.states.insert(supplier.clone(), state);
        match state {
            ConnectorState::Disconnected => {
                self.disconnected_since.entry(supplier.clone()).or_insert(now);
                Vec::new()
            }
            ConnectorState::Refused => {
                // No point waiting out the fire timeout on a refusal.
                debug!(slot, supplier = %supplier, "supplier refused, replacing");
                self.replace(slot).unwrap_or_default()
            }
            _ => {
                self.disconnected_since.remove(supplier);
                Vec::new()
            }
        }
    }

    /// Evaluate the firing policy and slot filling at `now`.
    pub fn tick(&mut self, now: Instant) -> Vec<FleetAction> {
        let mut actions = Vec::new();

        // Fire slots that stayed disconnected past the timeout.
        let overdue: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, supplier)| {
                let supplier = supplier.as_ref()?;
                let since = self.disconnected_since.get(supplier)?;
                (now.duration_since(*since) >= self.config.fire_timeout).then_some(slot)
            })
            .collect();
        for slot in overdue {
            if let Ok(mut fired) = self.replace(slot) {
                actions.append(&mut fired);
            }
        }

        // Start finders for empty, unsearched slots.
        for slot in self.empty_slots() {
            self.searching.insert(slot);
            actions.push(FleetAction::StartFinder { slot });
        }
        actions
    }

    /// The finder gave up on a slot; a later tick restarts it.
    pub fn finder_failed(&mut self, slot: usize) {
        self.searching.remove(&slot);
    }

    /// Every supplier currently occupying a slot.
    pub fn occupied(&self) -> Vec<(usize, IdUrl)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, supplier)| supplier.clone().map(|s| (slot, s)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idurl(name: &str) -> IdUrl {
        IdUrl::parse(&format!("https://id.example.net/{name}.xml")).expect("idurl")
    }

    fn fleet() -> FleetController {
        FleetController::new(
            idurl("customer"),
            FleetConfig {
                desired_suppliers: 4,
                fire_timeout: Duration::from_secs(600),
            },
        )
    }

    fn filled_fleet() -> FleetController {
        let mut f = fleet();
        for slot in 0..4 {
            f.hire(slot, idurl(&format!("s{slot}"))).expect("hire");
        }
        f
    }

    #[test]
    fn test_hire_fills_slots() {
        let f = filled_fleet();
        assert_eq!(f.connected_count(), 4);
        assert_eq!(f.position_of(&idurl("s2")), Some(2));
        assert!(f.empty_slots().is_empty());
    }

    #[test]
    fn test_no_duplicate_suppliers() {
        let mut f = filled_fleet();
        assert!(matches!(
            f.hire(3, idurl("s1")),
            Err(FleetError::DuplicateSupplier(_))
        ));
        // The failed hire must not disturb the slot.
        assert_eq!(f.slot(3).expect("slot"), Some(&idurl("s3")));
    }

    #[test]
    fn test_never_self() {
        let mut f = fleet();
        assert!(matches!(
            f.hire(0, idurl("customer")),
            Err(FleetError::SelfSupplier)
        ));
    }

    #[test]
    fn test_replace_fires_and_searches() {
        let mut f = filled_fleet();
        let actions = f.replace(2).expect("replace");
        assert_eq!(
            actions,
            vec![
                FleetAction::FireSupplier {
                    slot: 2,
                    supplier: idurl("s2"),
                },
                FleetAction::RebuildPositions {
                    positions: vec![2],
                },
                FleetAction::StartFinder { slot: 2 },
            ]
        );
        assert_eq!(f.slot(2).expect("slot"), None);
        // The searching slot is not offered again.
        assert!(f.empty_slots().is_empty());

        let actions = f.hire(2, idurl("s-new")).expect("hire");
        assert!(actions.contains(&FleetAction::SupplierReplaced {
            slot: 2,
            old: None,
            new: idurl("s-new"),
        }));
        assert_eq!(f.position_of(&idurl("s-new")), Some(2));
    }

    #[test]
    fn test_replace_empty_slot_fails() {
        let mut f = fleet();
        assert!(matches!(f.replace(0), Err(FleetError::EmptySlot(0))));
        assert!(matches!(f.replace(9), Err(FleetError::NoSuchSlot(9))));
    }

    #[test]
    fn test_hire_over_occupied_slot_triggers_rebuild() {
        let mut f = filled_fleet();
        let actions = f.change(1, idurl("s-new")).expect("change");
        assert!(actions.contains(&FleetAction::RebuildPositions {
            positions: vec![1],
        }));
        assert_eq!(f.position_of(&idurl("s1")), None);
    }

    #[test]
    fn test_fire_timeout_policy() {
        let mut f = filled_fleet();
        let t0 = Instant::now();

        f.on_state_change(&idurl("s1"), ConnectorState::Disconnected, t0);

        // Before the timeout nothing happens.
        assert!(f.tick(t0 + Duration::from_secs(599)).is_empty());

        // After the timeout the slot is fired and a finder starts.
        let actions = f.tick(t0 + Duration::from_secs(600));
        assert!(actions.contains(&FleetAction::FireSupplier {
            slot: 1,
            supplier: idurl("s1"),
        }));
        assert!(actions.contains(&FleetAction::StartFinder { slot: 1 }));
    }

    #[test]
    fn test_reconnect_clears_fire_clock() {
        let mut f = filled_fleet();
        let t0 = Instant::now();
        f.on_state_change(&idurl("s1"), ConnectorState::Disconnected, t0);
        f.on_state_change(&idurl("s1"), ConnectorState::Connected, t0 + Duration::from_secs(10));
        assert!(f.tick(t0 + Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn test_refused_supplier_replaced_immediately() {
        let mut f = filled_fleet();
        let actions =
            f.on_state_change(&idurl("s0"), ConnectorState::Refused, Instant::now());
        assert!(actions.contains(&FleetAction::StartFinder { slot: 0 }));
        assert_eq!(f.slot(0).expect("slot"), None);
    }

    #[test]
    fn test_tick_fills_empty_slots_once() {
        let mut f = fleet();
        let actions = f.tick(Instant::now());
        assert_eq!(actions.len(), 4);
        // While finders run, slots are not re-offered.
        assert!(f.tick(Instant::now()).is_empty());

        // A failed search frees the slot for the next tick.
        f.finder_failed(2);
        let actions = f.tick(Instant::now());
        assert_eq!(actions, vec![FleetAction::StartFinder { slot: 2 }]);
    }
}
