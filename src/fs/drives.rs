//! Mapping from logical drive numbers to physical IDE slots.

use crate::arch::x86_64::io::PortIo;
use crate::config::MAX_LOGICAL_DRIVES;
use crate::drivers::ide::IdeController;

/// Logical drive `n` is the `n`-th present slot, counting from the primary
/// master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveMap {
    slots: [Option<usize>; MAX_LOGICAL_DRIVES],
}

impl DriveMap {
    pub const fn empty() -> Self {
        Self { slots: [None; MAX_LOGICAL_DRIVES] }
    }

    /// Build from the controller's current presence state.
    pub fn build<P: PortIo>(controller: &IdeController<P>) -> Self {
        let mut map = Self::empty();
        let present = controller.slots().iter().filter(|s| s.is_present());
        for (logical, slot) in present.take(MAX_LOGICAL_DRIVES).enumerate() {
            map.slots[logical] = Some(slot.index);
            log::info!("DRIVES: {}: -> slot {}", logical, slot.index);
        }
        map
    }

    /// Physical slot of logical drive `idx`.
    pub fn physical(&self, idx: usize) -> Option<usize> {
        self.slots.get(idx).copied().flatten()
    }

    /// `(logical, slot)` pairs in logical order.
    pub fn mapped(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(logical, slot)| slot.map(|s| (logical, s)))
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}
