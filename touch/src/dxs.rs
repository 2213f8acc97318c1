//! Detection exclusion: at most one key per exclusion group may hold a
//! detection at a time.
//!
//! A key claims its groups by becoming `locked` on its first confirming poll
//! in PreDetect and keeps the claim until it is idle again. A candidate that
//! finds one of its groups already claimed is pushed back and retries on the
//! next poll.

use log::trace;

use crate::key::{Key, Setting};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Exclusion {
    /// The key now holds its exclusion groups
    Accepted,
    /// Another key holds one of the groups
    Vetoed { by: usize },
}

/// Find a key other than `index` holding any exclusion group in `mask`
pub fn holder(keys: &[Key<'_>], index: usize, mask: u8) -> Option<usize> {
    keys.iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .find(|(_, other)| other.config.exclusion_mask & mask != 0 && other.locked())
        .map(|(i, _)| i)
}

/// Try to claim the exclusion groups of `keys[index]`
pub(crate) fn arbitrate(keys: &mut [Key<'_>], index: usize) -> Exclusion {
    let mask = keys[index].config.exclusion_mask;
    if let Some(by) = holder(keys, index, mask) {
        trace!("key {}: vetoed by key {}", index, by);
        return Exclusion::Vetoed { by };
    }
    keys[index].setting.insert(Setting::LOCKED);
    Exclusion::Accepted
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::config::KeyConfig;

    static GROUP1: KeyConfig = KeyConfig::key(0).exclusion(0b01);
    static GROUP12: KeyConfig = KeyConfig::key(1).exclusion(0b11);
    static GROUP2: KeyConfig = KeyConfig::key(2).exclusion(0b10);
    static UNGROUPED: KeyConfig = KeyConfig::key(3);

    fn registry() -> [Key<'static>; 4] {
        [
            Key::new(0, &GROUP1),
            Key::new(1, &GROUP12),
            Key::new(2, &GROUP2),
            Key::new(3, &UNGROUPED),
        ]
    }

    #[test]
    fn test_first_claim_is_accepted() {
        let mut keys = registry();
        assert_eq!(arbitrate(&mut keys, 0), Exclusion::Accepted);
        assert!(keys[0].locked());
    }

    #[test]
    fn test_shared_group_is_vetoed() {
        let mut keys = registry();
        assert_eq!(arbitrate(&mut keys, 0), Exclusion::Accepted);
        assert_eq!(arbitrate(&mut keys, 1), Exclusion::Vetoed { by: 0 });
        assert!(!keys[1].locked());

        // Key 2 only shares group 2 with key 1, which never got the lock
        assert_eq!(arbitrate(&mut keys, 2), Exclusion::Accepted);
    }

    #[test]
    fn test_ungrouped_keys_never_conflict() {
        let mut keys = registry();
        for i in 0..3 {
            keys[i].setting.insert(Setting::LOCKED);
        }
        assert_eq!(arbitrate(&mut keys, 3), Exclusion::Accepted);
    }

    #[test]
    fn test_own_lock_is_not_a_conflict() {
        let mut keys = registry();
        keys[0].setting.insert(Setting::LOCKED);
        assert_eq!(holder(&keys, 0, 0b01), None);
        assert_eq!(holder(&keys, 1, 0b01), Some(0));
    }
}
