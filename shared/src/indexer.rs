use std::sync::atomic::{AtomicBool, Ordering};

/// A fixed set of slots that threads can claim without taking a lock.
///
/// Claiming scans from the front, so low indices are reused first.
pub struct Indexer {
    slots: Box<[AtomicBool]>,
}

impl Indexer {
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = std::iter::repeat_with(|| AtomicBool::new(false))
            .take(capacity)
            .collect();

        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn claim(&self) -> Option<usize> {
        for (i, slot) in self.slots.iter().enumerate() {
            match slot.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed) {
                Err(_) => {
                    // no matter, just try the next index
                    continue;
                }
                Ok(_) => {
                    return Some(i);
                }
            }
        }

        None
    }

    pub fn release(&self, index: usize) {
        let was_claimed = self.slots[index].swap(false, Ordering::Release);
        debug_assert!(was_claimed, "slot {index} released twice");
    }

    pub fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.load(Ordering::Relaxed))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn claims_until_full_then_reuses_released_slots() {
        let indexer = Indexer::with_capacity(3);

        assert_eq!(indexer.claim(), Some(0));
        assert_eq!(indexer.claim(), Some(1));
        assert_eq!(indexer.claim(), Some(2));
        assert_eq!(indexer.claim(), None);
        assert_eq!(indexer.in_use(), 3);

        indexer.release(1);
        assert_eq!(indexer.in_use(), 2);
        assert_eq!(indexer.claim(), Some(1));
    }

    #[test]
    fn zero_capacity_never_claims() {
        let indexer = Indexer::with_capacity(0);
        assert_eq!(indexer.claim(), None);
    }

    #[test]
    fn concurrent_claims_are_unique() {
        let indexer = Arc::new(Indexer::with_capacity(64));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let indexer = Arc::clone(&indexer);
                std::thread::spawn(move || {
                    (0..8).filter_map(|_| indexer.claim()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut claimed: Vec<usize> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        claimed.sort_unstable();

        assert_eq!(claimed, (0..64).collect::<Vec<_>>());
        assert_eq!(indexer.claim(), None);
    }
}
