use rand::Rng;
use rand::seq::SliceRandom;

use crate::controls::Location;

/// One cycle's traversal of every candidate relay, in shuffled order.
///
/// Orders are never edited in place: when the runner reaches the end it
/// builds a new one from the then-current candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitationOrder {
    locations: Vec<Location>,
}

impl VisitationOrder {
    pub fn generate(candidates: Vec<Location>) -> Self {
        Self::generate_with(candidates, &mut rand::rng())
    }

    /// Fisher-Yates shuffle driven by `rng`.
    pub fn generate_with<R: Rng + ?Sized>(mut candidates: Vec<Location>, rng: &mut R) -> Self {
        candidates.shuffle(rng);
        Self {
            locations: candidates,
        }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Location> {
        self.locations.get(index)
    }

    pub fn as_slice(&self) -> &[Location] {
        &self.locations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn relays(count: usize) -> Vec<Location> {
        (0..count)
            .map(|index| Location::new(format!("wss://relay-{index}.example")))
            .collect()
    }

    #[test]
    fn generated_order_is_a_permutation() {
        let candidates = relays(16);
        let mut rng = StdRng::seed_from_u64(7);
        let order = VisitationOrder::generate_with(candidates.clone(), &mut rng);

        assert_eq!(order.len(), candidates.len());
        let mut sorted = order.as_slice().to_vec();
        sorted.sort();
        let mut expected = candidates;
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn empty_candidates_give_empty_order() {
        let order = VisitationOrder::generate(Vec::new());
        assert!(order.is_empty());
        assert_eq!(order.get(0), None);
    }

    #[test]
    fn single_candidate_is_kept() {
        let order = VisitationOrder::generate(relays(1));
        assert_eq!(order.as_slice(), relays(1).as_slice());
    }

    #[test]
    fn every_position_is_reachable() {
        // Each relay should land first at least once over many shuffles.
        let candidates = relays(4);
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen_first = std::collections::HashSet::new();
        for _ in 0..200 {
            let order = VisitationOrder::generate_with(candidates.clone(), &mut rng);
            if let Some(first) = order.get(0) {
                seen_first.insert(first.clone());
            }
        }
        assert_eq!(seen_first.len(), candidates.len());
    }
}
