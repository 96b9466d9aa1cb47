//! Property-based tests for the causal clock
//!
//! These tests verify the laws the protocol engine relies on:
//!  - union is idempotent and never lowers a counter
//!  - union agrees on every entry but the two owners regardless of order
//!  - an operation is never both ready and already seen
//!  - recording a ready operation makes it "seen"

use flood_core::{CausalClock, SiteId};
use proptest::prelude::*;

const SITES: [&str; 4] = ["a", "b", "c", "d"];

fn site(s: &str) -> SiteId {
    SiteId::new(s).unwrap()
}

fn clock_strategy() -> impl Strategy<Value = CausalClock> {
    (
        0usize..SITES.len(),
        prop::collection::vec(0u64..6, SITES.len()),
        prop::collection::vec(any::<bool>(), SITES.len()),
    )
        .prop_map(|(owner, counters, present)| {
            let mut entries = vec![(site(SITES[owner]), counters[owner])];
            for (idx, name) in SITES.iter().enumerate() {
                if idx != owner && present[idx] {
                    entries.push((site(name), counters[idx]));
                }
            }
            CausalClock::from_entries(entries).unwrap()
        })
}

proptest! {
    #[test]
    fn union_is_idempotent(c in clock_strategy()) {
        let mut merged = c.clone();
        merged.union(&c);
        prop_assert_eq!(merged, c);
    }

    #[test]
    fn union_never_lowers(a in clock_strategy(), b in clock_strategy()) {
        let mut merged = a.clone();
        merged.union(&b);

        prop_assert_eq!(merged.owner(), a.owner());
        prop_assert_eq!(merged.local_counter(), a.local_counter());

        for name in SITES {
            let s = site(name);
            prop_assert!(merged.get(&s) >= a.get(&s));
            if &s != a.owner() {
                prop_assert!(merged.get(&s) >= b.get(&s));
            }
        }
    }

    #[test]
    fn union_agrees_off_owners(a in clock_strategy(), b in clock_strategy()) {
        let mut ab = a.clone();
        ab.union(&b);
        let mut ba = b.clone();
        ba.union(&a);

        for name in SITES {
            let s = site(name);
            if &s != a.owner() && &s != b.owner() {
                prop_assert_eq!(ab.get(&s), ba.get(&s));
            }
        }
    }

    #[test]
    fn ready_and_lower_are_exclusive(local in clock_strategy(), remote in clock_strategy()) {
        prop_assert!(!(local.is_ready(&remote) && local.is_lower(&remote)));
    }

    #[test]
    fn delivered_operation_is_lower(local in clock_strategy(), remote in clock_strategy()) {
        prop_assume!(remote.owner() != local.owner());

        if local.is_ready(&remote) {
            let mut after = local.clone();
            after.increment_from(&remote);
            prop_assert!(after.is_lower(&remote));
            prop_assert!(!after.is_ready(&remote));
            prop_assert_eq!(after.get(remote.owner()), remote.local_counter());
        }
    }
}
