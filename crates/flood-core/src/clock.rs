//! Causal clock - a vector clock ordered by site
//!
//! Each data message carries the sender's accumulated clock at send time. A
//! receiver delivers the message once it is the immediate successor of what it
//! has seen from the origin site and every other dependency is already known.
//!
//! ```text
//! position 0        position 1..n
//! (owner, c0)  ->   (site, c) learnt from delivered or merged remote clocks
//! ```

use crate::error::{Error, Result};
use crate::site::SiteId;
use serde::{Deserialize, Serialize};

/// One `(site, counter)` pair of a clock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockEntry {
    pub site: SiteId,
    pub counter: u64,
}

/// Vector clock whose first entry always belongs to its owner.
///
/// Sites that are not listed are implicitly at counter 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ClockRepr", into = "ClockRepr")]
pub struct CausalClock {
    entries: Vec<ClockEntry>,
}

impl CausalClock {
    /// Create a clock for `owner` at counter 0
    pub fn new(owner: SiteId) -> Self {
        Self {
            entries: vec![ClockEntry { site: owner, counter: 0 }],
        }
    }

    /// Build a clock from an ordered entry list, the first pair being the owner
    pub fn from_entries(entries: impl IntoIterator<Item = (SiteId, u64)>) -> Result<Self> {
        let mut clock: Option<CausalClock> = None;

        for (site, counter) in entries {
            match clock.as_mut() {
                None => {
                    clock = Some(Self {
                        entries: vec![ClockEntry { site, counter }],
                    });
                }
                Some(c) => {
                    if c.position(&site).is_some() {
                        return Err(Error::MalformedClock(format!("duplicate site {}", site)));
                    }
                    c.entries.push(ClockEntry { site, counter });
                }
            }
        }

        clock.ok_or_else(|| Error::MalformedClock("clock has no entries".into()))
    }

    /// The site owning this clock
    pub fn owner(&self) -> &SiteId {
        &self.entries[0].site
    }

    /// Counter of the owner's own entry
    pub fn local_counter(&self) -> u64 {
        self.entries[0].counter
    }

    /// Counter recorded for `site`, 0 when unknown
    pub fn get(&self, site: &SiteId) -> u64 {
        self.position(site)
            .map(|idx| self.entries[idx].counter)
            .unwrap_or(0)
    }

    pub fn entries(&self) -> &[ClockEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, site: &SiteId) -> Option<usize> {
        self.entries.iter().position(|e| &e.site == site)
    }

    /// Advance the owner's counter after a local operation
    pub fn increment(&mut self) {
        self.entries[0].counter += 1;
    }

    /// Record the one new fact a ready remote clock carries: the counter of its
    /// own origin site. Unknown origins are appended.
    ///
    /// The owner's entry is never touched by a remote clock.
    pub fn increment_from(&mut self, remote: &CausalClock) {
        let origin = &remote.entries[0];

        match self.position(&origin.site) {
            Some(0) => {}
            Some(idx) => self.entries[idx].counter = origin.counter,
            None => self.entries.push(origin.clone()),
        }
    }

    /// Entrywise maximum over both entry lists.
    ///
    /// Sites only known to `other` are appended in the order `other` lists them.
    /// The owner's entry is left as is.
    pub fn union(&mut self, other: &CausalClock) {
        for entry in &other.entries {
            match self.position(&entry.site) {
                Some(0) => {}
                Some(idx) => {
                    let local = &mut self.entries[idx].counter;
                    *local = (*local).max(entry.counter);
                }
                None => self.entries.push(entry.clone()),
            }
        }
    }

    /// Whether `remote` is the next operation from its origin and all of its
    /// other dependencies have been seen here.
    pub fn is_ready(&self, remote: &CausalClock) -> bool {
        let origin = &remote.entries[0];

        if origin.counter != self.get(&origin.site) + 1 {
            return false;
        }

        remote.entries[1..]
            .iter()
            .all(|e| e.counter <= self.get(&e.site))
    }

    /// Whether the operation stamped with `remote` has already been seen here
    pub fn is_lower(&self, remote: &CausalClock) -> bool {
        let origin = &remote.entries[0];
        origin.counter <= self.get(&origin.site)
    }
}

impl std::fmt::Display for CausalClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (idx, entry) in self.entries.iter().enumerate() {
            if idx > 0 {
                write!(f, ",")?;
            }
            write!(f, "({},{})", entry.site, entry.counter)?;
        }
        write!(f, "]")
    }
}

/// Wire layout: parallel site and counter arrays
#[derive(Serialize, Deserialize)]
struct ClockRepr {
    #[serde(rename = "_entries")]
    entries: Vec<SiteId>,
    #[serde(rename = "_clocks")]
    clocks: Vec<u64>,
}

impl TryFrom<ClockRepr> for CausalClock {
    type Error = Error;

    fn try_from(repr: ClockRepr) -> Result<Self> {
        if repr.entries.len() != repr.clocks.len() {
            return Err(Error::MalformedClock(format!(
                "{} entries but {} counters",
                repr.entries.len(),
                repr.clocks.len()
            )));
        }

        Self::from_entries(repr.entries.into_iter().zip(repr.clocks))
    }
}

impl From<CausalClock> for ClockRepr {
    fn from(clock: CausalClock) -> Self {
        let (entries, clocks) = clock
            .entries
            .into_iter()
            .map(|e| (e.site, e.counter))
            .unzip();

        Self { entries, clocks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(s: &str) -> SiteId {
        SiteId::new(s).unwrap()
    }

    fn clock(pairs: &[(&str, u64)]) -> CausalClock {
        CausalClock::from_entries(pairs.iter().map(|(s, c)| (site(s), *c))).unwrap()
    }

    #[test]
    fn test_new_clock_starts_at_zero() {
        let c = CausalClock::new(site("a"));
        assert_eq!(c.owner(), &site("a"));
        assert_eq!(c.local_counter(), 0);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_first_operation_from_unknown_site_is_ready() {
        let mut a = CausalClock::new(site("a"));
        a.increment();
        assert_eq!(a, clock(&[("a", 1)]));

        let mut b = CausalClock::new(site("b"));
        assert!(!b.is_lower(&a));
        assert!(b.is_ready(&a));

        b.increment_from(&a);
        assert_eq!(b, clock(&[("b", 0), ("a", 1)]));
    }

    #[test]
    fn test_gap_is_not_ready() {
        let b = clock(&[("b", 0), ("a", 1)]);
        assert!(!b.is_ready(&clock(&[("a", 3)])));
        assert!(b.is_ready(&clock(&[("a", 2)])));

        let fresh = CausalClock::new(site("b"));
        assert!(!fresh.is_ready(&clock(&[("a", 2)])));
    }

    #[test]
    fn test_unknown_dependency_blocks_readiness() {
        let b = CausalClock::new(site("b"));
        // c's first op depends on a's first op, which b has not seen
        let remote = clock(&[("c", 1), ("a", 1)]);
        assert!(!b.is_ready(&remote));

        let b = clock(&[("b", 0), ("a", 1)]);
        assert!(b.is_ready(&remote));
    }

    #[test]
    fn test_zero_dependency_on_unknown_site_is_fine() {
        let b = CausalClock::new(site("b"));
        assert!(b.is_ready(&clock(&[("c", 1), ("a", 0)])));
    }

    #[test]
    fn test_dependency_on_own_entry() {
        let b = clock(&[("b", 2)]);
        assert!(b.is_ready(&clock(&[("a", 1), ("b", 2)])));
        assert!(!b.is_ready(&clock(&[("a", 1), ("b", 3)])));
    }

    #[test]
    fn test_is_lower() {
        let b = clock(&[("b", 0), ("a", 2)]);
        assert!(b.is_lower(&clock(&[("a", 1)])));
        assert!(b.is_lower(&clock(&[("a", 2)])));
        assert!(!b.is_lower(&clock(&[("a", 3)])));
        assert!(!b.is_lower(&clock(&[("c", 1)])));
    }

    #[test]
    fn test_own_echo_is_lower() {
        let a = clock(&[("a", 2)]);
        assert!(a.is_lower(&clock(&[("a", 1)])));
        assert!(!a.is_ready(&clock(&[("a", 1)])));
    }

    #[test]
    fn test_increment_from_overwrites_origin_only() {
        let mut b = clock(&[("b", 4), ("a", 1), ("c", 2)]);
        b.increment_from(&clock(&[("a", 2), ("c", 9)]));
        assert_eq!(b, clock(&[("b", 4), ("a", 2), ("c", 2)]));
    }

    #[test]
    fn test_increment_from_never_touches_owner() {
        let mut b = clock(&[("b", 4)]);
        b.increment_from(&clock(&[("b", 9)]));
        assert_eq!(b.local_counter(), 4);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_union_takes_entrywise_max() {
        let mut x = clock(&[("x", 0), ("a", 3), ("b", 1)]);
        x.union(&clock(&[("y", 5), ("b", 4), ("a", 1), ("c", 2)]));
        assert_eq!(
            x,
            clock(&[("x", 0), ("a", 3), ("b", 4), ("y", 5), ("c", 2)])
        );
    }

    #[test]
    fn test_union_keeps_owner_counter() {
        let mut x = clock(&[("x", 1)]);
        x.union(&clock(&[("y", 2), ("x", 7)]));
        assert_eq!(x.local_counter(), 1);
        assert_eq!(x.get(&site("y")), 2);
    }

    #[test]
    fn test_clone_is_independent() {
        let original = clock(&[("a", 1), ("b", 2)]);
        let mut copy = original.clone();
        copy.increment();
        copy.increment_from(&clock(&[("c", 1)]));

        assert_eq!(original, clock(&[("a", 1), ("b", 2)]));
        assert_eq!(copy, clock(&[("a", 2), ("b", 2), ("c", 1)]));
    }

    #[test]
    fn test_wire_format() {
        let c = clock(&[("b", 0), ("a", 1)]);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"_entries": ["b", "a"], "_clocks": [0, 1]})
        );

        let decoded: CausalClock = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, c);
    }

    #[test]
    fn test_malformed_wire_clocks_rejected() {
        let mismatched = serde_json::json!({"_entries": ["a", "b"], "_clocks": [1]});
        assert!(serde_json::from_value::<CausalClock>(mismatched).is_err());

        let empty = serde_json::json!({"_entries": [], "_clocks": []});
        assert!(serde_json::from_value::<CausalClock>(empty).is_err());

        let duplicate = serde_json::json!({"_entries": ["a", "a"], "_clocks": [1, 2]});
        assert!(serde_json::from_value::<CausalClock>(duplicate).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(clock(&[("b", 0), ("a", 1)]).to_string(), "[(b,0),(a,1)]");
    }
}
