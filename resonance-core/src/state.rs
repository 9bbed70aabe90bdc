//! Partial updates to the local resonance state.
//!
//! A [`StatePatch`] names only the fields that change. Applying it never
//! touches the other fields and always moves `last_update` forward, even
//! when two patches land within the same clock tick.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use resonance_types::ResonanceState;

/// Fields to change; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    /// New frequency
    pub frequency: Option<f64>,
    /// New S-ROI
    pub s_roi: Option<f64>,
    /// New anchor
    pub anchor: Option<String>,
    /// New connected-peer set
    pub connected_nodes: Option<BTreeSet<String>>,
}

impl StatePatch {
    /// Empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the frequency.
    pub fn frequency(mut self, frequency: f64) -> Self {
        self.frequency = Some(frequency);
        self
    }

    /// Set the S-ROI.
    pub fn s_roi(mut self, s_roi: f64) -> Self {
        self.s_roi = Some(s_roi);
        self
    }

    /// Set the anchor.
    pub fn anchor(mut self, anchor: impl Into<String>) -> Self {
        self.anchor = Some(anchor.into());
        self
    }

    /// Replace the connected-peer set.
    pub fn connected_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.connected_nodes = Some(nodes.into_iter().map(Into::into).collect());
        self
    }

    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.frequency.is_none()
            && self.s_roi.is_none()
            && self.anchor.is_none()
            && self.connected_nodes.is_none()
    }

    /// Merge into `state` at time `now`.
    ///
    /// `last_update` becomes `now`, or one nanosecond past its previous
    /// value if `now` is not later. An empty patch still bumps it.
    pub fn apply(self, state: &mut ResonanceState, now: DateTime<Utc>) {
        if let Some(frequency) = self.frequency {
            state.frequency = frequency;
        }
        if let Some(s_roi) = self.s_roi {
            state.s_roi = s_roi;
        }
        if let Some(anchor) = self.anchor {
            state.anchor = anchor;
        }
        if let Some(nodes) = self.connected_nodes {
            state.connected_nodes = nodes;
        }

        let floor = state.last_update + Duration::nanoseconds(1);
        state.last_update = now.max(floor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ResonanceState {
        ResonanceState::new(0.043, 0.502, "BOLZANO_71")
    }

    #[test]
    fn only_given_fields_change() {
        let mut s = state();
        let before = s.clone();

        StatePatch::new().frequency(0.05).apply(&mut s, Utc::now());

        assert_eq!(s.frequency, 0.05);
        assert_eq!(s.s_roi, before.s_roi);
        assert_eq!(s.anchor, before.anchor);
        assert_eq!(s.connected_nodes, before.connected_nodes);
    }

    #[test]
    fn connected_nodes_are_replaced_wholesale() {
        let mut s = state();
        StatePatch::new()
            .connected_nodes(["nexus", "lexamoris"])
            .apply(&mut s, Utc::now());
        StatePatch::new()
            .connected_nodes(["nexus"])
            .apply(&mut s, Utc::now());

        assert_eq!(s.connected_nodes, BTreeSet::from(["nexus".to_string()]));
    }

    #[test]
    fn last_update_is_strictly_newer() {
        let mut s = state();
        let first = s.last_update;

        // Clock stuck, or even behind.
        StatePatch::new().s_roi(0.6).apply(&mut s, first);
        let second = s.last_update;
        assert!(second > first);

        StatePatch::new()
            .s_roi(0.7)
            .apply(&mut s, first - Duration::seconds(10));
        assert!(s.last_update > second);
    }

    #[test]
    fn later_clock_is_taken_as_is() {
        let mut s = state();
        let later = s.last_update + Duration::seconds(5);
        StatePatch::new().anchor("NEXUS").apply(&mut s, later);
        assert_eq!(s.last_update, later);
        assert_eq!(s.anchor, "NEXUS");
    }

    #[test]
    fn empty_patch_still_bumps_timestamp() {
        let patch = StatePatch::new();
        assert!(patch.is_empty());

        let mut s = state();
        let before = s.clone();
        patch.apply(&mut s, before.last_update);

        assert!(s.last_update > before.last_update);
        assert_eq!(s.frequency, before.frequency);
        assert!(!StatePatch::new().s_roi(1.0).is_empty());
    }
}
