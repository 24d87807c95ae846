//! Layered routing tables and finger selection
//!
//! Successor tables hold the records that *follow* a node's layer id, so a
//! lookup wants the finger whose id most closely *precedes* the key. All
//! comparisons are on a ring: ids greater than the key are predecessors
//! only after wrapping around.

use std::cmp::Ordering;
use std::collections::HashSet;
use whanau_core::{Address, Finger, Key, Record};

/// Per-layer ids, finger tables and successor tables for one node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingTables {
    ids: Vec<Key>,
    fingers: Vec<Vec<Finger>>,
    succ: Vec<Vec<Record>>,
}

impl RoutingTables {
    /// Number of layers with a committed id
    pub fn layers(&self) -> usize {
        self.ids.len()
    }

    /// Number of layers whose finger and successor tables are complete
    pub fn complete_layers(&self) -> usize {
        self.fingers.len().min(self.succ.len())
    }

    pub fn ids(&self) -> &[Key] {
        &self.ids
    }

    pub fn id(&self, layer: usize) -> Option<&Key> {
        self.ids.get(layer)
    }

    /// Finger table of `layer`, empty if the layer is not built yet
    pub fn fingers(&self, layer: usize) -> &[Finger] {
        self.fingers.get(layer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Successor table of `layer`, empty if the layer is not built yet
    pub fn successors(&self, layer: usize) -> &[Record] {
        self.succ.get(layer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Commit the id of the next layer
    pub(crate) fn push_id(&mut self, id: Key) {
        self.ids.push(id);
    }

    /// Commit the sorted tables of the layer whose id was pushed last
    pub(crate) fn push_tables(&mut self, fingers: Vec<Finger>, succ: Vec<Record>) {
        debug_assert!(fingers.windows(2).all(|w| w[0].id <= w[1].id));
        debug_assert!(succ.windows(2).all(|w| w[0].key <= w[1].key));
        self.fingers.push(fingers);
        self.succ.push(succ);
    }

    /// Every built layer has both tables, sorted, and at most one committed
    /// id is still waiting for its tables
    pub fn is_well_formed(&self) -> bool {
        let built = self.fingers.len();
        built == self.succ.len()
            && (built == self.ids.len() || built + 1 == self.ids.len())
            && self.fingers.iter().all(|t| t.windows(2).all(|w| w[0].id <= w[1].id))
            && self.succ.iter().all(|t| t.windows(2).all(|w| w[0].key <= w[1].key))
    }

    /// Binary search one layer's successor table
    pub fn find_successor(&self, layer: usize, key: &Key) -> Option<&Record> {
        let table = self.successors(layer);
        let index = table.partition_point(|record| record.key < *key);
        table.get(index).filter(|record| record.key == *key)
    }

    /// Search every layer's successor table, top layer first
    pub fn find(&self, key: &Key) -> Option<&Record> {
        (0..self.complete_layers())
            .rev()
            .find_map(|layer| self.find_successor(layer, key))
    }

    /// Fingers worth querying for `key`, best first, paired with their layer.
    ///
    /// The anchor `x0` is the closest layer-0 finger preceding the key. A
    /// layer's candidates are its fingers with ids in `[x0, key]`; layers
    /// are visited from the top down and each layer's candidates are
    /// ordered closest predecessor first. Each (server, layer) appears once.
    pub fn finger_candidates(&self, key: &Key) -> Vec<(Finger, usize)> {
        let anchor = closest_predecessor(self.fingers(0), key).map(|f| f.id.clone());
        let mut seen: HashSet<(Address, usize)> = HashSet::new();
        let mut out = Vec::new();

        for layer in (0..self.complete_layers()).rev() {
            let mut candidates: Vec<&Finger> = self
                .fingers(layer)
                .iter()
                .filter(|f| match &anchor {
                    Some(x0) => in_arc(x0, &f.id, key),
                    None => true,
                })
                .collect();
            candidates.sort_by(|a, b| predecessor_order(key, &a.id, &b.id));

            for finger in candidates {
                if seen.insert((finger.server.clone(), layer)) {
                    out.push((finger.clone(), layer));
                }
            }
        }
        out
    }
}

/// The finger in a sorted table whose id most closely precedes `key`,
/// wrapping to the largest id when every id is greater than the key
pub fn closest_predecessor<'a>(fingers: &'a [Finger], key: &Key) -> Option<&'a Finger> {
    let index = fingers.partition_point(|f| f.id <= *key);
    if index > 0 {
        fingers.get(index - 1)
    } else {
        fingers.last()
    }
}

/// Whether `id` lies on the ring arc from `from` to `to`, both inclusive
pub fn in_arc(from: &Key, id: &Key, to: &Key) -> bool {
    if from <= to {
        from <= id && id <= to
    } else {
        id >= from || id <= to
    }
}

/// Order two ids by how closely they precede `key`: ids not past the key
/// come first, largest first; wrapped ids follow, largest first
pub fn predecessor_order(key: &Key, a: &Key, b: &Key) -> Ordering {
    (a > key).cmp(&(b > key)).then_with(|| b.cmp(a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use whanau_core::{sort_fingers, Value};

    fn finger(id: &str, server: &str) -> Finger {
        Finger::new(Key::from(id), Address::new(server))
    }

    fn record(key: &str) -> Record {
        Record::new(key, Value::new(vec![format!("srv-{}", key)]))
    }

    fn tables(layers: Vec<(&str, Vec<Finger>, Vec<Record>)>) -> RoutingTables {
        let mut tables = RoutingTables::default();
        for (id, mut fingers, succ) in layers {
            sort_fingers(&mut fingers);
            tables.push_id(Key::from(id));
            tables.push_tables(fingers, succ);
        }
        tables
    }

    #[test]
    fn test_closest_predecessor() {
        let fingers = vec![finger("b", "1"), finger("d", "2"), finger("f", "3")];
        let key = Key::from("e");
        assert_eq!(closest_predecessor(&fingers, &key).unwrap().id, Key::from("d"));

        let exact = Key::from("d");
        assert_eq!(closest_predecessor(&fingers, &exact).unwrap().id, Key::from("d"));

        // Wraps to the largest id
        let key = Key::from("a");
        assert_eq!(closest_predecessor(&fingers, &key).unwrap().id, Key::from("f"));

        assert!(closest_predecessor(&[], &key).is_none());
    }

    #[test]
    fn test_in_arc() {
        let (b, d, f) = (Key::from("b"), Key::from("d"), Key::from("f"));
        assert!(in_arc(&b, &d, &f));
        assert!(in_arc(&b, &b, &f));
        assert!(!in_arc(&d, &b, &f));
        // Wrapping arc f -> b
        assert!(in_arc(&f, &Key::from("z"), &b));
        assert!(in_arc(&f, &Key::from("a"), &b));
        assert!(!in_arc(&f, &d, &b));
    }

    #[test]
    fn test_predecessor_order() {
        let key = Key::from("m");
        let mut ids = vec![Key::from("a"), Key::from("z"), Key::from("k"), Key::from("n")];
        ids.sort_by(|a, b| predecessor_order(&key, a, b));
        assert_eq!(
            ids,
            vec![Key::from("k"), Key::from("a"), Key::from("z"), Key::from("n")]
        );
    }

    #[test]
    fn test_find_successor_binary_search() {
        let tables = tables(vec![(
            "a",
            vec![],
            vec![record("a"), record("c"), record("c"), record("e")],
        )]);
        assert_eq!(tables.find_successor(0, &Key::from("c")).unwrap().key, Key::from("c"));
        assert!(tables.find_successor(0, &Key::from("d")).is_none());
        assert!(tables.find_successor(5, &Key::from("c")).is_none());
        assert!(tables.find(&Key::from("e")).is_some());
    }

    #[test]
    fn test_candidates_prefer_top_layer_and_closest() {
        let tables = tables(vec![
            ("a", vec![finger("b", "n1"), finger("g", "n2"), finger("p", "n3")], vec![]),
            (
                "b",
                vec![finger("c", "n4"), finger("f", "n5"), finger("h", "n6"), finger("a", "n7")],
                vec![],
            ),
        ]);

        // Anchor is "g" (closest layer-0 id before "k")
        let picked: Vec<_> = tables
            .finger_candidates(&Key::from("k"))
            .into_iter()
            .map(|(f, layer)| (f.server.as_str().to_string(), layer))
            .collect();
        assert_eq!(
            picked,
            vec![("n6".to_string(), 1), ("n2".to_string(), 0)]
        );
    }

    #[test]
    fn test_candidates_skip_duplicate_servers() {
        let tables = tables(vec![(
            "a",
            vec![finger("c", "n1"), finger("c", "n1"), finger("d", "n2")],
            vec![],
        )]);
        let candidates = tables.finger_candidates(&Key::from("c"));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].0.server, Address::new("n1"));
    }

    #[test]
    fn test_candidates_empty_without_fingers() {
        let tables = tables(vec![("a", vec![], vec![])]);
        assert!(tables.finger_candidates(&Key::from("a")).is_empty());
        assert!(RoutingTables::default().finger_candidates(&Key::from("a")).is_empty());
    }

    #[test]
    fn test_well_formed_tracks_staging() {
        let mut tables = RoutingTables::default();
        assert!(tables.is_well_formed());
        tables.push_id(Key::from("x"));
        assert!(tables.is_well_formed());
        tables.push_tables(vec![finger("a", "n1")], vec![record("x")]);
        assert!(tables.is_well_formed());

        // Tables pushed without an id are never published by setup
        tables.push_tables(vec![], vec![]);
        assert!(!tables.is_well_formed());
    }

    #[test]
    fn test_uncommitted_layer_reads_empty() {
        let mut tables = RoutingTables::default();
        tables.push_id(Key::from("x"));
        assert_eq!(tables.layers(), 1);
        assert_eq!(tables.complete_layers(), 0);
        assert!(tables.fingers(0).is_empty());
        assert!(tables.successors(0).is_empty());
    }
}
