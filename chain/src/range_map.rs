//! Range-wise updates of `rangemap::RangeMap` entries.

use {rangemap::RangeMap, std::ops::Range, syncval_core::syncval_slow_assert};

/// Updates of a map from disjoint byte ranges to values.
///
/// Every update splits the entries crossing the bounds of its range,
/// so values of bytes outside the range are never touched.
/// Equal neighbours are merged on insertion.
pub trait RangeMapExt<V> {
    /// Update every byte of `range`.
    ///
    /// Gaps are filled with `infill` first. Gaps it returns `None` for stay empty.
    fn update_range<I, U>(&mut self, range: Range<u64>, infill: I, update: U)
    where
        I: FnMut(Range<u64>) -> Option<V>,
        U: FnMut(Range<u64>, &mut V);

    /// Update every existing entry.
    fn update_each<F>(&mut self, f: F)
    where
        F: FnMut(Range<u64>, &mut V);

    /// Update every existing entry, keeping only those for which `f` returns `true`.
    fn retain_each<F>(&mut self, f: F)
    where
        F: FnMut(Range<u64>, &mut V) -> bool;
}

impl<V> RangeMapExt<V> for RangeMap<u64, V>
where
    V: Clone + Eq,
{
    fn update_range<I, U>(&mut self, range: Range<u64>, mut infill: I, mut update: U)
    where
        I: FnMut(Range<u64>) -> Option<V>,
        U: FnMut(Range<u64>, &mut V),
    {
        if range.start >= range.end {
            return;
        }

        let mut pieces: Vec<(Range<u64>, V)> = self
            .overlapping(&range)
            .map(|(piece, value)| {
                (
                    piece.start.max(range.start)..piece.end.min(range.end),
                    value.clone(),
                )
            })
            .collect();
        let gaps: Vec<Range<u64>> = self.gaps(&range).collect();
        pieces.extend(
            gaps.into_iter()
                .filter_map(|gap| infill(gap.clone()).map(|value| (gap, value))),
        );
        pieces.sort_by_key(|(piece, _)| piece.start);

        for (piece, mut value) in pieces {
            update(piece.clone(), &mut value);
            self.insert(piece, value);
        }
        check_disjoint(self);
    }

    fn update_each<F>(&mut self, mut f: F)
    where
        F: FnMut(Range<u64>, &mut V),
    {
        self.retain_each(|range, value| {
            f(range, value);
            true
        });
    }

    fn retain_each<F>(&mut self, mut f: F)
    where
        F: FnMut(Range<u64>, &mut V) -> bool,
    {
        let entries = std::mem::replace(self, RangeMap::new());
        for (range, mut value) in entries {
            if f(range.clone(), &mut value) {
                self.insert(range, value);
            }
        }
    }
}

fn check_disjoint<V>(map: &RangeMap<u64, V>)
where
    V: Clone + Eq,
{
    syncval_slow_assert!(
        map.iter()
            .try_fold(0, |last_end, (range, _)| {
                if range.start >= last_end && range.start < range.end {
                    Some(range.end)
                } else {
                    None
                }
            })
            .is_some(),
        "Range map entries overlap"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(map: &RangeMap<u64, u32>) -> Vec<(Range<u64>, u32)> {
        map.iter().map(|(range, &value)| (range.clone(), value)).collect()
    }

    #[test]
    fn update_splits_and_infills() {
        let mut map = RangeMap::new();
        map.insert(0..64, 1u32);
        map.update_range(32..96, |_| Some(0), |_, value| *value += 10);
        assert_eq!(entries(&map), vec![(0..32, 1), (32..64, 11), (64..96, 10)]);
    }

    #[test]
    fn update_without_infill_leaves_gaps() {
        let mut map = RangeMap::new();
        map.insert(10..20, 1u32);
        map.insert(30..40, 2);
        map.update_range(0..50, |_| None, |_, value| *value *= 2);
        assert_eq!(entries(&map), vec![(10..20, 2), (30..40, 4)]);
    }

    #[test]
    fn update_visits_pieces_in_address_order() {
        let mut map = RangeMap::new();
        map.insert(16..32, 1u32);
        let mut visited = Vec::new();
        map.update_range(0..48, |_| Some(0), |range, _| visited.push(range));
        assert_eq!(visited, vec![0..16, 16..32, 32..48]);
    }

    #[test]
    fn equal_neighbours_merge() {
        let mut map = RangeMap::new();
        map.insert(0..8, 1u32);
        map.insert(8..16, 1);
        map.insert(16..24, 2);
        map.insert(30..40, 2);
        assert_eq!(entries(&map), vec![(0..16, 1), (16..24, 2), (30..40, 2)]);
    }

    #[test]
    fn updates_keep_entries_disjoint() {
        let mut map = RangeMap::new();
        map.insert(0..100, 5u32);
        map.update_range(10..20, |_| Some(0), |_, value| *value = 7);
        map.update_range(15..120, |_| Some(0), |range, value| *value += range.start as u32);
        let found = entries(&map);
        for pair in found.windows(2) {
            assert!(pair[0].0.end <= pair[1].0.start);
        }
        assert_eq!(found.first().map(|entry| entry.0.start), Some(0));
        assert_eq!(found.last().map(|entry| entry.0.end), Some(120));
    }

    #[test]
    fn retain_each_drops_rejected_entries() {
        let mut map = RangeMap::new();
        map.insert(0..20, 5u32);
        map.insert(20..30, 6);
        map.insert(30..100, 7);
        map.retain_each(|_, value| {
            *value += 1;
            *value != 7
        });
        assert_eq!(entries(&map), vec![(0..20, 6), (30..100, 8)]);
        assert_eq!(map.get(&25), None);
        assert_eq!(map.get(&99), Some(&8));
    }
}
