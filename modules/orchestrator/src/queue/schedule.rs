/// Smooth weighted round-robin over a fixed set of items.
///
/// Over any window of `sum(weights)` picks, each item is picked `weight` times, and picks of
/// the same item are spread out instead of coming in bursts.
#[derive(Clone, Debug)]
pub struct WeightedRoundRobin<T> {
    entries: Vec<Entry<T>>,
}

#[derive(Clone, Debug)]
struct Entry<T> {
    item: T,
    weight: i64,
    current: i64,
}

impl<T: Clone> WeightedRoundRobin<T> {
    pub fn new(items: impl IntoIterator<Item = (T, u32)>) -> Self {
        Self {
            entries: items
                .into_iter()
                .map(|(item, weight)| Entry {
                    item,
                    weight: weight as i64,
                    current: 0,
                })
                .collect(),
        }
    }

    /// Pick the next item, `None` if there are no items with a weight.
    pub fn next(&mut self) -> Option<T> {
        let total = self.entries.iter().map(|entry| entry.weight).sum::<i64>();
        if total == 0 {
            return None;
        }

        for entry in &mut self.entries {
            entry.current += entry.weight;
        }

        let selected = self
            .entries
            .iter_mut()
            .filter(|entry| entry.weight > 0)
            // first one wins on a tie
            .rev()
            .max_by_key(|entry| entry.current)?;

        selected.current -= total;
        Some(selected.item.clone())
    }

    /// The order in which to try the items for the next pick: the picked one first, followed
    /// by all others by descending weight.
    pub fn next_order(&mut self) -> Vec<T>
    where
        T: PartialEq,
    {
        let first = self.next();

        let mut rest = self
            .entries
            .iter()
            .filter(|entry| Some(&entry.item) != first.as_ref())
            .collect::<Vec<_>>();
        rest.sort_by(|a, b| b.weight.cmp(&a.weight));

        first
            .into_iter()
            .chain(rest.into_iter().map(|entry| entry.item.clone()))
            .collect()
    }
}
