use crate::error::{HarnessError, Result};

/// An ordered group of work-item ids dispatched together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub ids: Vec<usize>,
    pub weight: u64,
}

impl Batch {
    fn single(id: usize, weight: u64) -> Self {
        Self {
            ids: vec![id],
            weight,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Groups `(id, weight)` pairs into batches whose summed weight stays within
/// `max_weight`.
///
/// Single left-to-right greedy pass: items keep their input order, a batch is
/// closed as soon as the next item would overflow it, and an item heavier than
/// the whole budget is emitted alone (closing any open batch first). No
/// packing beyond that.
pub fn create_batches(items: &[(usize, u64)], max_weight: u64) -> Result<Vec<Batch>> {
    if max_weight == 0 {
        return Err(HarnessError::InvalidBatchBudget(max_weight));
    }

    let mut batches = Vec::new();
    let mut current = Batch::default();

    for &(id, weight) in items {
        if weight > max_weight {
            if !current.is_empty() {
                batches.push(std::mem::take(&mut current));
            }
            batches.push(Batch::single(id, weight));
            continue;
        }

        if !current.is_empty() && current.weight + weight > max_weight {
            batches.push(std::mem::take(&mut current));
        }

        current.ids.push(id);
        current.weight += weight;
    }

    if !current.is_empty() {
        batches.push(current);
    }

    Ok(batches)
}
