//! Sharing a data budget between channels.
//!
//! When the budget covers total demand every channel gets what it asks for.
//! Otherwise the budget is split evenly among hungry channels, channels that
//! need less than their share return the surplus, and the split repeats.
//! Whatever remains after the last pass goes to the largest unmet demands.

/// Refinement passes of the even split.
pub const WATER_FILL_PASSES: usize = 3;

/// Allocate `budget` bytes across `demands`. Never exceeds either.
pub fn allocate(budget: usize, demands: &[usize]) -> Vec<usize> {
    let total: usize = demands.iter().sum();
    if total <= budget {
        return demands.to_vec();
    }

    let mut alloc = vec![0usize; demands.len()];
    let mut remaining = budget;

    for _ in 0..WATER_FILL_PASSES {
        let hungry: Vec<usize> = (0..demands.len())
            .filter(|&i| alloc[i] < demands[i])
            .collect();
        if hungry.is_empty() || remaining == 0 {
            break;
        }
        let share = remaining / hungry.len();
        if share == 0 {
            break;
        }
        for i in hungry {
            let give = share.min(demands[i] - alloc[i]);
            alloc[i] += give;
            remaining -= give;
        }
    }

    if remaining > 0 {
        let mut order: Vec<usize> = (0..demands.len())
            .filter(|&i| alloc[i] < demands[i])
            .collect();
        order.sort_by_key(|&i| std::cmp::Reverse(demands[i] - alloc[i]));
        for i in order {
            if remaining == 0 {
                break;
            }
            let give = remaining.min(demands[i] - alloc[i]);
            alloc[i] += give;
            remaining -= give;
        }
    }

    alloc
}
