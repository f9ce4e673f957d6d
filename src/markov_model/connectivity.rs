use fixedbitset::FixedBitSet;

use crate::transition_model::TransitionMatrix;

/// Positive-probability transitions `i -> j` with `i != j`, neighbours in ascending order.
pub(crate) fn successors(t: &TransitionMatrix) -> Vec<Vec<usize>> {
    (0..t.nrows())
        .map(|i| {
            (0..t.ncols())
                .filter(|&j| j != i && t[(i, j)] > 0.0)
                .collect()
        })
        .collect()
}

pub(crate) fn predecessors(t: &TransitionMatrix) -> Vec<Vec<usize>> {
    (0..t.ncols())
        .map(|j| {
            (0..t.nrows())
                .filter(|&i| i != j && t[(i, j)] > 0.0)
                .collect()
        })
        .collect()
}

/// Marks every state reachable from `starts` along `adjacency` without entering `blocked` states.
/// The start states themselves are always marked.
pub(crate) fn reachable(
    adjacency: &[Vec<usize>],
    starts: &[usize],
    blocked: &FixedBitSet,
) -> FixedBitSet {
    let mut seen = FixedBitSet::with_capacity(adjacency.len());
    let mut stack = Vec::with_capacity(adjacency.len());
    for &start in starts {
        if !seen.put(start) {
            stack.push(start);
        }
    }
    while let Some(node) = stack.pop() {
        for &next in &adjacency[node] {
            if !blocked.contains(next) && !seen.put(next) {
                stack.push(next);
            }
        }
    }
    seen
}

pub(crate) fn as_bitset(states: &[usize], n: usize) -> FixedBitSet {
    let mut set = FixedBitSet::with_capacity(n);
    for &state in states {
        set.insert(state);
    }
    set
}

/// Strongly connected components (Kosaraju), each sorted, ordered by their smallest state.
pub(crate) fn strongly_connected_components(successors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = successors.len();
    let mut visited = FixedBitSet::with_capacity(n);
    let mut finish_order = Vec::with_capacity(n);
    for root in 0..n {
        if visited.put(root) {
            continue;
        }
        let mut stack = vec![(root, 0_usize)];
        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            if next < successors[node].len() {
                top.1 += 1;
                let child = successors[node][next];
                if !visited.put(child) {
                    stack.push((child, 0));
                }
            } else {
                finish_order.push(node);
                stack.pop();
            }
        }
    }

    let mut predecessors = vec![Vec::new(); n];
    for (i, list) in successors.iter().enumerate() {
        for &j in list {
            predecessors[j].push(i);
        }
    }
    let mut assigned = FixedBitSet::with_capacity(n);
    let mut components = Vec::new();
    for &root in finish_order.iter().rev() {
        if assigned.put(root) {
            continue;
        }
        let mut component = vec![root];
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            for &prev in &predecessors[node] {
                if !assigned.put(prev) {
                    component.push(prev);
                    stack.push(prev);
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }
    components.sort_unstable_by_key(|c| c[0]);
    components
}
