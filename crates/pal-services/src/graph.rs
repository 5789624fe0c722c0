//! Dependency-graph helpers shared by the port gate and the orchestrator.
//! Edges are (port, depends_on) pairs; the graph must stay acyclic.

use std::collections::{HashMap, HashSet, VecDeque};

/// Would adding `proposed` edges to `existing` close a cycle?
///
/// DFS from each proposed edge's target along the "depends on" direction;
/// reaching the edge's source again means the new edge closes a loop.
pub fn would_create_cycle(
    existing: &[(String, String)],
    proposed: &[(String, String)],
) -> Option<Vec<String>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (port, dep) in existing.iter().chain(proposed.iter()) {
        adjacency.entry(port.as_str()).or_default().push(dep.as_str());
    }

    for (port, dep) in proposed {
        if let Some(path) = path_between(&adjacency, dep, port) {
            let mut cycle = vec![port.clone()];
            cycle.extend(path.into_iter().map(|s| s.to_string()));
            return Some(cycle);
        }
    }
    None
}

fn path_between<'a>(
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    from: &'a str,
    to: &str,
) -> Option<Vec<&'a str>> {
    let mut stack = vec![(from, vec![from])];
    let mut visited = HashSet::new();

    while let Some((node, path)) = stack.pop() {
        if node == to {
            return Some(path);
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(next) = adjacency.get(node) {
            for dep in next {
                let mut extended = path.clone();
                extended.push(*dep);
                stack.push((*dep, extended));
            }
        }
    }
    None
}

/// Kahn topological order over the given ports, dependencies first.
/// Returns `None` when the subgraph contains a cycle.
pub fn topo_order(ports: &[String], edges: &[(String, String)]) -> Option<Vec<String>> {
    let port_set: HashSet<&str> = ports.iter().map(|p| p.as_str()).collect();

    // in-degree counts only edges inside the port set
    let mut in_degree: HashMap<&str, usize> = ports.iter().map(|p| (p.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (port, dep) in edges {
        if port_set.contains(port.as_str()) && port_set.contains(dep.as_str()) {
            *in_degree.entry(port.as_str()).or_default() += 1;
            dependents.entry(dep.as_str()).or_default().push(port.as_str());
        }
    }

    let mut ready: VecDeque<&str> = {
        let mut zero: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(port, _)| *port)
            .collect();
        zero.sort_unstable();
        zero.into_iter().collect()
    };

    let mut order = Vec::with_capacity(ports.len());
    while let Some(port) = ready.pop_front() {
        order.push(port.to_string());
        if let Some(next) = dependents.get(port) {
            let mut unlocked: Vec<&str> = Vec::new();
            for dependent in next {
                let degree = in_degree.get_mut(dependent).expect("known port");
                *degree -= 1;
                if *degree == 0 {
                    unlocked.push(*dependent);
                }
            }
            unlocked.sort_unstable();
            ready.extend(unlocked);
        }
    }

    if order.len() == ports.len() {
        Some(order)
    } else {
        None
    }
}

/// Transitive closure of ports that depend on `root` (directly or not).
pub fn downstream_of(root: &str, edges: &[(String, String)]) -> HashSet<String> {
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (port, dep) in edges {
        dependents.entry(dep.as_str()).or_default().push(port.as_str());
    }

    let mut result = HashSet::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if let Some(next) = dependents.get(node) {
            for dependent in next {
                if result.insert(dependent.to_string()) {
                    stack.push(*dependent);
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(a: &str, b: &str) -> (String, String) {
        (a.to_string(), b.to_string())
    }

    #[test]
    fn test_cycle_detection() {
        let existing = vec![edge("P2", "P1"), edge("P3", "P2")];

        // P1 -> P3 closes the loop P3 -> P2 -> P1
        let cycle = would_create_cycle(&existing, &[edge("P1", "P3")]);
        assert!(cycle.is_some());

        // a diamond is fine
        assert!(would_create_cycle(&existing, &[edge("P3", "P1")]).is_none());

        // self-edge is a cycle
        assert!(would_create_cycle(&[], &[edge("P1", "P1")]).is_some());
    }

    #[test]
    fn test_topo_order_dependencies_first() {
        let ports = vec!["P1".to_string(), "P2".to_string(), "P3".to_string()];
        let edges = vec![edge("P2", "P1"), edge("P3", "P2")];

        let order = topo_order(&ports, &edges).unwrap();
        assert_eq!(order, vec!["P1", "P2", "P3"]);
    }

    #[test]
    fn test_topo_order_rejects_cycle() {
        let ports = vec!["P1".to_string(), "P2".to_string()];
        let edges = vec![edge("P2", "P1"), edge("P1", "P2")];
        assert!(topo_order(&ports, &edges).is_none());
    }

    #[test]
    fn test_topo_order_is_deterministic() {
        let ports = vec!["B".to_string(), "A".to_string(), "C".to_string()];
        let order = topo_order(&ports, &[]).unwrap();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_downstream_closure() {
        let edges = vec![edge("P2", "P1"), edge("P3", "P2"), edge("P4", "P1")];
        let downstream = downstream_of("P1", &edges);
        assert_eq!(downstream.len(), 3);
        assert!(downstream.contains("P2"));
        assert!(downstream.contains("P3"));
        assert!(downstream.contains("P4"));
        assert!(downstream_of("P3", &edges).is_empty());
    }
}
