use std::collections::{BTreeSet, HashMap};

use crate::catalog::{MembershipEdge, Oid};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("role membership cycle through oid {0}")]
    Cycle(Oid),
}

/// Directed role membership graph: an edge points from a role to each of its
/// direct members.
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    nodes: Vec<Oid>,
    members: HashMap<Oid, Vec<Oid>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl RoleGraph {
    pub fn new(nodes: impl IntoIterator<Item = Oid>, edges: &[MembershipEdge]) -> Self {
        let mut nodes: Vec<Oid> = nodes.into_iter().collect();
        let mut members: HashMap<Oid, Vec<Oid>> = HashMap::new();

        for edge in edges {
            let children = members.entry(edge.from_oid).or_default();
            if !children.contains(&edge.to_oid) {
                children.push(edge.to_oid);
            }
        }
        for edge in edges {
            for oid in [edge.from_oid, edge.to_oid] {
                if !nodes.contains(&oid) {
                    nodes.push(oid);
                }
            }
        }

        Self { nodes, members }
    }

    pub fn direct_members(&self, oid: Oid) -> &[Oid] {
        self.members.get(&oid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes ordered so that every node comes after all of its members.
    pub fn members_first_order(&self) -> Result<Vec<Oid>, GraphError> {
        let mut marks: HashMap<Oid, Mark> =
            self.nodes.iter().map(|&oid| (oid, Mark::Unvisited)).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        for &root in &self.nodes {
            if marks.get(&root) != Some(&Mark::Unvisited) {
                continue;
            }

            let mut stack: Vec<(Oid, usize)> = vec![(root, 0)];
            marks.insert(root, Mark::InProgress);

            while let Some((oid, next_child)) = stack.last().copied() {
                let children = self.direct_members(oid);
                if let Some(&child) = children.get(next_child) {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    match marks.get(&child).copied().unwrap_or(Mark::Unvisited) {
                        Mark::Unvisited => {
                            marks.insert(child, Mark::InProgress);
                            stack.push((child, 0));
                        }
                        Mark::InProgress => return Err(GraphError::Cycle(child)),
                        Mark::Done => {}
                    }
                } else {
                    marks.insert(oid, Mark::Done);
                    order.push(oid);
                    stack.pop();
                }
            }
        }

        Ok(order)
    }

    /// For every role, all roles reachable through membership edges, the role
    /// itself excluded.
    pub fn transitive_members(&self) -> Result<HashMap<Oid, BTreeSet<Oid>>, GraphError> {
        let order = self.members_first_order()?;
        let mut closure: HashMap<Oid, BTreeSet<Oid>> = HashMap::with_capacity(order.len());

        for oid in order {
            let mut reachable = BTreeSet::new();
            for &child in self.direct_members(oid) {
                reachable.insert(child);
                if let Some(grandchildren) = closure.get(&child) {
                    reachable.extend(grandchildren.iter().copied());
                }
            }
            closure.insert(oid, reachable);
        }

        Ok(closure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(from_oid: Oid, to_oid: Oid) -> MembershipEdge {
        MembershipEdge { from_oid, to_oid }
    }

    #[test]
    fn closure_follows_chain_of_members() {
        let graph = RoleGraph::new([1, 2, 3], &[edge(1, 2), edge(2, 3)]);
        let closure = graph.transitive_members().unwrap();

        assert_eq!(closure[&1], BTreeSet::from([2, 3]));
        assert_eq!(closure[&2], BTreeSet::from([3]));
        assert!(closure[&3].is_empty());
    }

    #[test]
    fn isolated_role_has_empty_closure() {
        let graph = RoleGraph::new([7], &[]);
        let closure = graph.transitive_members().unwrap();
        assert!(closure[&7].is_empty());
    }

    #[test]
    fn diamond_reaches_shared_member_once() {
        let graph = RoleGraph::new(
            [1, 2, 3, 4],
            &[edge(1, 2), edge(1, 3), edge(2, 4), edge(3, 4)],
        );
        let closure = graph.transitive_members().unwrap();
        assert_eq!(closure[&1], BTreeSet::from([2, 3, 4]));
    }

    #[test]
    fn order_places_members_before_their_roles() {
        let graph = RoleGraph::new([1, 2, 3], &[edge(1, 2), edge(2, 3)]);
        let order = graph.members_first_order().unwrap();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn edge_endpoints_missing_from_nodes_are_still_walked() {
        let graph = RoleGraph::new([1], &[edge(1, 9)]);
        let closure = graph.transitive_members().unwrap();
        assert_eq!(closure[&1], BTreeSet::from([9]));
        assert!(closure[&9].is_empty());
    }

    #[test]
    fn cycle_is_reported_instead_of_looping() {
        let graph = RoleGraph::new([1, 2, 3], &[edge(1, 2), edge(2, 3), edge(3, 1)]);
        let err = graph.transitive_members().unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn self_membership_is_a_cycle() {
        let graph = RoleGraph::new([5], &[edge(5, 5)]);
        assert_eq!(graph.members_first_order().unwrap_err(), GraphError::Cycle(5));
    }
}
