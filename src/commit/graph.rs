//! In-memory view of the commit DAG
//!
//! Loaded from `lix_internal_commit_edge` in one query and walked with
//! breadth-first search and a visited set, so shared ancestors are visited
//! once no matter how many paths lead to them.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Options for ancestor and descendant walks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AncestorQuery {
    /// Maximum number of edges to follow; unbounded when `None`
    pub depth: Option<usize>,
    /// Include the start commit itself
    pub inclusive: bool,
}

impl AncestorQuery {
    pub fn inclusive() -> Self {
        Self {
            depth: None,
            inclusive: true,
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommitGraph {
    parents: BTreeMap<String, Vec<String>>,
    children: BTreeMap<String, Vec<String>>,
}

impl CommitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(parent_id, child_id)` pairs
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut graph = Self::new();
        for (parent, child) in edges {
            graph.add_edge(parent, child);
        }
        graph
    }

    pub fn add_edge(&mut self, parent: String, child: String) {
        let parents = self.parents.entry(child.clone()).or_default();
        if !parents.contains(&parent) {
            parents.push(parent.clone());
            parents.sort();
        }
        let children = self.children.entry(parent).or_default();
        if !children.contains(&child) {
            children.push(child);
            children.sort();
        }
    }

    pub fn parents(&self, id: &str) -> &[String] {
        self.parents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn walk<'a, F>(&'a self, start: &str, max_depth: Option<usize>, next: F) -> Vec<(String, usize)>
    where
        F: Fn(&'a Self, &str) -> &'a [String],
    {
        let mut visited = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::new();
        visited.insert(start.to_string());
        queue.push_back((start.to_string(), 0usize));

        while let Some((id, depth)) = queue.pop_front() {
            order.push((id.clone(), depth));
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            for neighbor in next(self, &id) {
                if visited.insert(neighbor.clone()) {
                    queue.push_back((neighbor.clone(), depth + 1));
                }
            }
        }
        order
    }

    /// Every commit reachable from `start` with its minimal distance, in BFS order
    pub fn depths_from(&self, start: &str) -> Vec<(String, usize)> {
        self.walk(start, None, |g, id| g.parents(id))
    }

    pub fn ancestors(&self, start: &str, query: AncestorQuery) -> BTreeSet<String> {
        self.walk(start, query.depth, |g, id| g.parents(id))
            .into_iter()
            .filter(|(_, depth)| query.inclusive || *depth > 0)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn descendants(&self, start: &str, query: AncestorQuery) -> BTreeSet<String> {
        self.walk(start, query.depth, |g, id| g.children(id))
            .into_iter()
            .filter(|(_, depth)| query.inclusive || *depth > 0)
            .map(|(id, _)| id)
            .collect()
    }

    /// Union of inclusive ancestors of every start commit
    pub fn ancestors_of_all<'a, I>(&self, starts: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut all = BTreeSet::new();
        for start in starts {
            if all.contains(start) {
                continue;
            }
            all.extend(self.ancestors(start, AncestorQuery::inclusive()));
        }
        all
    }

    /// `ancestor` equals `descendant` or is reachable from it
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        ancestor == descendant
            || self
                .depths_from(descendant)
                .iter()
                .any(|(id, _)| id == ancestor)
    }

    /// Nearest common ancestor by combined BFS depth; ties go to the smaller id
    pub fn merge_base(&self, a: &str, b: &str) -> Option<String> {
        let from_a: BTreeMap<String, usize> = self.depths_from(a).into_iter().collect();
        self.depths_from(b)
            .into_iter()
            .filter_map(|(id, depth_b)| from_a.get(&id).map(|depth_a| (depth_a + depth_b, id)))
            .min()
            .map(|(_, id)| id)
    }

    /// Order `subset` so parents precede children
    pub fn topological_order(&self, subset: &BTreeSet<String>) -> Vec<String> {
        let mut pending: BTreeMap<&String, usize> = subset
            .iter()
            .map(|id| {
                let in_subset = self.parents(id).iter().filter(|p| subset.contains(*p)).count();
                (id, in_subset)
            })
            .collect();

        let mut ready: BTreeSet<&String> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(subset.len());

        while let Some(id) = ready.iter().next().copied() {
            ready.remove(id);
            pending.remove(id);
            order.push(id.clone());
            for child in self.children(id) {
                if let Some(count) = pending.get_mut(child) {
                    *count -= 1;
                    if *count == 0 {
                        if let Some((key, _)) = pending.get_key_value(child) {
                            ready.insert(*key);
                        }
                    }
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(pairs: &[(&str, &str)]) -> CommitGraph {
        CommitGraph::from_edges(pairs.iter().map(|(p, c)| (p.to_string(), c.to_string())))
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    // a <- b <- c <- e
    //      b <- d <- e   (diamond at e)
    fn diamond() -> CommitGraph {
        edges(&[("a", "b"), ("b", "c"), ("b", "d"), ("c", "e"), ("d", "e")])
    }

    #[test]
    fn test_ancestors_exclusive_and_inclusive() {
        let graph = diamond();
        assert_eq!(graph.ancestors("e", AncestorQuery::default()), set(&["a", "b", "c", "d"]));
        assert_eq!(
            graph.ancestors("e", AncestorQuery::inclusive()),
            set(&["a", "b", "c", "d", "e"])
        );
    }

    #[test]
    fn test_ancestors_depth_bound() {
        let graph = diamond();
        let query = AncestorQuery::default().with_depth(1);
        assert_eq!(graph.ancestors("e", query), set(&["c", "d"]));
        let query = AncestorQuery::inclusive().with_depth(2);
        assert_eq!(graph.ancestors("e", query), set(&["b", "c", "d", "e"]));
    }

    #[test]
    fn test_shared_ancestor_visited_once() {
        let graph = diamond();
        let depths = graph.depths_from("e");
        let b_entries: Vec<_> = depths.iter().filter(|(id, _)| id == "b").collect();
        assert_eq!(b_entries.len(), 1);
        assert_eq!(b_entries[0].1, 2);
    }

    #[test]
    fn test_descendants() {
        let graph = diamond();
        assert_eq!(graph.descendants("b", AncestorQuery::default()), set(&["c", "d", "e"]));
        assert!(graph.descendants("e", AncestorQuery::default()).is_empty());
    }

    #[test]
    fn test_merge_base() {
        let graph = edges(&[("a", "b"), ("b", "c"), ("b", "d"), ("d", "f")]);
        assert_eq!(graph.merge_base("c", "f"), Some("b".to_string()));
        assert_eq!(graph.merge_base("b", "f"), Some("b".to_string()));

        let unrelated = edges(&[("a", "b"), ("x", "y")]);
        assert_eq!(unrelated.merge_base("b", "y"), None);
    }

    #[test]
    fn test_is_ancestor() {
        let graph = diamond();
        assert!(graph.is_ancestor("a", "e"));
        assert!(graph.is_ancestor("e", "e"));
        assert!(!graph.is_ancestor("e", "a"));
        assert!(!graph.is_ancestor("c", "d"));
    }

    #[test]
    fn test_topological_order_parents_first() {
        let graph = diamond();
        let order = graph.topological_order(&set(&["e", "d", "c", "b"]));
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert_eq!(order.len(), 4);
        assert!(pos("b") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("e"));
        assert!(pos("d") < pos("e"));
    }

    #[test]
    fn test_ancestors_of_all() {
        let graph = edges(&[("a", "b"), ("x", "y")]);
        let heads = vec!["b".to_string(), "y".to_string()];
        assert_eq!(graph.ancestors_of_all(&heads), set(&["a", "b", "x", "y"]));
    }
}
