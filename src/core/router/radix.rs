//! Compressed-trie path index for route matching.
//!
//! Patterns are slash-delimited sequences of static literals, `:name`
//! parameters (one segment each) and a trailing `*` wildcard capturing the
//! remainder. Lookup walks one node per segment, trying siblings in
//! static > param > wildcard order and backtracking out of parameter
//! branches on mismatch, so a search costs O(segments).
//!
//! The tree is immutable once published inside a snapshot; reloads build a
//! fresh tree instead of mutating the live one.
use std::collections::HashMap;

/// Kind of a tree node, in descending match priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Static,
    Param,
    Wildcard,
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    /// Segment literal for static nodes, parameter name for param nodes.
    label: String,
    children: Vec<Node>,
    /// Route attached when this node terminates a pattern.
    route_id: Option<String>,
    /// Residual pattern depth below the insertion point; longer residuals
    /// sort earlier among siblings of the same kind.
    depth_weight: u32,
}

impl Node {
    fn new(kind: NodeKind, label: impl Into<String>, depth_weight: u32) -> Self {
        Self {
            kind,
            label: label.into(),
            children: Vec::new(),
            route_id: None,
            depth_weight,
        }
    }

    fn sort_key(&self) -> (u8, std::cmp::Reverse<u32>) {
        let kind_rank = match self.kind {
            NodeKind::Static => 0,
            NodeKind::Param => 1,
            NodeKind::Wildcard => 2,
        };
        (kind_rank, std::cmp::Reverse(self.depth_weight))
    }
}

/// Parameters captured during a successful search. The wildcard remainder,
/// if any, is stored under `"*"`.
pub type PathParams = HashMap<String, String>;

/// Radix tree mapping path patterns to route identifiers.
#[derive(Debug)]
pub struct RadixTree {
    root: Node,
    size: usize,
}

impl Default for RadixTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RadixTree {
    pub fn new() -> Self {
        Self {
            root: Node::new(NodeKind::Static, "", 0),
            size: 0,
        }
    }

    /// Number of patterns inserted (overwrites not double-counted).
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Insert a pattern, attaching `route_id` at the terminal node.
    ///
    /// Inserting the exact same pattern twice overwrites the terminal's
    /// route reference (last write wins).
    pub fn insert(&mut self, pattern: &str, route_id: &str) {
        let pattern = normalize_path(pattern);
        let segments = split_path(&pattern);
        let total = segments.len();

        let mut current = &mut self.root;
        for (i, segment) in segments.iter().copied().enumerate() {
            let (kind, label) = classify_segment(segment);
            let residual = (total - i) as u32;

            let pos = current
                .children
                .iter()
                .position(|c| c.kind == kind && c.label == label);
            let pos = match pos {
                Some(p) => p,
                None => {
                    current.children.push(Node::new(kind, label, residual));
                    current.children.sort_by_key(Node::sort_key);
                    current
                        .children
                        .iter()
                        .position(|c| c.kind == kind && c.label == label)
                        .unwrap_or(current.children.len() - 1)
                }
            };
            current = &mut current.children[pos];
        }

        if current.route_id.replace(route_id.to_string()).is_none() {
            self.size += 1;
        } else {
            tracing::debug!(pattern = %pattern, route_id, "duplicate pattern overwrote terminal route");
        }
    }

    /// Find the route matching `path`, returning captured parameters.
    pub fn search(&self, path: &str) -> Option<(&str, PathParams)> {
        let path = normalize_path(path);
        let segments = split_path(&path);
        let mut params = PathParams::new();

        Self::descend(&self.root, &segments, 0, &mut params)
            .map(|route_id| (route_id, params))
    }

    fn descend<'a>(
        node: &'a Node,
        segments: &[&str],
        index: usize,
        params: &mut PathParams,
    ) -> Option<&'a str> {
        if index >= segments.len() {
            return node.route_id.as_deref();
        }

        let segment = segments[index];
        for child in &node.children {
            match child.kind {
                NodeKind::Static => {
                    if child.label == segment {
                        if let Some(found) = Self::descend(child, segments, index + 1, params) {
                            return Some(found);
                        }
                    }
                }
                NodeKind::Param => {
                    params.insert(child.label.clone(), segment.to_string());
                    if let Some(found) = Self::descend(child, segments, index + 1, params) {
                        return Some(found);
                    }
                    // Backtrack: this branch did not terminate.
                    params.remove(&child.label);
                }
                NodeKind::Wildcard => {
                    if child.route_id.is_some() {
                        params.insert("*".to_string(), segments[index..].join("/"));
                        return child.route_id.as_deref();
                    }
                }
            }
        }

        None
    }
}

/// Enforce a leading slash and drop a single trailing slash (except root).
pub fn normalize_path(path: &str) -> String {
    let mut path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

fn classify_segment(segment: &str) -> (NodeKind, &str) {
    if segment == "*" {
        (NodeKind::Wildcard, "")
    } else if let Some(name) = segment.strip_prefix(':') {
        (NodeKind::Param, name)
    } else {
        (NodeKind::Static, segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(patterns: &[(&str, &str)]) -> RadixTree {
        let mut t = RadixTree::new();
        for (pattern, id) in patterns {
            t.insert(pattern, id);
        }
        t
    }

    #[test]
    fn exact_match() {
        let t = tree(&[("/api/users", "r1")]);
        let (id, params) = t.search("/api/users").unwrap();
        assert_eq!(id, "r1");
        assert!(params.is_empty());
    }

    #[test]
    fn inserted_pattern_survives_later_inserts() {
        let mut t = tree(&[("/api/users", "r1")]);
        t.insert("/api/orders", "r2");
        t.insert("/api/users/:id/posts", "r3");
        assert_eq!(t.search("/api/users").unwrap().0, "r1");
    }

    #[test]
    fn param_capture() {
        let t = tree(&[("/api/users/:id", "r1")]);
        let (id, params) = t.search("/api/users/42").unwrap();
        assert_eq!(id, "r1");
        assert_eq!(params.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn wildcard_captures_remainder() {
        let t = tree(&[("/files/*", "r1")]);
        let (id, params) = t.search("/files/a/b/c.txt").unwrap();
        assert_eq!(id, "r1");
        assert_eq!(params.get("*").map(String::as_str), Some("a/b/c.txt"));
    }

    #[test]
    fn static_beats_param_beats_wildcard() {
        let t = tree(&[("/a/b", "stat"), ("/a/:x", "par"), ("/a/*", "wild")]);

        assert_eq!(t.search("/a/b").unwrap().0, "stat");

        let (id, params) = t.search("/a/c").unwrap();
        assert_eq!(id, "par");
        assert_eq!(params.get("x").map(String::as_str), Some("c"));

        let (id, params) = t.search("/a/c/d").unwrap();
        assert_eq!(id, "wild");
        assert_eq!(params.get("*").map(String::as_str), Some("c/d"));
    }

    #[test]
    fn param_backtracks_when_branch_dead_ends() {
        // /a/:x/end only matches 3-segment paths; /a/* catches the rest.
        let t = tree(&[("/a/:x/end", "par"), ("/a/*", "wild")]);

        let (id, params) = t.search("/a/v/end").unwrap();
        assert_eq!(id, "par");
        assert_eq!(params.get("x").map(String::as_str), Some("v"));

        let (id, params) = t.search("/a/v/other").unwrap();
        assert_eq!(id, "wild");
        // The failed param branch must not leak its capture.
        assert!(!params.contains_key("x"));
    }

    #[test]
    fn trailing_slash_is_insignificant() {
        let t = tree(&[("/api/users", "r1")]);
        assert_eq!(t.search("/api/users").unwrap().0, "r1");
        assert_eq!(t.search("/api/users/").unwrap().0, "r1");
    }

    #[test]
    fn duplicate_insert_last_write_wins() {
        let mut t = tree(&[("/api", "old")]);
        t.insert("/api", "new");
        assert_eq!(t.search("/api").unwrap().0, "new");
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn no_match_returns_none() {
        let t = tree(&[("/api/users", "r1")]);
        assert!(t.search("/api/orders").is_none());
        assert!(t.search("/api/users/42").is_none());
        assert!(t.search("/").is_none());
    }

    #[test]
    fn root_pattern() {
        let t = tree(&[("/", "root")]);
        assert_eq!(t.search("/").unwrap().0, "root");
    }

    #[test]
    fn wildcard_requires_at_least_one_segment() {
        let t = tree(&[("/files/*", "r1")]);
        assert!(t.search("/files").is_none());
    }
}
