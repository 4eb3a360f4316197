// src/tree.rs
//! Segment tree used to resolve a method and path to a route.
//!
//! Each node is one path segment. Children are kept sorted by
//! `(kind, text)`, so a lookup tries static segments before parameters and
//! parameters before catch-alls, backtracking out of a branch that does not
//! lead to a registered route.

use std::collections::BTreeMap;
use std::fmt;

use crate::context::Params;
use crate::error::ConfigError;
use crate::http::Method;
use crate::router::Handler;

const PARAM_MARKER: char = ':';
const CATCH_ALL_MARKER: char = '*';

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SegmentKind {
    Static,
    Param,
    CatchAll,
}

/// A handler and its route-local middleware, registered under one method.
#[derive(Clone)]
pub struct RouteTarget {
    pub handler: Handler,
    pub middleware: Vec<Handler>,
}

impl fmt::Debug for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTarget")
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

struct Segment<'p> {
    raw: &'p str,
    kind: SegmentKind,
    name: Option<&'p str>,
}

#[derive(Debug)]
struct Node {
    segment: String,
    kind: SegmentKind,
    name: Option<String>,
    children: Vec<Node>,
    targets: BTreeMap<Method, RouteTarget>,
}

impl Node {
    fn new(segment: &Segment<'_>) -> Self {
        Self {
            segment: segment.raw.to_string(),
            kind: segment.kind,
            name: segment.name.map(str::to_string),
            children: Vec::new(),
            targets: BTreeMap::new(),
        }
    }

    fn root() -> Self {
        Self {
            segment: String::new(),
            kind: SegmentKind::Static,
            name: None,
            children: Vec::new(),
            targets: BTreeMap::new(),
        }
    }

    fn child_mut(&mut self, segment: &Segment<'_>) -> &mut Node {
        let existing = self
            .children
            .iter()
            .position(|c| c.kind == segment.kind && c.segment == segment.raw);
        let idx = match existing {
            Some(idx) => idx,
            None => {
                self.children.push(Node::new(segment));
                self.children
                    .sort_by(|a, b| (a.kind, &a.segment).cmp(&(b.kind, &b.segment)));
                self.children
                    .iter()
                    .position(|c| c.kind == segment.kind && c.segment == segment.raw)
                    .unwrap_or(self.children.len() - 1)
            }
        };
        &mut self.children[idx]
    }
}

/// Methods registered at a matched path, in name order.
#[derive(Clone, Copy)]
pub struct AllowedMethods<'t> {
    targets: Option<&'t BTreeMap<Method, RouteTarget>>,
}

impl<'t> AllowedMethods<'t> {
    pub fn iter(self) -> impl Iterator<Item = Method> + 't {
        self.targets.into_iter().flat_map(|t| t.keys().copied())
    }

    pub fn contains(&self, method: Method) -> bool {
        self.targets.is_some_and(|t| t.contains_key(&method))
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_none_or(BTreeMap::is_empty)
    }

    pub fn to_vec(&self) -> Vec<Method> {
        self.iter().collect()
    }
}

impl fmt::Debug for AllowedMethods<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Result of resolving a method and path.
#[derive(Debug, Clone, Copy)]
pub enum Resolution<'t> {
    /// No registered path matches.
    NotFound,
    /// The path matches but the method is not registered there.
    MethodNotAllowed(AllowedMethods<'t>),
    Matched {
        target: &'t RouteTarget,
        allowed: AllowedMethods<'t>,
    },
}

impl<'t> Resolution<'t> {
    pub fn target(&self) -> Option<&'t RouteTarget> {
        match self {
            Resolution::Matched { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn allowed(&self) -> Vec<Method> {
        match self {
            Resolution::NotFound => Vec::new(),
            Resolution::MethodNotAllowed(allowed) | Resolution::Matched { allowed, .. } => {
                allowed.to_vec()
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Resolution::NotFound)
    }

    pub fn is_method_not_allowed(&self) -> bool {
        matches!(self, Resolution::MethodNotAllowed(_))
    }
}

/// Strips a trailing `/` (except for the root path) and splits into
/// non-empty segments.
fn segments(path: &str) -> Vec<&str> {
    let path = if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    };
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Validates a pattern completely before the tree is touched.
fn parse_pattern(pattern: &str) -> Result<Vec<Segment<'_>>, ConfigError> {
    if !pattern.starts_with('/') {
        return Err(ConfigError::MissingLeadingSlash(pattern.to_string()));
    }
    let raw = segments(pattern);
    let mut parsed: Vec<Segment<'_>> = Vec::with_capacity(raw.len());

    for (i, &seg) in raw.iter().enumerate() {
        let (kind, name) = if let Some(name) = seg.strip_prefix(PARAM_MARKER) {
            (SegmentKind::Param, Some(name))
        } else if let Some(name) = seg.strip_prefix(CATCH_ALL_MARKER) {
            (SegmentKind::CatchAll, Some(name))
        } else {
            (SegmentKind::Static, None)
        };

        if let Some(name) = name {
            if name.is_empty() {
                return Err(ConfigError::EmptyCaptureName {
                    pattern: pattern.to_string(),
                });
            }
            if parsed.iter().any(|p| p.name == Some(name)) {
                return Err(ConfigError::DuplicateCapture {
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                });
            }
        }
        if kind == SegmentKind::CatchAll && i + 1 != raw.len() {
            return Err(ConfigError::CatchAllNotTerminal {
                pattern: pattern.to_string(),
                segment: seg.to_string(),
            });
        }
        parsed.push(Segment { raw: seg, kind, name });
    }
    Ok(parsed)
}

/// Rebuilds the normalized form of a parsed pattern.
fn normalized(parsed: &[Segment<'_>]) -> String {
    if parsed.is_empty() {
        return "/".to_string();
    }
    parsed.iter().fold(String::new(), |mut acc, s| {
        acc.push('/');
        acc.push_str(s.raw);
        acc
    })
}

/// The route tree. Built with `&mut self` during setup, then shared
/// read-only across request threads.
#[derive(Debug)]
pub struct PathTree {
    root: Node,
    len: usize,
}

impl PathTree {
    pub fn new() -> Self {
        Self {
            root: Node::root(),
            len: 0,
        }
    }

    /// Registers `handler` for `method` at `pattern`.
    ///
    /// Pattern segments are static text, `:name` (one segment) or `*name`
    /// (the remaining one or more segments; must come last). A rejected
    /// pattern leaves the tree unchanged.
    pub fn add(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Handler,
        middleware: Vec<Handler>,
    ) -> Result<(), ConfigError> {
        let parsed = parse_pattern(pattern)?;
        self.check_catch_all_conflict(pattern, &parsed)?;
        if self.has_route(method, &parsed) {
            return Err(ConfigError::DuplicateRoute {
                method,
                path: normalized(&parsed),
            });
        }

        let mut current = &mut self.root;
        for segment in &parsed {
            current = current.child_mut(segment);
        }
        current
            .targets
            .insert(method, RouteTarget { handler, middleware });
        self.len += 1;
        Ok(())
    }

    fn check_catch_all_conflict(
        &self,
        pattern: &str,
        parsed: &[Segment<'_>],
    ) -> Result<(), ConfigError> {
        let mut current = &self.root;
        for segment in parsed {
            if segment.kind == SegmentKind::CatchAll {
                let clash = current
                    .children
                    .iter()
                    .find(|c| c.kind == SegmentKind::CatchAll && c.segment != segment.raw);
                if let Some(existing) = clash {
                    return Err(ConfigError::ConflictingCatchAll {
                        pattern: pattern.to_string(),
                        segment: segment.raw.to_string(),
                        existing: existing.segment.clone(),
                    });
                }
            }
            match current
                .children
                .iter()
                .find(|c| c.kind == segment.kind && c.segment == segment.raw)
            {
                Some(child) => current = child,
                None => return Ok(()),
            }
        }
        Ok(())
    }

    fn has_route(&self, method: Method, parsed: &[Segment<'_>]) -> bool {
        let mut current = &self.root;
        for segment in parsed {
            match current
                .children
                .iter()
                .find(|c| c.kind == segment.kind && c.segment == segment.raw)
            {
                Some(child) => current = child,
                None => return false,
            }
        }
        current.targets.contains_key(&method)
    }

    /// Resolves `method` and `path`, writing captures into `params`.
    ///
    /// `params` is cleared first. On [`Resolution::NotFound`] it is left
    /// empty.
    pub fn find_into<'t>(
        &'t self,
        method: Method,
        path: &str,
        params: &mut Params,
    ) -> Resolution<'t> {
        params.clear();
        let segs = segments(path);
        let Some(node) = search(&self.root, &segs, 0, params) else {
            params.clear();
            return Resolution::NotFound;
        };
        let allowed = AllowedMethods {
            targets: Some(&node.targets),
        };
        match node.targets.get(&method) {
            Some(target) => Resolution::Matched { target, allowed },
            None => Resolution::MethodNotAllowed(allowed),
        }
    }

    pub fn find(&self, method: Method, path: &str) -> (Resolution<'_>, Params) {
        let mut params = Params::new();
        let resolution = self.find_into(method, path, &mut params);
        (resolution, params)
    }

    /// Every registered `(method, pattern)` pair in tree order.
    pub fn routes(&self) -> Vec<(Method, String)> {
        let mut out = Vec::with_capacity(self.len);
        collect(&self.root, &mut String::new(), &mut out);
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for PathTree {
    fn default() -> Self {
        Self::new()
    }
}

fn search<'t>(
    node: &'t Node,
    segments: &[&str],
    depth: usize,
    params: &mut Params,
) -> Option<&'t Node> {
    if depth == segments.len() {
        return (!node.targets.is_empty()).then_some(node);
    }
    let segment = segments[depth];

    for child in &node.children {
        match child.kind {
            SegmentKind::Static => {
                if child.segment == segment {
                    if let Some(found) = search(child, segments, depth + 1, params) {
                        return Some(found);
                    }
                }
            }
            SegmentKind::Param => {
                let mark = params.len();
                if let Some(name) = &child.name {
                    params.push(name, segment.to_string());
                }
                if let Some(found) = search(child, segments, depth + 1, params) {
                    return Some(found);
                }
                // Backtrack
                params.truncate(mark);
            }
            SegmentKind::CatchAll => {
                if child.targets.is_empty() {
                    continue;
                }
                if let Some(name) = &child.name {
                    params.push(name, segments[depth..].join("/"));
                }
                return Some(child);
            }
        }
    }
    None
}

fn collect(node: &Node, prefix: &mut String, out: &mut Vec<(Method, String)>) {
    let path = if prefix.is_empty() { "/" } else { prefix.as_str() };
    for method in node.targets.keys() {
        out.push((*method, path.to_string()));
    }
    for child in &node.children {
        let len = prefix.len();
        prefix.push('/');
        prefix.push_str(&child.segment);
        collect(child, prefix, out);
        prefix.truncate(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::error::HandlerResult;
    use std::sync::Arc;

    fn noop() -> Handler {
        Arc::new(|_: &mut Context| -> HandlerResult { Ok(()) })
    }

    #[test]
    fn test_tree_static() {
        let mut tree = PathTree::new();
        tree.add(Method::Get, "/hello/world", noop(), vec![]).unwrap();

        assert!(tree.find(Method::Get, "/hello/world").0.target().is_some());
        assert!(tree.find(Method::Get, "/hello").0.is_not_found());
        assert!(tree.find(Method::Post, "/hello/world").0.is_method_not_allowed());
    }

    #[test]
    fn test_tree_params() {
        let mut tree = PathTree::new();
        tree.add(Method::Get, "/users/:id", noop(), vec![]).unwrap();
        tree.add(Method::Post, "/users/:id/posts/:post_id", noop(), vec![])
            .unwrap();

        let (res, params) = tree.find(Method::Get, "/users/123");
        assert!(res.target().is_some());
        assert_eq!(params.get("id"), Some("123"));

        let (res, params) = tree.find(Method::Post, "/users/123/posts/abc");
        assert!(res.target().is_some());
        assert_eq!(params.get("id"), Some("123"));
        assert_eq!(params.get("post_id"), Some("abc"));
    }

    #[test]
    fn test_tree_catch_all() {
        let mut tree = PathTree::new();
        tree.add(Method::Get, "/assets/*path", noop(), vec![]).unwrap();

        let (res, params) = tree.find(Method::Get, "/assets/js/app.js");
        assert!(res.target().is_some());
        assert_eq!(params.get("path"), Some("js/app.js"));

        // A catch-all needs at least one segment.
        assert!(tree.find(Method::Get, "/assets").0.is_not_found());
    }

    #[test]
    fn test_children_sorted_by_kind_then_text() {
        let mut tree = PathTree::new();
        tree.add(Method::Get, "/*rest", noop(), vec![]).unwrap();
        tree.add(Method::Get, "/:b", noop(), vec![]).unwrap();
        tree.add(Method::Get, "/zeta", noop(), vec![]).unwrap();
        tree.add(Method::Get, "/:a", noop(), vec![]).unwrap();
        tree.add(Method::Get, "/alpha", noop(), vec![]).unwrap();

        let order: Vec<_> = tree
            .root
            .children
            .iter()
            .map(|c| (c.kind, c.segment.as_str()))
            .collect();
        assert_eq!(
            order,
            [
                (SegmentKind::Static, "alpha"),
                (SegmentKind::Static, "zeta"),
                (SegmentKind::Param, ":a"),
                (SegmentKind::Param, ":b"),
                (SegmentKind::CatchAll, "*rest"),
            ]
        );
    }

    #[test]
    fn test_backtracking_unbinds_params() {
        let mut tree = PathTree::new();
        tree.add(Method::Get, "/:org/settings", noop(), vec![]).unwrap();
        tree.add(Method::Get, "/*path", noop(), vec![]).unwrap();

        let (res, params) = tree.find(Method::Get, "/acme/members");
        assert!(res.target().is_some());
        assert_eq!(params.get("org"), None);
        assert_eq!(params.get("path"), Some("acme/members"));
    }

    #[test]
    fn test_rejected_pattern_leaves_tree_untouched() {
        let mut tree = PathTree::new();
        let err = tree
            .add(Method::Get, "/a/*rest/b", noop(), vec![])
            .unwrap_err();
        assert!(matches!(err, ConfigError::CatchAllNotTerminal { .. }));
        assert!(tree.root.children.is_empty());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_routes_listing() {
        let mut tree = PathTree::new();
        tree.add(Method::Get, "/", noop(), vec![]).unwrap();
        tree.add(Method::Post, "/users/", noop(), vec![]).unwrap();
        tree.add(Method::Get, "/users/:id", noop(), vec![]).unwrap();

        assert_eq!(
            tree.routes(),
            vec![
                (Method::Get, "/".to_string()),
                (Method::Post, "/users".to_string()),
                (Method::Get, "/users/:id".to_string()),
            ]
        );
    }
}
