use std::collections::HashMap;

/// Path-segment trie with `*` wildcard nodes.
///
/// Patterns and candidate paths are `/`-separated actor paths. A `*` segment
/// in a pattern matches exactly one segment of the candidate. The matcher is
/// consulted once per outbound send to pick the large-message pipeline, so
/// lookups allocate nothing.
#[derive(Debug, Default)]
pub struct WildcardMatcher {
    root: Node,
}

#[derive(Debug, Default)]
struct Node {
    children: HashMap<String, Node>,
    wildcard: Option<Box<Node>>,
    terminal: bool,
}

impl WildcardMatcher {
    pub fn new(patterns: &[String]) -> Self {
        let mut matcher = WildcardMatcher::default();
        for pattern in patterns {
            matcher.insert(pattern);
        }
        matcher
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty() && self.root.wildcard.is_none() && !self.root.terminal
    }

    fn insert(&mut self, pattern: &str) {
        let mut node = &mut self.root;
        for segment in pattern.split('/').filter(|s| !s.is_empty()) {
            node = if segment == "*" {
                node.wildcard.get_or_insert_with(Box::default)
            } else {
                node.children.entry(segment.to_owned()).or_default()
            };
        }
        node.terminal = true;
    }

    pub fn matches(&self, path: &str) -> bool {
        fn walk<'a>(node: &Node, mut segments: impl Iterator<Item = &'a str> + Clone) -> bool {
            match segments.next() {
                None => node.terminal,
                Some(segment) => {
                    if let Some(child) = node.children.get(segment) {
                        if walk(child, segments.clone()) {
                            return true;
                        }
                    }
                    if let Some(wildcard) = &node.wildcard {
                        return walk(wildcard, segments);
                    }
                    false
                }
            }
        }

        walk(&self.root, path.split('/').filter(|s| !s.is_empty()))
    }
}
