//! Subscription tree: topic-pattern matching for pubsub fan-out.
//!
//! Patterns are hierarchical `/`-separated paths, either exact topics
//! (`devices/room1/temp`) or prefix patterns whose final segment is `#`
//! (`devices/building1/#`). Matching walks the topic's segments through a
//! trie, so cost is proportional to topic depth, never to subscriber count.
//!
//! A prefix pattern also matches the topic naming its own prefix:
//! `devices/b1/#` matches `devices/b1` as well as everything below it.

use gridbus_types::Identity;
use std::collections::{BTreeSet, HashMap};

/// Wildcard segment: matches any remaining topic suffix.
const WILDCARD: &str = "#";

/// Errors produced while validating topic patterns.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// Pattern or topic was empty.
    #[error("empty topic pattern")]
    Empty,
    /// A segment between separators was empty (`a//b`).
    #[error("pattern contains an empty segment")]
    EmptySegment,
    /// `#` appeared somewhere other than the final segment.
    #[error("wildcard '#' is only valid as the final segment")]
    WildcardNotTerminal,
}

fn split_validated(pattern: &str) -> Result<Vec<&str>, PatternError> {
    if pattern.is_empty() {
        return Err(PatternError::Empty);
    }
    let segments: Vec<&str> = pattern.split('/').collect();
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(PatternError::EmptySegment);
        }
        if *segment == WILDCARD && i != segments.len() - 1 {
            return Err(PatternError::WildcardNotTerminal);
        }
    }
    Ok(segments)
}

/// Standalone pattern check with the same semantics as the tree.
///
/// Shared with capability matching: a capability `publish:devices/#` grants
/// publishing on every topic the pattern matches.
pub fn pattern_matches(pattern: &str, topic: &str) -> bool {
    let (Ok(pattern_segs), Ok(topic_segs)) = (split_validated(pattern), split_validated(topic))
    else {
        return false;
    };
    for (i, pseg) in pattern_segs.iter().enumerate() {
        if *pseg == WILDCARD {
            // `a/b/#` matches `a/b` and anything below it.
            return true;
        }
        match topic_segs.get(i) {
            Some(tseg) if tseg == pseg => {}
            _ => return false,
        }
    }
    pattern_segs.len() == topic_segs.len()
}

#[derive(Debug, Default)]
struct Node {
    /// Identities whose exact pattern terminates here.
    exact: BTreeSet<Identity>,
    /// Identities holding a `#` pattern rooted here.
    prefix: BTreeSet<Identity>,
    children: HashMap<String, Node>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefix.is_empty() && self.children.is_empty()
    }

    fn remove_identity(&mut self, identity: &Identity) -> usize {
        let mut removed = 0;
        removed += usize::from(self.exact.remove(identity));
        removed += usize::from(self.prefix.remove(identity));
        self.children.retain(|_, child| {
            removed += child.remove_identity(identity);
            !child.is_empty()
        });
        removed
    }
}

/// Mapping of topic pattern → subscriber identities.
///
/// Owned exclusively by the router's dispatch task; mutation and matching
/// never interleave within one dispatch.
#[derive(Debug, Default)]
pub struct SubscriptionTree {
    root: Node,
    subscription_count: usize,
}

impl SubscriptionTree {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live `(identity, pattern)` subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscription_count
    }

    /// True when no subscriptions exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscription_count == 0
    }

    /// Add a subscription. Returns `false` when the identical
    /// `(identity, pattern)` pair already existed (idempotent).
    pub fn subscribe(&mut self, identity: Identity, pattern: &str) -> Result<bool, PatternError> {
        let segments = split_validated(pattern)?;
        let is_prefix = segments.last() == Some(&WILDCARD);
        let path = if is_prefix {
            &segments[..segments.len() - 1]
        } else {
            &segments[..]
        };

        let mut node = &mut self.root;
        for segment in path {
            node = node.children.entry((*segment).to_string()).or_default();
        }
        let added = if is_prefix {
            node.prefix.insert(identity)
        } else {
            node.exact.insert(identity)
        };
        if added {
            self.subscription_count += 1;
        }
        Ok(added)
    }

    /// Remove one subscription. Returns `true` if it existed.
    pub fn unsubscribe(&mut self, identity: &Identity, pattern: &str) -> Result<bool, PatternError> {
        let segments = split_validated(pattern)?;
        let is_prefix = segments.last() == Some(&WILDCARD);
        let path = if is_prefix {
            &segments[..segments.len() - 1]
        } else {
            &segments[..]
        };

        let removed = Self::remove_at(&mut self.root, path, is_prefix, identity);
        if removed {
            self.subscription_count -= 1;
        }
        Ok(removed)
    }

    fn remove_at(node: &mut Node, path: &[&str], is_prefix: bool, identity: &Identity) -> bool {
        match path.split_first() {
            None => {
                if is_prefix {
                    node.prefix.remove(identity)
                } else {
                    node.exact.remove(identity)
                }
            }
            Some((head, rest)) => {
                let Some(child) = node.children.get_mut(*head) else {
                    return false;
                };
                let removed = Self::remove_at(child, rest, is_prefix, identity);
                if child.is_empty() {
                    node.children.remove(*head);
                }
                removed
            }
        }
    }

    /// Every identity whose active pattern matches `topic`, as of now.
    ///
    /// Returns an empty set for invalid topics; publishing to a malformed
    /// topic is the caller's error to surface.
    #[must_use]
    pub fn collect(&self, topic: &str) -> BTreeSet<Identity> {
        let Ok(segments) = split_validated(topic) else {
            return BTreeSet::new();
        };

        let mut matched = BTreeSet::new();
        let mut node = &self.root;
        matched.extend(node.prefix.iter().cloned());
        for segment in &segments {
            match node.children.get(*segment) {
                Some(child) => {
                    node = child;
                    matched.extend(node.prefix.iter().cloned());
                }
                None => return matched,
            }
        }
        matched.extend(node.exact.iter().cloned());
        matched
    }

    /// Drop every subscription held by `identity` (disconnect cleanup).
    /// Returns how many were removed.
    pub fn remove_identity(&mut self, identity: &Identity) -> usize {
        let removed = self.root.remove_identity(identity);
        self.subscription_count -= removed;
        removed
    }
}
