//! Reconstructs a post's threaded discussion from one flat, chronologically
//! ordered load. Pure: no data access happens here.

use std::collections::HashMap;

use super::{CommentNode, CommentWithCounts};

/// Build the reply forest for one post.
///
/// Top-level comments (no parent) become roots; every other comment is
/// attached to its parent's reply list in input order. A comment whose parent
/// is not part of `comments` is dropped together with its own replies: it
/// appears neither under a parent nor at the top level.
///
/// Runs in O(n) and never recurses, so thread depth is unbounded.
pub fn build_comment_tree(comments: Vec<CommentWithCounts>) -> Vec<CommentNode> {
    let index: HashMap<i64, usize> = comments
        .iter()
        .enumerate()
        .map(|(pos, c)| (c.comment.id, pos))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); comments.len()];
    let mut roots = Vec::new();
    for (pos, c) in comments.iter().enumerate() {
        match c.comment.parent_id {
            None => roots.push(pos),
            Some(parent_id) => {
                if let Some(&parent) = index.get(&parent_id) {
                    children[parent].push(pos);
                }
            }
        }
    }

    let mut pending: Vec<Option<CommentWithCounts>> = comments.into_iter().map(Some).collect();
    let mut built: Vec<Option<CommentNode>> = pending.iter().map(|_| None).collect();

    // Post-order walk: a node is assembled only after all of its replies.
    let mut stack: Vec<(usize, bool)> = roots.iter().rev().map(|&r| (r, false)).collect();
    while let Some((pos, expanded)) = stack.pop() {
        if expanded {
            let replies = children[pos]
                .iter()
                .filter_map(|&child| built[child].take())
                .collect();
            if let Some(entry) = pending[pos].take() {
                built[pos] = Some(CommentNode { entry, replies });
            }
        } else {
            stack.push((pos, true));
            stack.extend(children[pos].iter().rev().map(|&child| (child, false)));
        }
    }

    roots
        .into_iter()
        .filter_map(|root| built[root].take())
        .collect()
}

/// Detach the subtree rooted at `comment_id` from a forest.
pub fn take_subtree(forest: Vec<CommentNode>, comment_id: i64) -> Option<CommentNode> {
    let mut stack = forest;
    while let Some(mut node) = stack.pop() {
        if node.entry.comment.id == comment_id {
            return Some(node);
        }
        stack.append(&mut node.replies);
    }
    None
}
