//! Tree reconstruction and subtree resolution.
//!
//! Categories are stored flat with parent pointers. Every load rebuilds an
//! owned tree snapshot from scratch: one grouping pass keyed by parent id,
//! then a recursive materialization that looks each node's children up in
//! that index. Nothing holds live parent/child references, so a later
//! mutation can never leave a dangling node behind.
//!
//! Siblings are ordered by case-insensitive name, then by id, since the
//! store guarantees no fetch order.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::{CategoryNode, CategoryRecord, CourseRecord};

/// Display name for courses whose category is missing or unknown.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Owned snapshot of the category forest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryTree {
    roots: Vec<CategoryNode>,
    excluded: Vec<CategoryRecord>,
}

/// Build the category forest from flat records.
///
/// Records whose ancestor chain never reaches a root (self-parented or part
/// of a parent loop, or hanging below one) are left out of the tree and
/// reported through [`CategoryTree::excluded`]. Records whose parent does not
/// exist are promoted to roots and keep their stored `parent_id`.
pub fn build_tree(records: &[CategoryRecord]) -> CategoryTree {
    let by_id: HashMap<&str, &CategoryRecord> =
        records.iter().map(|r| (r.id.as_str(), r)).collect();
    let rooted = classify(records, &by_id);

    let mut children_of: HashMap<Option<&str>, Vec<&CategoryRecord>> = HashMap::new();
    let mut excluded = Vec::new();

    for record in records {
        if !rooted.get(record.id.as_str()).copied().unwrap_or(false) {
            excluded.push(record.clone());
            continue;
        }
        let parent = record
            .parent_id
            .as_deref()
            .filter(|pid| by_id.contains_key(pid));
        children_of.entry(parent).or_default().push(record);
    }

    for siblings in children_of.values_mut() {
        siblings.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    if !excluded.is_empty() {
        let ids: Vec<&str> = excluded.iter().map(|r| r.id.as_str()).collect();
        tracing::warn!(count = excluded.len(), ids = ?ids, "Excluded categories with cyclic parent chains");
    }

    let roots = children_of
        .get(&None)
        .map(|records| {
            records
                .iter()
                .map(|r| materialize(r, &children_of))
                .collect()
        })
        .unwrap_or_default();

    CategoryTree { roots, excluded }
}

/// For every record, whether its ancestor chain terminates at a root.
///
/// Each walk stops when it reaches a record already classified, revisits a
/// record on its own path, or runs off the top of the forest, so the total
/// work is linear in the number of records.
fn classify<'a>(
    records: &'a [CategoryRecord],
    by_id: &HashMap<&'a str, &'a CategoryRecord>,
) -> HashMap<&'a str, bool> {
    let mut rooted: HashMap<&'a str, bool> = HashMap::with_capacity(records.len());

    for record in records {
        let mut path: Vec<&'a str> = Vec::new();
        let mut on_path: HashSet<&'a str> = HashSet::new();
        let mut current = record;

        let verdict = loop {
            if let Some(&known) = rooted.get(current.id.as_str()) {
                break known;
            }
            if !on_path.insert(current.id.as_str()) {
                break false;
            }
            path.push(current.id.as_str());
            match current
                .parent_id
                .as_deref()
                .and_then(|pid| by_id.get(pid).copied())
            {
                Some(parent) => current = parent,
                None => break true,
            }
        };

        for id in path {
            rooted.insert(id, verdict);
        }
    }

    rooted
}

fn materialize(
    record: &CategoryRecord,
    children_of: &HashMap<Option<&str>, Vec<&CategoryRecord>>,
) -> CategoryNode {
    let mut node = CategoryNode::from_record(record);
    if let Some(children) = children_of.get(&Some(record.id.as_str())) {
        node.children = children
            .iter()
            .map(|child| materialize(child, children_of))
            .collect();
    }
    node
}

impl CategoryTree {
    pub fn roots(&self) -> &[CategoryNode] {
        &self.roots
    }

    /// Records left out because their parent chain loops.
    pub fn excluded(&self) -> &[CategoryRecord] {
        &self.excluded
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.depth_first().count()
    }

    /// Find a node anywhere in the forest.
    pub fn locate(&self, id: &str) -> Option<&CategoryNode> {
        self.depth_first().map(|(_, node)| node).find(|n| n.id == id)
    }

    /// Closed set of the node with `id`, or `None` if it is not in the tree.
    pub fn closed_set_of(&self, id: &str) -> Option<BTreeSet<String>> {
        self.locate(id).map(closed_set)
    }

    /// Pre-order walk yielding `(depth, node)`, roots at depth 0.
    pub fn depth_first(&self) -> DepthFirst<'_> {
        DepthFirst {
            stack: self.roots.iter().rev().map(|n| (0, n)).collect(),
        }
    }

    /// Stored fields of every node, in pre-order.
    pub fn flatten(&self) -> Vec<CategoryRecord> {
        self.depth_first().map(|(_, n)| n.record()).collect()
    }

    /// Name of a category, falling back to [`UNCATEGORIZED`].
    pub fn category_name(&self, id: Option<&str>) -> &str {
        id.and_then(|id| self.locate(id))
            .map_or(UNCATEGORIZED, |n| n.name.as_str())
    }

    /// Number of courses filed under each category's closed set.
    ///
    /// Courses whose category is not in the tree are not counted anywhere.
    pub fn course_counts(&self, courses: &[CourseRecord]) -> HashMap<String, usize> {
        let mut direct: HashMap<&str, usize> = HashMap::new();
        for course in courses {
            if let Some(cat) = course.category_id.as_deref() {
                *direct.entry(cat).or_default() += 1;
            }
        }

        fn accumulate(
            node: &CategoryNode,
            direct: &HashMap<&str, usize>,
            out: &mut HashMap<String, usize>,
        ) -> usize {
            let own = direct.get(node.id.as_str()).copied().unwrap_or(0);
            let total = own
                + node
                    .children
                    .iter()
                    .map(|c| accumulate(c, direct, out))
                    .sum::<usize>();
            out.insert(node.id.clone(), total);
            total
        }

        let mut counts = HashMap::new();
        for root in &self.roots {
            accumulate(root, &direct, &mut counts);
        }
        counts
    }
}

/// `{node.id}` plus the ids of every descendant.
///
/// Course filtering by a category must include courses filed directly on it,
/// so the node itself is always part of the set.
pub fn closed_set(node: &CategoryNode) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        ids.insert(current.id.clone());
        stack.extend(current.children.iter());
    }
    ids
}

/// Iterator returned by [`CategoryTree::depth_first`].
pub struct DepthFirst<'a> {
    stack: Vec<(usize, &'a CategoryNode)>,
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = (usize, &'a CategoryNode);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, node) = self.stack.pop()?;
        self.stack
            .extend(node.children.iter().rev().map(|c| (depth + 1, c)));
        Some((depth, node))
    }
}
