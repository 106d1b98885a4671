//! Query execution: planning the scan and enumerating matches.
//!
//! A query keeps a stack of equations to scan. Each `||` contributes both
//! children, each `&&` only its better-scored side, since every match of an
//! `&&` must also match that side. Equations are popped one at a time, their
//! index scanned, and every candidate re-checked against the `&&` siblings on
//! its way to the root.

use std::fmt;

use fnv::FnvHashSet;

use crate::config::QueryLimits;
use crate::error::{QueryError, Result};
use crate::policy::{Context, Entry, Index, IndexIterator};
use crate::types::{Dirent, Listener, NodeId, QueryFlags, DIRENT_SIZE};

use super::expression::Expression;
use super::operator::Combinator;
use super::term::{Term, TermId, TermTree};

/// An open query over one volume.
///
/// A query is driven by one caller at a time; several queries may scan the
/// same volume concurrently.
pub struct Query<'c, C: Context> {
    pub(super) context: &'c C,
    pub(super) expression: Expression,
    index: C::Index,
    stack: Vec<TermId>,
    current: Option<TermId>,
    iterator: Option<C::Iterator>,
    pub(super) flags: QueryFlags,
    pub(super) listener: Listener,
    pub(super) needs_entry: bool,
    /// Set when more than one equation is scanned, so results can repeat.
    dedupe: bool,
    seen: FnvHashSet<(NodeId, NodeId, String)>,
    /// A match that did not fit the caller's buffer.
    pending: Option<Dirent>,
}

impl<'c, C: Context> Query<'c, C> {
    /// Parses `text` and prepares a query over `context`.
    ///
    /// `listener` only receives notifications when `flags` contains
    /// [`QueryFlags::LIVE_QUERY`] and the host forwards changes through
    /// [`Query::live_update`].
    pub fn create(
        context: &'c C,
        text: &str,
        flags: QueryFlags,
        listener: Listener,
    ) -> Result<Self> {
        Self::create_with_limits(context, text, flags, listener, QueryLimits::default())
    }

    pub fn create_with_limits(
        context: &'c C,
        text: &str,
        flags: QueryFlags,
        listener: Listener,
        limits: QueryLimits,
    ) -> Result<Self> {
        let expression = Expression::parse_with_limits(text, limits)?;
        Ok(Self::new(context, expression, flags, listener))
    }

    /// Builds a query from an already parsed expression.
    pub fn new(
        context: &'c C,
        mut expression: Expression,
        flags: QueryFlags,
        listener: Listener,
    ) -> Self {
        let mut index = context.open_index();
        let root = expression.root();
        expression.tree_mut().calculate_score(root, &mut index);
        index.unset();
        let needs_entry = expression.tree().needs_entry(root);

        let mut query = Self {
            context,
            expression,
            index,
            stack: Vec::new(),
            current: None,
            iterator: None,
            flags,
            listener,
            needs_entry,
            dedupe: false,
            seen: FnvHashSet::default(),
            pending: None,
        };
        query.rewind();
        query
    }

    /// Drops the open scan and rebuilds the equation stack.
    pub fn rewind(&mut self) {
        self.stack.clear();
        self.iterator = None;
        self.current = None;
        self.seen.clear();
        self.pending = None;

        let tree = self.expression.tree();
        let mut walk = vec![self.expression.root()];
        while let Some(id) = walk.pop() {
            match tree.get(id) {
                Some(Term::Operator(operator)) => match operator.combinator() {
                    Combinator::Or => {
                        walk.push(operator.left());
                        walk.push(operator.right());
                    }
                    Combinator::And => walk.push(operator.preferred_child(
                        tree.score(operator.left()),
                        tree.score(operator.right()),
                    )),
                },
                Some(Term::Equation(_)) => self.stack.push(id),
                None => log::error!("unknown term {} while planning query", id.get()),
            }
        }
        self.dedupe = self.stack.len() > 1;
        log::debug!(
            "query {} scans {} equation(s)",
            self.expression,
            self.stack.len()
        );
    }

    /// Returns the next matching entry, or `None` once the query is exhausted.
    ///
    /// A match whose name does not fit into `buffer_size` bytes fails with
    /// [`QueryError::BufferOverflow`] and is returned again by the next call.
    /// The index iterator is suspended between calls.
    pub fn get_next_entry(&mut self, buffer_size: usize) -> Result<Option<Dirent>> {
        if let Some(iterator) = self.iterator.as_mut() {
            iterator.resume();
        }
        let result = self.next_entry(buffer_size);
        if let Some(iterator) = self.iterator.as_mut() {
            iterator.suspend();
        }
        result
    }

    fn next_entry(&mut self, buffer_size: usize) -> Result<Option<Dirent>> {
        if let Some(dirent) = self.pending.take() {
            return self.deliver(dirent, buffer_size);
        }

        loop {
            let current = match (self.current, self.iterator.is_some()) {
                (Some(current), true) => current,
                _ => {
                    let Some(next) = self.stack.pop() else {
                        return Ok(None);
                    };
                    match self.prepare(next) {
                        Ok(iterator) => {
                            self.iterator = Some(iterator);
                            self.current = Some(next);
                            next
                        }
                        Err(err) if err.is_not_found() => continue,
                        Err(err) => {
                            log::warn!("skipping equation {}: {err}", next.get());
                            continue;
                        }
                    }
                }
            };

            let Some(iterator) = self.iterator.as_mut() else {
                continue;
            };
            match next_matching(self.expression.tree_mut(), current, self.context, iterator) {
                Ok(Some(dirent)) => {
                    if self.dedupe
                        && !self
                            .seen
                            .insert((dirent.pino, dirent.ino, dirent.name.clone()))
                    {
                        continue;
                    }
                    return self.deliver(dirent, buffer_size);
                }
                Ok(None) => {}
                Err(err) => log::warn!("scan of equation {} stopped: {err}", current.get()),
            }
            self.iterator = None;
            self.current = None;
        }
    }

    fn prepare(&mut self, id: TermId) -> Result<C::Iterator> {
        let query_non_indexed = self.flags.contains(QueryFlags::QUERY_NON_INDEXED);
        let equation = self
            .expression
            .tree_mut()
            .equation_mut(id)
            .ok_or_else(|| QueryError::CorruptTree(format!("term {} is not an equation", id.get())))?;
        equation.prepare_query(&mut self.index, query_non_indexed)
    }

    fn deliver(&mut self, dirent: Dirent, buffer_size: usize) -> Result<Option<Dirent>> {
        let needed = Dirent::required_size(&dirent.name);
        if needed > buffer_size {
            self.pending = Some(dirent);
            return Err(QueryError::BufferOverflow {
                needed,
                available: buffer_size,
            });
        }
        Ok(Some(dirent))
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    pub fn flags(&self) -> QueryFlags {
        self.flags
    }

    pub fn listener(&self) -> Listener {
        self.listener
    }

    /// Turns the query into a live query reporting to `listener`.
    pub fn set_live_mode(&mut self, listener: Listener) {
        self.listener = listener;
        self.flags |= QueryFlags::LIVE_QUERY;
    }
}

impl<C: Context> fmt::Debug for Query<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("expression", &self.expression.text())
            .field("flags", &self.flags)
            .field("listener", &self.listener)
            .field("stack", &self.stack)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

/// Pulls candidates for the equation `id` until one matches the whole query
/// branch it belongs to.
///
/// Candidates from the equation's own index are filtered by key; candidates
/// from a fallback scan are evaluated in full. Either way every `&&` on the
/// path to the root must also match.
fn next_matching<C: Context>(
    tree: &mut TermTree,
    id: TermId,
    context: &C,
    iterator: &mut C::Iterator,
) -> Result<Option<Dirent>> {
    let mut key = Vec::new();
    loop {
        if iterator.fetch_next_entry(&mut key)?.is_none() {
            return Ok(None);
        }

        let has_index = {
            let equation = tree
                .equation(id)
                .ok_or_else(|| QueryError::CorruptTree(format!("term {} is not an equation", id.get())))?;
            if equation.has_index() {
                match equation.check_index_key(&key) {
                    None => return Ok(None),
                    Some(false) => {
                        iterator.skip_duplicates();
                        continue;
                    }
                    Some(true) => {}
                }
            }
            equation.has_index()
        };

        let entry = match iterator.get_entry(context) {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("skipping index entry: {err}");
                continue;
            }
        };
        let node = entry.node();

        let mut matched = if has_index {
            true
        } else {
            match tree.match_term(id, Some(&entry), &node, None) {
                Ok(result) => result.is_match(),
                Err(err) => {
                    log::debug!("candidate {} not matched: {err}", entry.node_id());
                    false
                }
            }
        };

        let mut term = id;
        while matched {
            let Some(parent) = tree.parent(term) else {
                break;
            };
            let operator = tree
                .operator(parent)
                .ok_or_else(|| QueryError::CorruptTree(format!("parent {} is not an operator", parent.get())))?;
            if operator.combinator() == Combinator::And {
                let Some(other) = operator.other_child(term) else {
                    log::error!("&& operator {} lost its child {}", parent.get(), term.get());
                    return Err(QueryError::CorruptTree(format!(
                        "operator {} has only one child",
                        parent.get()
                    )));
                };
                matched = match tree.match_term(other, Some(&entry), &node, None) {
                    Ok(result) => result.is_match(),
                    Err(err) => {
                        log::debug!("candidate {} not matched: {err}", entry.node_id());
                        false
                    }
                };
            }
            term = parent;
        }
        if !matched {
            continue;
        }

        let Some(name) = entry.name() else {
            log::warn!("skipping entry {} with unreadable name", entry.node_id());
            continue;
        };
        let volume = context.volume_id();
        return Ok(Some(Dirent {
            dev: volume,
            pdev: volume,
            ino: entry.node_id(),
            pino: entry.parent_id(),
            reclen: u16::try_from(DIRENT_SIZE + name.len()).unwrap_or(u16::MAX),
            name: name.into_owned(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryEntry, MemoryVolume, ROOT_NODE};
    use crate::types::TypeCode;
    use crate::value::KeyValue;

    const BUFFER: usize = 512;

    fn no_listener() -> Listener {
        Listener::new(-1, 0)
    }

    fn volume_with(files: &[(&str, i64)]) -> MemoryVolume {
        let volume = MemoryVolume::new(7);
        for (name, size) in files {
            let node = volume.create_node();
            volume.set_size(node, *size).unwrap();
            volume.link(ROOT_NODE, name, node).unwrap();
        }
        volume
    }

    fn drain(query: &mut Query<'_, MemoryVolume>) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(dirent) = query.get_next_entry(BUFFER).unwrap() {
            names.push(dirent.name);
        }
        names.sort();
        names
    }

    fn run(volume: &MemoryVolume, text: &str, flags: QueryFlags) -> Vec<String> {
        let mut query = Query::create(volume, text, flags, no_listener()).unwrap();
        drain(&mut query)
    }

    #[test]
    fn name_pattern_scans_whole_name_index() {
        let volume = volume_with(&[("a.txt", 1), ("b.cpp", 2), ("c.txt", 3)]);
        assert_eq!(
            run(&volume, r#"name="*.txt""#, QueryFlags::empty()),
            vec!["a.txt", "c.txt"]
        );
    }

    #[test]
    fn dirents_describe_the_entry() {
        let volume = volume_with(&[("only", 1)]);
        let mut query =
            Query::create(&volume, "name == only", QueryFlags::empty(), no_listener()).unwrap();
        let dirent = query.get_next_entry(BUFFER).unwrap().unwrap();
        let entry = volume.entry(ROOT_NODE, "only").unwrap();
        assert_eq!(dirent.dev, 7);
        assert_eq!(dirent.pdev, 7);
        assert_eq!(dirent.pino, ROOT_NODE);
        assert_eq!(dirent.ino, entry.node_id());
        assert_eq!(usize::from(dirent.reclen), DIRENT_SIZE + 4);
        assert_eq!(query.get_next_entry(BUFFER).unwrap(), None);
        assert_eq!(query.get_next_entry(BUFFER).unwrap(), None);
    }

    #[test]
    fn conjunction_scans_indexed_side_and_checks_sibling() {
        let volume = volume_with(&[
            ("report1", 2000),
            ("report2", 10),
            ("notes", 5000),
            ("report3", 1500),
        ]);
        assert!(volume.remove_index("name"));
        volume.create_index("size", TypeCode::Int64).unwrap();

        let mut query = Query::create(
            &volume,
            r#"size>1000 && name="report*""#,
            QueryFlags::empty(),
            no_listener(),
        )
        .unwrap();

        let tree = query.expression().tree();
        let root = query.expression().root();
        let operator = tree.operator(root).unwrap();
        assert_eq!(
            tree.score(root),
            tree.score(operator.left()).max(tree.score(operator.right()))
        );
        assert_eq!(query.stack.len(), 1);
        assert_eq!(tree.equation(query.stack[0]).unwrap().attribute(), "size");

        assert_eq!(drain(&mut query), vec!["report1", "report3"]);
    }

    #[test]
    fn exact_match_outscores_range_on_same_index() {
        let volume = volume_with(&[("a", 1)]);
        volume.create_index("size", TypeCode::Int64).unwrap();
        let score = |text: &str| {
            let query = Query::create(&volume, text, QueryFlags::empty(), no_listener()).unwrap();
            let expression = query.expression();
            expression.tree().score(expression.root())
        };
        assert!(score("size == 3") > score("size > 3"));
        assert!(score("name == \"abc*\"") > score("name == \"a*\""));
        assert_eq!(score("size != 3"), 0);
    }

    /// Entries with sizes, an indexed `rating`, and an unindexed `kind`.
    fn catalog() -> MemoryVolume {
        let volume = MemoryVolume::new(2);
        volume.create_index("rating", TypeCode::Int32).unwrap();
        volume.create_index("size", TypeCode::Int64).unwrap();
        let files: [(&str, i64, Option<i32>, Option<&str>); 8] = [
            ("intro.mp3", 4200, Some(5), Some("audio")),
            ("outro.mp3", 3900, Some(2), Some("audio")),
            ("cover.png", 800, Some(4), Some("image")),
            ("notes.txt", 90, None, Some("text")),
            ("draft.txt", 120, Some(1), None),
            ("build.log", 7000, None, None),
            ("album.ogg", 5100, Some(3), Some("audio")),
            ("empty", 0, Some(0), Some("text")),
        ];
        for (name, size, rating, kind) in files {
            let node = volume.create_node();
            volume.set_size(node, size).unwrap();
            if let Some(rating) = rating {
                volume
                    .write_value(node, "rating", &KeyValue::Int32(rating))
                    .unwrap();
            }
            if let Some(kind) = kind {
                volume
                    .write_value(node, "kind", &KeyValue::String(kind.to_string()))
                    .unwrap();
            }
            volume.link(ROOT_NODE, name, node).unwrap();
        }
        volume
    }

    /// `catalog` plus hard links and nodes created after the indexes.
    fn linked_catalog() -> MemoryVolume {
        let volume = catalog();
        let mirror = volume.create_node();
        volume.link(ROOT_NODE, "mirror", mirror).unwrap();
        let intro = volume.entry(ROOT_NODE, "intro.mp3").unwrap().node_id();
        volume.link(mirror, "intro-copy.mp3", intro).unwrap();
        let album = volume.entry(ROOT_NODE, "album.ogg").unwrap().node_id();
        volume.link(ROOT_NODE, "album-link.ogg", album).unwrap();
        let fresh = volume.create_node();
        volume
            .write_value(fresh, "rating", &KeyValue::Int32(4))
            .unwrap();
        volume.link(mirror, "fresh", fresh).unwrap();
        volume
    }

    fn brute_force(volume: &MemoryVolume, text: &str) -> Vec<String> {
        let mut expression = Expression::parse(text).unwrap();
        let root = expression.root();
        let mut names: Vec<String> = volume
            .entries()
            .into_iter()
            .filter(|entry: &MemoryEntry| {
                let node = entry.node();
                expression
                    .tree_mut()
                    .match_term(root, Some(entry), &node, None)
                    .map(|result| result.is_match())
                    .unwrap_or(false)
            })
            .map(|entry| entry.name().unwrap().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn enumeration_equals_brute_force() {
        for volume in [catalog(), linked_catalog()] {
            for text in [
                "rating >= 3",
                "rating < 3 && size > 100",
                "(rating == 5 || size >= 4000) && name != \"*.log\"",
                "kind == audio || rating <= 1",
                "!(rating > 1 && kind == \"a*\")",
                "name = \"*o*\"",
                "size > 100 && size < 5000",
                "last_modified > 50 || name == \"*.png\"",
                "size < 100",
                "rating >= 3 && name == \"*copy*\"",
                "size == 0 || rating == 4",
                "name == \"album*\" && rating == 3",
            ] {
                assert_eq!(
                    run(&volume, text, QueryFlags::QUERY_NON_INDEXED),
                    brute_force(&volume, text),
                    "{text}"
                );
            }
        }
    }

    #[test]
    fn every_hard_link_is_a_candidate() {
        let volume = MemoryVolume::new(4);
        assert!(volume.remove_index("name"));
        volume.create_index("rating", TypeCode::Int32).unwrap();
        let node = volume.create_node();
        volume.write_value(node, "rating", &KeyValue::Int32(5)).unwrap();
        volume.link(ROOT_NODE, "a", node).unwrap();
        volume.link(ROOT_NODE, "b", node).unwrap();

        assert_eq!(run(&volume, "rating >= 3", QueryFlags::empty()), vec!["a", "b"]);
        assert_eq!(
            run(&volume, "rating >= 3 && name == b", QueryFlags::empty()),
            vec!["b"]
        );
    }

    #[test]
    fn new_nodes_match_their_default_size() {
        let volume = MemoryVolume::new(4);
        volume.create_index("size", TypeCode::Int64).unwrap();
        let node = volume.create_node();
        volume.link(ROOT_NODE, "empty", node).unwrap();
        assert_eq!(run(&volume, "size < 100", QueryFlags::empty()), vec!["empty"]);
    }

    #[test]
    fn overlapping_branches_yield_each_entry_once() {
        let volume = catalog();
        let names = run(&volume, "rating >= 2 || size > 1000", QueryFlags::empty());
        assert_eq!(
            names,
            vec!["album.ogg", "build.log", "cover.png", "intro.mp3", "outro.mp3"]
        );
    }

    #[test]
    fn unindexed_equations_need_the_flag() {
        let volume = catalog();
        assert!(run(&volume, "kind == text", QueryFlags::empty()).is_empty());
        assert_eq!(
            run(&volume, "kind == text", QueryFlags::QUERY_NON_INDEXED),
            vec!["empty", "notes.txt"]
        );
    }

    #[test]
    fn overflowing_match_is_returned_again() {
        let volume = volume_with(&[("a.txt", 1), ("c.txt", 3)]);
        let mut query =
            Query::create(&volume, "name == \"*.txt\"", QueryFlags::empty(), no_listener())
                .unwrap();

        let err = query.get_next_entry(8).unwrap_err();
        assert!(matches!(
            err,
            QueryError::BufferOverflow { needed, available: 8 } if needed == Dirent::required_size("a.txt")
        ));
        let mut names = vec![query.get_next_entry(BUFFER).unwrap().unwrap().name];
        names.extend(drain(&mut query));
        names.sort();
        assert_eq!(names, vec!["a.txt", "c.txt"]);
    }

    #[test]
    fn rewind_restarts_enumeration() {
        let volume = catalog();
        let mut query =
            Query::create(&volume, "rating > 0 || kind == text", QueryFlags::QUERY_NON_INDEXED, no_listener())
                .unwrap();
        let first = drain(&mut query);
        query.rewind();
        assert_eq!(drain(&mut query), first);
    }

    #[test]
    fn scan_continues_after_volume_changes() {
        let volume = volume_with(&[("a", 1), ("m", 1)]);
        let mut query =
            Query::create(&volume, "name > \"\"", QueryFlags::empty(), no_listener()).unwrap();
        assert_eq!(query.get_next_entry(BUFFER).unwrap().unwrap().name, "a");

        let node = volume.create_node();
        volume.link(ROOT_NODE, "z", node).unwrap();
        volume.unlink(ROOT_NODE, "m").unwrap();
        assert_eq!(drain(&mut query), vec!["z"]);
    }

    #[test]
    fn malformed_query_is_rejected_up_front() {
        let volume = volume_with(&[]);
        let err = Query::create(&volume, "size >", QueryFlags::empty(), no_listener()).unwrap_err();
        assert!(matches!(err, QueryError::Parse { .. }));
    }

    #[test]
    fn set_live_mode_adds_flag() {
        let volume = volume_with(&[]);
        let mut query = Query::create(&volume, "size > 1", QueryFlags::empty(), no_listener()).unwrap();
        query.set_live_mode(Listener::new(3, 4));
        assert!(query.flags().contains(QueryFlags::LIVE_QUERY));
        assert_eq!(query.listener(), Listener::new(3, 4));
    }
}
