//! RDF quad store implementation
//!
//! This module provides an in-memory, key-ordered quad store. Readers work on
//! copy-on-write snapshots of the index; writers are serialized behind a
//! single lock so concurrent updates never interleave.

use oxrdf::{GraphName, NamedNode, Quad, Subject, Term};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Bound;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// RDF store errors
#[derive(Error, Debug)]
pub enum RdfStoreError {
    /// Quad not found
    #[error("Quad not found")]
    QuadNotFound,

    /// The transaction task did not run to completion
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),
}

pub type RdfStoreResult<T> = Result<T, RdfStoreError>;

/// Canonical key of a quad component tuple.
///
/// Terms are encoded with their N-Triples representation, which is unique per
/// term and orders IRIs, blank nodes and literals into disjoint ranges.
type QuadKey = (String, String, String, String);

/// Index keys visited per refill of a [`QuadScan`]
const SCAN_BATCH: usize = 256;

/// Key-ordered quad index
///
/// Implements:
/// - SPOG index (primary storage, Subject-Predicate-Object-Graph)
/// - POSG index (Predicate-Object-Subject-Graph)
/// - OSPG index (Object-Subject-Predicate-Graph)
///
/// Any pattern with a bound subject, predicate or object is answered with a
/// range scan over the matching index.
#[derive(Clone, Default, Debug)]
pub struct QuadIndex {
    spog: BTreeMap<QuadKey, Quad>,
    posg: BTreeSet<QuadKey>,
    ospg: BTreeSet<QuadKey>,
    /// Named graph -> number of quads it holds
    graphs: BTreeMap<String, (GraphName, usize)>,
}

impl QuadIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a quad, returning `false` if it was already present
    pub fn insert(&mut self, quad: Quad) -> bool {
        let (s, p, o, g) = encode_quad(&quad);
        let key = (s.clone(), p.clone(), o.clone(), g.clone());
        if self.spog.contains_key(&key) {
            return false;
        }

        self.posg.insert((p.clone(), o.clone(), s.clone(), g.clone()));
        self.ospg.insert((o, s, p, g.clone()));
        if !quad.graph_name.is_default_graph() {
            self.graphs
                .entry(g)
                .or_insert_with(|| (quad.graph_name.clone(), 0))
                .1 += 1;
        }
        self.spog.insert(key, quad);
        true
    }

    /// Remove a quad, returning `false` if it was not present
    pub fn remove(&mut self, quad: &Quad) -> bool {
        let (s, p, o, g) = encode_quad(quad);
        let key = (s.clone(), p.clone(), o.clone(), g.clone());
        if self.spog.remove(&key).is_none() {
            return false;
        }

        self.posg.remove(&(p.clone(), o.clone(), s.clone(), g.clone()));
        self.ospg.remove(&(o, s, p, g.clone()));
        if let Some(entry) = self.graphs.get_mut(&g) {
            entry.1 -= 1;
            if entry.1 == 0 {
                self.graphs.remove(&g);
            }
        }
        true
    }

    /// Check if a quad exists in the index
    pub fn contains(&self, quad: &Quad) -> bool {
        self.spog.contains_key(&encode_quad(quad))
    }

    /// Get the total number of quads
    pub fn len(&self) -> usize {
        self.spog.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.spog.is_empty()
    }

    /// Iterate over all quads in SPOG order
    pub fn iter(&self) -> impl Iterator<Item = &Quad> {
        self.spog.values()
    }

    /// List the named graphs that currently hold at least one quad
    pub fn named_graphs(&self) -> impl Iterator<Item = &GraphName> {
        self.graphs.values().map(|(name, _)| name)
    }

    /// Lazily iterate the quads matching a pattern (`None` = any value)
    pub fn quads_for_pattern<'a>(
        &'a self,
        subject: Option<&'a Subject>,
        predicate: Option<&'a NamedNode>,
        object: Option<&'a Term>,
        graph: Option<&'a GraphName>,
    ) -> impl Iterator<Item = &'a Quad> + 'a {
        let candidates: Box<dyn Iterator<Item = &'a Quad> + 'a> =
            if let Some(s) = subject.map(|s| s.to_string()) {
                Box::new(
                    self.spog
                        .range(prefix(&s)..)
                        .take_while(move |(k, _)| k.0 == s)
                        .map(|(_, quad)| quad),
                )
            } else if let Some(p) = predicate.map(|p| p.to_string()) {
                Box::new(
                    self.posg
                        .range(prefix(&p)..)
                        .take_while(move |k| k.0 == p)
                        .filter_map(move |k| self.spog.get(&spog_from_posg(k))),
                )
            } else if let Some(o) = object.map(|o| o.to_string()) {
                Box::new(
                    self.ospg
                        .range(prefix(&o)..)
                        .take_while(move |k| k.0 == o)
                        .filter_map(move |k| self.spog.get(&spog_from_ospg(k))),
                )
            } else {
                Box::new(self.spog.values())
            };

        candidates.filter(move |quad| {
            subject.map_or(true, |s| &quad.subject == s)
                && predicate.map_or(true, |p| &quad.predicate == p)
                && object.map_or(true, |o| &quad.object == o)
                && graph.map_or(true, |g| &quad.graph_name == g)
        })
    }

    /// Start an owning, lazy scan of `index` for `pattern`
    ///
    /// The scan keeps `index` alive, so it can outlive the caller and be
    /// drained on another thread.
    pub fn scan(index: &Arc<QuadIndex>, pattern: QuadPattern) -> QuadScan {
        QuadScan::new(Arc::clone(index), pattern)
    }
}

/// Owned quad pattern (`None` = any value)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuadPattern {
    pub subject: Option<Subject>,
    pub predicate: Option<NamedNode>,
    pub object: Option<Term>,
    pub graph: Option<GraphName>,
}

impl QuadPattern {
    fn matches(&self, quad: &Quad) -> bool {
        self.subject.as_ref().map_or(true, |s| &quad.subject == s)
            && self.predicate.as_ref().map_or(true, |p| &quad.predicate == p)
            && self.object.as_ref().map_or(true, |o| &quad.object == o)
            && self.graph.as_ref().map_or(true, |g| &quad.graph_name == g)
    }
}

#[derive(Debug, Clone, Copy)]
enum ScanOrder {
    Spog,
    Posg,
    Ospg,
}

/// Lazy iterator over the quads of a snapshot matching a [`QuadPattern`]
///
/// Walks one index range a batch of keys at a time, resuming after the last
/// key it visited, so only a bounded number of quads is buffered at once.
pub struct QuadScan {
    index: Arc<QuadIndex>,
    pattern: QuadPattern,
    order: ScanOrder,
    /// Leading key component every visited key must carry
    lead: Option<String>,
    cursor: Option<QuadKey>,
    buffer: VecDeque<Quad>,
    exhausted: bool,
}

impl QuadScan {
    fn new(index: Arc<QuadIndex>, pattern: QuadPattern) -> Self {
        let (order, lead) = if let Some(s) = &pattern.subject {
            (ScanOrder::Spog, Some(s.to_string()))
        } else if let Some(p) = &pattern.predicate {
            (ScanOrder::Posg, Some(p.to_string()))
        } else if let Some(o) = &pattern.object {
            (ScanOrder::Ospg, Some(o.to_string()))
        } else {
            (ScanOrder::Spog, None)
        };
        Self {
            index,
            pattern,
            order,
            lead,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn refill(&mut self) {
        let Self {
            index,
            pattern,
            order,
            lead,
            cursor,
            buffer,
            exhausted,
        } = self;

        let start = match cursor.take() {
            Some(key) => Bound::Excluded(key),
            None => match lead.as_deref() {
                Some(lead) => Bound::Included(prefix(lead)),
                None => Bound::Unbounded,
            },
        };
        let range = (start, Bound::Unbounded);
        let within = |key: &QuadKey| lead.as_ref().map_or(true, |lead| &key.0 == lead);

        let mut visited = 0;
        let mut last = None;
        match order {
            ScanOrder::Spog => {
                for (key, quad) in index
                    .spog
                    .range::<QuadKey, _>(range)
                    .take_while(|(key, _)| within(*key))
                    .take(SCAN_BATCH)
                {
                    visited += 1;
                    last = Some(key);
                    if pattern.matches(quad) {
                        buffer.push_back(quad.clone());
                    }
                }
            }
            ScanOrder::Posg | ScanOrder::Ospg => {
                let (keys, primary) = match order {
                    ScanOrder::Posg => (&index.posg, spog_from_posg as fn(&QuadKey) -> QuadKey),
                    _ => (&index.ospg, spog_from_ospg as fn(&QuadKey) -> QuadKey),
                };
                for key in keys
                    .range::<QuadKey, _>(range)
                    .take_while(|key| within(*key))
                    .take(SCAN_BATCH)
                {
                    visited += 1;
                    last = Some(key);
                    if let Some(quad) = index.spog.get(&primary(key)) {
                        if pattern.matches(quad) {
                            buffer.push_back(quad.clone());
                        }
                    }
                }
            }
        }

        *exhausted = visited < SCAN_BATCH;
        *cursor = last.cloned();
    }
}

impl Iterator for QuadScan {
    type Item = Quad;

    fn next(&mut self) -> Option<Quad> {
        loop {
            if let Some(quad) = self.buffer.pop_front() {
                return Some(quad);
            }
            if self.exhausted {
                return None;
            }
            self.refill();
        }
    }
}

enum Change {
    Inserted(Quad),
    Removed(Quad),
}

/// Write access to the live index inside [`RdfStore::transaction`]
///
/// Every change is journaled. Dropping the writer without calling
/// [`commit`](Self::commit) reverts them in reverse order, including when the
/// transaction body panics.
pub struct IndexWriter<'a> {
    index: &'a mut Arc<QuadIndex>,
    journal: Vec<Change>,
}

impl<'a> IndexWriter<'a> {
    pub fn new(index: &'a mut Arc<QuadIndex>) -> Self {
        Self {
            index,
            journal: Vec::new(),
        }
    }

    /// Snapshot of the index including the changes made so far
    ///
    /// Drop it before the next change, or that change copies the index.
    pub fn snapshot(&self) -> Arc<QuadIndex> {
        Arc::clone(&*self.index)
    }

    /// Insert a quad, returning `false` if it was already present
    pub fn insert(&mut self, quad: Quad) -> bool {
        if self.index.contains(&quad) {
            return false;
        }
        Arc::make_mut(self.index).insert(quad.clone());
        self.journal.push(Change::Inserted(quad));
        true
    }

    /// Remove a quad, returning `false` if it was not present
    pub fn remove(&mut self, quad: &Quad) -> bool {
        if !self.index.contains(quad) {
            return false;
        }
        Arc::make_mut(self.index).remove(quad);
        self.journal.push(Change::Removed(quad.clone()));
        true
    }

    /// Remove every quad of one graph, returning how many were removed
    pub fn clear_graph(&mut self, graph: &GraphName) -> usize {
        let doomed: Vec<Quad> = self
            .index
            .quads_for_pattern(None, None, None, Some(graph))
            .cloned()
            .collect();
        doomed.iter().filter(|quad| self.remove(quad)).count()
    }

    /// Remove every quad stored in a named graph
    pub fn clear_named_graphs(&mut self) -> usize {
        let graphs: Vec<GraphName> = self.index.named_graphs().cloned().collect();
        graphs.iter().map(|graph| self.clear_graph(graph)).sum()
    }

    /// Remove all quads
    pub fn clear_all(&mut self) -> usize {
        let doomed: Vec<Quad> = self.index.iter().cloned().collect();
        doomed.iter().filter(|quad| self.remove(quad)).count()
    }

    /// Number of changes applied so far
    pub fn changes(&self) -> usize {
        self.journal.len()
    }

    /// Keep every change made through this writer
    pub fn commit(mut self) {
        self.journal.clear();
    }
}

impl Drop for IndexWriter<'_> {
    fn drop(&mut self) {
        if self.journal.is_empty() {
            return;
        }
        let index = Arc::make_mut(self.index);
        for change in self.journal.drain(..).rev() {
            match change {
                Change::Inserted(quad) => {
                    index.remove(&quad);
                }
                Change::Removed(quad) => {
                    index.insert(quad);
                }
            }
        }
    }
}

/// Shared handle to an RDF quad store
///
/// Cloning the handle is cheap; all clones see the same data.
#[derive(Clone, Default)]
pub struct RdfStore {
    index: Arc<RwLock<Arc<QuadIndex>>>,
}

impl RdfStore {
    /// Create a new empty RDF store
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a read snapshot. Later writes do not affect it.
    pub async fn snapshot(&self) -> Arc<QuadIndex> {
        Arc::clone(&*self.index.read().await)
    }

    /// Insert a quad into the store
    pub async fn insert(&self, quad: Quad) -> bool {
        let mut guard = self.index.write().await;
        Arc::make_mut(&mut *guard).insert(quad)
    }

    /// Insert many quads, returning how many were new
    pub async fn extend(&self, quads: impl IntoIterator<Item = Quad>) -> usize {
        let mut guard = self.index.write().await;
        let index = Arc::make_mut(&mut *guard);
        quads.into_iter().filter(|quad| index.insert(quad.clone())).count()
    }

    /// Remove a quad from the store
    pub async fn remove(&self, quad: &Quad) -> RdfStoreResult<()> {
        let mut guard = self.index.write().await;
        if !guard.contains(quad) {
            return Err(RdfStoreError::QuadNotFound);
        }
        Arc::make_mut(&mut *guard).remove(quad);
        Ok(())
    }

    /// Check if a quad exists in the store
    pub async fn contains(&self, quad: &Quad) -> bool {
        self.index.read().await.contains(quad)
    }

    /// Get the total number of quads
    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.index.read().await.is_empty()
    }

    /// Clear all quads
    pub async fn clear(&self) {
        *self.index.write().await = Arc::new(QuadIndex::new());
    }

    /// Run `f` on a blocking thread against the live index, keeping its
    /// changes only if it returns `Ok`.
    ///
    /// The write lock is held for the whole call, so transactions are
    /// serialized. Changes are made in place; the index is copied only when
    /// a reader still holds a snapshot of it.
    pub async fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut IndexWriter<'_>) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<RdfStoreError> + Send + 'static,
    {
        let mut guard = Arc::clone(&self.index).write_owned().await;
        tokio::task::spawn_blocking(move || -> Result<T, E> {
            let mut writer = IndexWriter::new(&mut *guard);
            let value = f(&mut writer)?;
            writer.commit();
            Ok(value)
        })
        .await
        .map_err(|e| E::from(RdfStoreError::TransactionAborted(e.to_string())))?
    }
}

fn prefix(first: &str) -> QuadKey {
    (first.to_string(), String::new(), String::new(), String::new())
}

fn spog_from_posg(key: &QuadKey) -> QuadKey {
    (key.2.clone(), key.0.clone(), key.1.clone(), key.3.clone())
}

fn spog_from_ospg(key: &QuadKey) -> QuadKey {
    (key.1.clone(), key.2.clone(), key.0.clone(), key.3.clone())
}

fn encode_graph(graph: &GraphName) -> String {
    match graph {
        GraphName::DefaultGraph => String::new(),
        named => named.to_string(),
    }
}

fn encode_quad(quad: &Quad) -> QuadKey {
    (
        quad.subject.to_string(),
        quad.predicate.to_string(),
        quad.object.to_string(),
        encode_graph(&quad.graph_name),
    )
}
