//! Tree sequences: genealogies that vary along the genome.
//!
//! A [`TreeSequence`] stores nodes, edges, sites and mutations in the usual
//! table form: an edge says `child` inherits `[left, right)` from `parent`,
//! and the local tree at any position is made of the edges covering it.
//! Tree sequences are stored as JSON (gzip-compressed when the path ends in
//! `.gz`).
//!
//! Besides load and dump this provides what summarizing an inference needs:
//! iteration over local trees ([`TreeSequence::trees`]), removal of nodes
//! that carry no topology ([`TreeSequence::simplify`]) and the
//! Kendall-Colijn distance between two tree sequences
//! ([`TreeSequence::kc_distance`]).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

use crate::file::{FileError, InputFile, OutputFile};

pub type NodeId = usize;

/// Node flag marking a sample.
pub const NODE_IS_SAMPLE: u32 = 1;

#[derive(Error, Debug)]
pub enum TreeSequenceError {
    #[error("IO error: {0}")]
    IOError(#[from] io::Error),
    #[error("File reading error: {0}")]
    FileError(#[from] FileError),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Sequence length must be positive and finite, got {0}")]
    BadSequenceLength(f64),
    #[error("Edge {edge}: {reason}")]
    BadEdge { edge: usize, reason: String },
    #[error("Site {site}: {reason}")]
    BadSite { site: usize, reason: String },
    #[error("Mutation {mutation}: {reason}")]
    BadMutation { mutation: usize, reason: String },
    #[error("Tree sequences have {0} and {1} samples")]
    SampleMismatch(usize, usize),
    #[error("Tree sequences have sequence lengths {0} and {1}")]
    SequenceLengthMismatch(f64, f64),
    #[error("Tree at {left} has {roots} roots, KC distance needs one")]
    MultipleRoots { left: f64, roots: usize },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub time: f64,
    #[serde(default)]
    pub flags: u32,
}

impl Node {
    pub fn sample(time: f64) -> Self {
        Node {
            time,
            flags: NODE_IS_SAMPLE,
        }
    }

    pub fn internal(time: f64) -> Self {
        Node { time, flags: 0 }
    }

    pub fn is_sample(&self) -> bool {
        self.flags & NODE_IS_SAMPLE != 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub left: f64,
    pub right: f64,
    pub parent: NodeId,
    pub child: NodeId,
}

impl Edge {
    pub fn new(left: f64, right: f64, parent: NodeId, child: NodeId) -> Self {
        Edge {
            left,
            right,
            parent,
            child,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub position: f64,
    #[serde(default)]
    pub ancestral_state: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub site: usize,
    pub node: NodeId,
    #[serde(default)]
    pub derived_state: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeSequence {
    sequence_length: f64,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    #[serde(default)]
    sites: Vec<Site>,
    #[serde(default)]
    mutations: Vec<Mutation>,
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

impl TreeSequence {
    pub fn new(
        sequence_length: f64,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        sites: Vec<Site>,
        mutations: Vec<Mutation>,
    ) -> Result<Self, TreeSequenceError> {
        let ts = TreeSequence {
            sequence_length,
            nodes,
            edges,
            sites,
            mutations,
        };
        ts.validate()?;
        Ok(ts)
    }

    /// Check the tables describe a valid set of trees.
    fn validate(&self) -> Result<(), TreeSequenceError> {
        let length = self.sequence_length;
        if !length.is_finite() || length <= 0.0 {
            return Err(TreeSequenceError::BadSequenceLength(length));
        }
        let num_nodes = self.nodes.len();
        for (i, e) in self.edges.iter().enumerate() {
            let bad = |reason: String| TreeSequenceError::BadEdge { edge: i, reason };
            if !(0.0 <= e.left && e.left < e.right && e.right <= length) {
                return Err(bad(format!(
                    "interval [{}, {}) not within [0, {})",
                    e.left, e.right, length
                )));
            }
            if e.parent >= num_nodes || e.child >= num_nodes {
                return Err(bad(format!("node out of range ({} nodes)", num_nodes)));
            }
            if self.nodes[e.parent].time <= self.nodes[e.child].time {
                return Err(bad(format!(
                    "parent {} is not older than child {}",
                    e.parent, e.child
                )));
            }
        }

        // a child can only have one parent at any position
        let mut by_child: Vec<usize> = (0..self.edges.len()).collect();
        by_child.sort_by(|&a, &b| {
            let (ea, eb) = (&self.edges[a], &self.edges[b]);
            ea.child.cmp(&eb.child).then(cmp_f64(ea.left, eb.left))
        });
        for pair in by_child.windows(2) {
            let (prev, next) = (&self.edges[pair[0]], &self.edges[pair[1]]);
            if prev.child == next.child && next.left < prev.right {
                return Err(TreeSequenceError::BadEdge {
                    edge: pair[1],
                    reason: format!("child {} has overlapping parents", next.child),
                });
            }
        }

        for (i, site) in self.sites.iter().enumerate() {
            if !(0.0 <= site.position && site.position < length) {
                return Err(TreeSequenceError::BadSite {
                    site: i,
                    reason: format!("position {} not within [0, {})", site.position, length),
                });
            }
            if i > 0 && site.position <= self.sites[i - 1].position {
                return Err(TreeSequenceError::BadSite {
                    site: i,
                    reason: "positions not strictly increasing".to_string(),
                });
            }
        }
        for (i, m) in self.mutations.iter().enumerate() {
            let bad = |reason: &str| TreeSequenceError::BadMutation {
                mutation: i,
                reason: reason.to_string(),
            };
            if m.site >= self.sites.len() {
                return Err(bad("site out of range"));
            }
            if m.node >= num_nodes {
                return Err(bad("node out of range"));
            }
            if i > 0 && m.site < self.mutations[i - 1].site {
                return Err(bad("mutations not sorted by site"));
            }
        }
        Ok(())
    }

    /// Read a tree sequence written by [`TreeSequence::dump`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TreeSequenceError> {
        let reader = InputFile::new(path).reader()?;
        let ts: TreeSequence = serde_json::from_reader(reader)?;
        ts.validate()?;
        Ok(ts)
    }

    /// Write the tree sequence, flushing before returning.
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<(), TreeSequenceError> {
        let mut writer = OutputFile::new(path, None).writer()?;
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn sequence_length(&self) -> f64 {
        self.sequence_length
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_sites(&self) -> usize {
        self.sites.len()
    }

    pub fn num_mutations(&self) -> usize {
        self.mutations.len()
    }

    /// Sample node ids, in id order.
    pub fn samples(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_sample())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn num_samples(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_sample()).count()
    }

    /// Iterate over the local trees from left to right.
    pub fn trees(&self) -> Trees<'_> {
        Trees::new(self)
    }

    pub fn num_trees(&self) -> usize {
        let mut trees = self.trees();
        let mut count = 0;
        while trees.next_tree().is_some() {
            count += 1;
        }
        count
    }

    /// Remove the nodes that carry no topology.
    ///
    /// A node is kept over an interval when it is a sample or has at least two
    /// children with samples below them there. Nodes that are not ancestral to
    /// any sample, and unary nodes, disappear; edges join each kept node to its
    /// nearest kept ancestor and adjacent identical edges are merged. Samples
    /// become nodes `0..n` in their original order, followed by the other kept
    /// nodes in id order. Mutations on removed unary nodes move to the nearest
    /// kept node below; mutations not ancestral to any sample are dropped, as
    /// are sites left without mutations.
    pub fn simplify(&self) -> TreeSequence {
        let num_nodes = self.num_nodes();
        let samples = self.samples();
        let mut is_sample = vec![false; num_nodes];
        for &s in &samples {
            is_sample[s] = true;
        }

        let mut visited = vec![false; num_nodes];
        let mut sample_children = vec![0usize; num_nodes];
        let mut touched: Vec<NodeId> = Vec::new();
        let mut kept = vec![false; num_nodes];
        let mut raw_edges: Vec<Edge> = Vec::new();
        let mut raw_mutations: Vec<(usize, NodeId)> = Vec::new();
        let mut next_mutation = 0;

        let mut trees = self.trees();
        while let Some(tree) = trees.next_tree() {
            for &s in &samples {
                let mut u = s;
                while !visited[u] {
                    visited[u] = true;
                    touched.push(u);
                    match tree.parent(u) {
                        Some(p) => {
                            sample_children[p] += 1;
                            u = p;
                        }
                        None => break,
                    }
                }
            }
            let retained = |u: NodeId| is_sample[u] || sample_children[u] >= 2;

            for &u in &touched {
                if !retained(u) {
                    continue;
                }
                kept[u] = true;
                let mut ancestor = tree.parent(u);
                while let Some(p) = ancestor {
                    if retained(p) {
                        break;
                    }
                    ancestor = tree.parent(p);
                }
                if let Some(p) = ancestor {
                    raw_edges.push(Edge::new(tree.left, tree.right, p, u));
                }
            }

            while next_mutation < self.mutations.len() {
                let mutation = &self.mutations[next_mutation];
                if self.sites[mutation.site].position >= tree.right {
                    break;
                }
                next_mutation += 1;
                let mut u = mutation.node;
                if !visited[u] {
                    continue;
                }
                // an unkept ancestor of samples has exactly one child with samples below
                while !retained(u) {
                    match tree.children(u).iter().find(|&&c| visited[c]) {
                        Some(&c) => u = c,
                        None => break,
                    }
                }
                if retained(u) {
                    raw_mutations.push((next_mutation - 1, u));
                }
            }

            for &u in &touched {
                visited[u] = false;
                sample_children[u] = 0;
            }
            touched.clear();
        }

        let mut node_map: Vec<Option<NodeId>> = vec![None; num_nodes];
        let mut nodes = Vec::new();
        for &s in &samples {
            node_map[s] = Some(nodes.len());
            nodes.push(self.nodes[s].clone());
        }
        for u in 0..num_nodes {
            if kept[u] && node_map[u].is_none() {
                node_map[u] = Some(nodes.len());
                nodes.push(self.nodes[u].clone());
            }
        }
        let new_id = |u: NodeId| node_map[u].unwrap_or(u);

        raw_edges.sort_by(|a, b| {
            a.parent
                .cmp(&b.parent)
                .then(a.child.cmp(&b.child))
                .then(cmp_f64(a.left, b.left))
        });
        let mut edges: Vec<Edge> = Vec::with_capacity(raw_edges.len());
        for edge in raw_edges {
            let edge = Edge::new(edge.left, edge.right, new_id(edge.parent), new_id(edge.child));
            match edges.last_mut() {
                Some(last)
                    if last.parent == edge.parent
                        && last.child == edge.child
                        && last.right == edge.left =>
                {
                    last.right = edge.right;
                }
                _ => edges.push(edge),
            }
        }
        edges.sort_by(|a, b| {
            cmp_f64(nodes[a.parent].time, nodes[b.parent].time)
                .then(a.parent.cmp(&b.parent))
                .then(a.child.cmp(&b.child))
                .then(cmp_f64(a.left, b.left))
        });

        let mut site_map: Vec<Option<usize>> = vec![None; self.sites.len()];
        let mut sites = Vec::new();
        let mut mutations = Vec::with_capacity(raw_mutations.len());
        for (index, node) in raw_mutations {
            let old = &self.mutations[index];
            let site = match site_map[old.site] {
                Some(site) => site,
                None => {
                    site_map[old.site] = Some(sites.len());
                    sites.push(self.sites[old.site].clone());
                    sites.len() - 1
                }
            };
            mutations.push(Mutation {
                site,
                node: new_id(node),
                derived_state: old.derived_state.clone(),
            });
        }

        TreeSequence {
            sequence_length: self.sequence_length,
            nodes,
            edges,
            sites,
            mutations,
        }
    }

    /// Kendall-Colijn distance with λ = 0, averaged over the sequence.
    ///
    /// Each local tree is summarized by the number of edges between the root and
    /// the most recent common ancestor of every pair of samples; the distance of
    /// two trees is the Euclidean distance of those vectors, and the result is
    /// the span-weighted mean over all intervals of the two tree sequences.
    /// Samples are matched by their order. Every tree must have a single root.
    pub fn kc_distance(&self, other: &TreeSequence) -> Result<f64, TreeSequenceError> {
        if self.sequence_length != other.sequence_length {
            return Err(TreeSequenceError::SequenceLengthMismatch(
                self.sequence_length,
                other.sequence_length,
            ));
        }
        if self.num_samples() != other.num_samples() {
            return Err(TreeSequenceError::SampleMismatch(
                self.num_samples(),
                other.num_samples(),
            ));
        }
        let our_samples = self.samples();
        let their_samples = other.samples();
        let mut our_trees = self.trees();
        let mut their_trees = other.trees();
        let mut ours = next_kc_vector(&mut our_trees, &our_samples)?;
        let mut theirs = next_kc_vector(&mut their_trees, &their_samples)?;

        let mut left = 0.0;
        let mut total = 0.0;
        loop {
            let (our_right, their_right, distance) = match (&ours, &theirs) {
                (Some((our_right, a)), Some((their_right, b))) => {
                    let distance = a
                        .iter()
                        .zip(b)
                        .map(|(x, y)| (x - y) * (x - y))
                        .sum::<f64>()
                        .sqrt();
                    (*our_right, *their_right, distance)
                }
                _ => break,
            };
            let right = our_right.min(their_right);
            total += distance * (right - left);
            left = right;
            if our_right == right {
                ours = next_kc_vector(&mut our_trees, &our_samples)?;
            }
            if their_right == right {
                theirs = next_kc_vector(&mut their_trees, &their_samples)?;
            }
        }
        Ok(total / self.sequence_length)
    }
}

/// Right end and pairwise MRCA depths of the next local tree.
fn next_kc_vector(
    trees: &mut Trees<'_>,
    samples: &[NodeId],
) -> Result<Option<(f64, Vec<f64>)>, TreeSequenceError> {
    let tree = match trees.next_tree() {
        Some(tree) => tree,
        None => return Ok(None),
    };
    let roots = tree.roots(samples);
    if roots.len() > 1 {
        return Err(TreeSequenceError::MultipleRoots {
            left: tree.left,
            roots: roots.len(),
        });
    }
    let mut m = Vec::with_capacity(samples.len() * samples.len().saturating_sub(1) / 2);
    for (k, &a) in samples.iter().enumerate() {
        for &b in &samples[k + 1..] {
            let depth = tree.mrca(a, b).map_or(0, |u| tree.depth(u));
            m.push(depth as f64);
        }
    }
    Ok(Some((tree.right, m)))
}

/// The genealogy over one interval of the sequence.
#[derive(Clone, Debug)]
pub struct Tree {
    left: f64,
    right: f64,
    parent: Vec<Option<NodeId>>,
    children: Vec<Vec<NodeId>>,
    /// Nodes with at least one child, in no particular order.
    internal: Vec<NodeId>,
    /// Index of each node in `internal`.
    internal_index: Vec<Option<usize>>,
}

impl Tree {
    pub fn interval(&self) -> (f64, f64) {
        (self.left, self.right)
    }

    pub fn span(&self) -> f64 {
        self.right - self.left
    }

    pub fn parent(&self, u: NodeId) -> Option<NodeId> {
        self.parent[u]
    }

    pub fn children(&self, u: NodeId) -> &[NodeId] {
        &self.children[u]
    }

    pub fn num_children(&self, u: NodeId) -> usize {
        self.children[u].len()
    }

    /// The nodes that have children in this tree.
    pub fn internal_nodes(&self) -> &[NodeId] {
        &self.internal
    }

    fn insert_edge(&mut self, parent: NodeId, child: NodeId) {
        self.parent[child] = Some(parent);
        if self.children[parent].is_empty() {
            self.internal_index[parent] = Some(self.internal.len());
            self.internal.push(parent);
        }
        self.children[parent].push(child);
    }

    fn remove_edge(&mut self, parent: NodeId, child: NodeId) {
        self.parent[child] = None;
        let siblings = &mut self.children[parent];
        if let Some(index) = siblings.iter().position(|&c| c == child) {
            siblings.remove(index);
        }
        if siblings.is_empty() {
            if let Some(index) = self.internal_index[parent].take() {
                self.internal.swap_remove(index);
                if let Some(&moved) = self.internal.get(index) {
                    self.internal_index[moved] = Some(index);
                }
            }
        }
    }

    /// Number of edges between `u` and its root.
    pub fn depth(&self, u: NodeId) -> usize {
        let mut depth = 0;
        let mut v = u;
        while let Some(p) = self.parent[v] {
            depth += 1;
            v = p;
        }
        depth
    }

    fn root_of(&self, u: NodeId) -> NodeId {
        let mut v = u;
        while let Some(p) = self.parent[v] {
            v = p;
        }
        v
    }

    /// The distinct roots above `samples`, in order of first appearance.
    pub fn roots(&self, samples: &[NodeId]) -> Vec<NodeId> {
        let mut roots: Vec<NodeId> = Vec::new();
        for &s in samples {
            let root = self.root_of(s);
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
        roots
    }

    /// Most recent common ancestor of `a` and `b`, if they share a root.
    pub fn mrca(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let (mut a, mut b) = (a, b);
        let (mut depth_a, mut depth_b) = (self.depth(a), self.depth(b));
        while depth_a > depth_b {
            a = self.parent[a]?;
            depth_a -= 1;
        }
        while depth_b > depth_a {
            b = self.parent[b]?;
            depth_b -= 1;
        }
        while a != b {
            a = self.parent[a]?;
            b = self.parent[b]?;
        }
        Some(a)
    }
}

/// Left-to-right iterator over local trees; each tree is borrowed until the
/// next call to [`Trees::next_tree`].
pub struct Trees<'a> {
    ts: &'a TreeSequence,
    insertion: Vec<usize>,
    removal: Vec<usize>,
    next_insertion: usize,
    next_removal: usize,
    position: f64,
    tree: Tree,
}

impl<'a> Trees<'a> {
    fn new(ts: &'a TreeSequence) -> Self {
        let edges = &ts.edges;
        let time = |e: usize| ts.nodes[edges[e].parent].time;
        let mut insertion: Vec<usize> = (0..edges.len()).collect();
        insertion.sort_by(|&a, &b| {
            cmp_f64(edges[a].left, edges[b].left).then(cmp_f64(time(a), time(b)))
        });
        let mut removal: Vec<usize> = (0..edges.len()).collect();
        removal.sort_by(|&a, &b| {
            cmp_f64(edges[a].right, edges[b].right).then(cmp_f64(time(b), time(a)))
        });
        Trees {
            ts,
            insertion,
            removal,
            next_insertion: 0,
            next_removal: 0,
            position: 0.0,
            tree: Tree {
                left: 0.0,
                right: 0.0,
                parent: vec![None; ts.num_nodes()],
                children: vec![Vec::new(); ts.num_nodes()],
                internal: Vec::new(),
                internal_index: vec![None; ts.num_nodes()],
            },
        }
    }

    pub fn next_tree(&mut self) -> Option<&Tree> {
        let ts = self.ts;
        let length = ts.sequence_length;
        if self.position >= length {
            return None;
        }
        let edges = &ts.edges;
        let num_edges = edges.len();

        while self.next_removal < num_edges
            && edges[self.removal[self.next_removal]].right == self.position
        {
            let edge = &edges[self.removal[self.next_removal]];
            self.tree.remove_edge(edge.parent, edge.child);
            self.next_removal += 1;
        }
        while self.next_insertion < num_edges
            && edges[self.insertion[self.next_insertion]].left == self.position
        {
            let edge = &edges[self.insertion[self.next_insertion]];
            self.tree.insert_edge(edge.parent, edge.child);
            self.next_insertion += 1;
        }

        let mut right = length;
        if self.next_insertion < num_edges {
            right = right.min(edges[self.insertion[self.next_insertion]].left);
        }
        if self.next_removal < num_edges {
            right = right.min(edges[self.removal[self.next_removal]].right);
        }
        self.tree.left = self.position;
        self.tree.right = right;
        self.position = right;
        Some(&self.tree)
    }
}
