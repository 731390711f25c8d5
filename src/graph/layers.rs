// src/graph/layers.rs

//! Topological layering
//!
//! Layers are extracted iteratively: every node whose dependencies have all
//! been placed goes into the next layer. Nodes inside one layer are
//! mutually independent and can be prepared or installed in any order.

use super::{DependencyGraph, PackageNode};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// Set of mutually independent nodes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layer {
    nodes: BTreeMap<String, PackageNode>,
}

impl Layer {
    pub fn nodes(&self) -> impl Iterator<Item = &PackageNode> {
        self.nodes.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&PackageNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Nodes that are fetched and built from the archive
    pub fn source_nodes(&self) -> impl Iterator<Item = &PackageNode> {
        self.nodes.values().filter(|n| n.is_source())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Ordered layers; dependencies always sit in a lower layer than their dependents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerSequence {
    layers: Vec<Layer>,
    index: HashMap<String, usize>,
}

impl LayerSequence {
    /// Layer index of a node
    pub fn layer_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn node(&self, name: &str) -> Option<&PackageNode> {
        self.layer_of(name)
            .and_then(|i| self.layers.get(i))
            .and_then(|layer| layer.get(name))
    }

    /// Whether some node answers to `name`, directly or through a provides
    pub fn resolves(&self, name: &str) -> bool {
        self.index.contains_key(name) || self.nodes().any(|n| n.answers_to(name))
    }

    pub fn get(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    /// All nodes, lowest layer first
    pub fn nodes(&self) -> impl Iterator<Item = &PackageNode> {
        self.layers.iter().flat_map(Layer::nodes)
    }

    /// Number of layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Number of nodes across all layers
    pub fn node_count(&self) -> usize {
        self.index.len()
    }
}

impl DependencyGraph {
    /// Compute the install layering of this graph
    ///
    /// A node that can never be placed means the graph has a cycle or a
    /// dangling edge. [`validate`](Self::validate) rejects both during
    /// construction, so hitting it here is an internal error.
    pub fn layers(&self) -> Result<LayerSequence> {
        let mut remaining: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for node in self.nodes() {
            remaining.insert(node.name(), node.dependencies().len());
            for edge in node.dependencies() {
                dependents
                    .entry(edge.name.as_str())
                    .or_default()
                    .push(node.name());
            }
        }

        let mut ready: Vec<&str> = remaining
            .iter()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut sequence = LayerSequence::default();

        while !ready.is_empty() {
            let mut layer = Layer::default();
            let mut next = Vec::new();
            let depth = sequence.layers.len();

            for name in ready {
                remaining.remove(name);
                if let Some(node) = self.get(name) {
                    layer.nodes.insert(name.to_string(), node.clone());
                    sequence.index.insert(name.to_string(), depth);
                }

                for dependent in dependents.get(name).into_iter().flatten() {
                    if let Some(deg) = remaining.get_mut(dependent) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }

            sequence.layers.push(layer);
            ready = next;
        }

        if !remaining.is_empty() {
            let mut stuck: Vec<&str> = remaining.into_keys().collect();
            stuck.sort_unstable();
            return Err(Error::Internal(format!(
                "layering stalled with {} unplaced node(s): {}",
                stuck.len(),
                stuck.join(", ")
            )));
        }

        Ok(sequence)
    }
}
