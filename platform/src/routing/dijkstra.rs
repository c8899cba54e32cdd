// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::{PathCost, RouteEntry};
use crate::NetPointId;
use petgraph::graph::{node_index, DiGraph, EdgeIndex};
use petgraph::visit::EdgeRef;
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;

/// For every vertex, the previous vertex and the edge taken on the best path
/// from the source.
type PredecessorTree = Vec<Option<(usize, EdgeIndex)>>;

/// Shortest paths computed on demand over the graph of one-hop routes.
///
/// Node `i` of the graph is the local vertex `i` of the zone. In cached mode
/// the predecessor tree of every source is kept once computed.
#[derive(Debug)]
pub struct DijkstraRouting {
    graph: DiGraph<usize, RouteEntry>,
    cached: bool,
    cache: RefCell<HashMap<usize, Rc<PredecessorTree>>>,
}

impl DijkstraRouting {
    pub fn new(cached: bool) -> Self {
        Self {
            graph: DiGraph::new(),
            cached,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    fn ensure_vertices(&mut self, count: usize) {
        while self.graph.node_count() < count {
            let idx = self.graph.node_count();
            self.graph.add_node(idx);
        }
    }

    pub(super) fn has_route(&self, src: usize, dst: usize) -> bool {
        src < self.graph.node_count()
            && dst < self.graph.node_count()
            && self
                .graph
                .find_edge(node_index(src), node_index(dst))
                .is_some()
    }

    pub(super) fn store(&mut self, src: usize, dst: usize, entry: RouteEntry) {
        self.ensure_vertices(src.max(dst) + 1);
        self.graph.add_edge(node_index(src), node_index(dst), entry);
        self.cache.borrow_mut().clear();
    }

    pub(super) fn seal(&mut self, size: usize) {
        self.ensure_vertices(size);
    }

    fn shortest_tree(&self, src: usize, vertices: &[NetPointId]) -> PredecessorTree {
        let n = self.graph.node_count();
        let mut cost: Vec<Option<PathCost>> = vec![None; n];
        let mut pred: PredecessorTree = vec![None; n];
        let mut done = vec![false; n];
        let mut heap = BinaryHeap::new();

        cost[src] = Some(PathCost::default());
        heap.push(Reverse((PathCost::default(), vertices[src], src)));
        while let Some(Reverse((c, _, u))) = heap.pop() {
            if done[u] {
                continue;
            }
            done[u] = true;
            for edge in self.graph.edges(node_index(u)) {
                let v = edge.target().index();
                if v == u || v == src {
                    continue;
                }
                let candidate = c.add(&edge.weight().cost);
                match (cost[v], pred[v]) {
                    (Some(current), Some((p, _))) if candidate == current => {
                        if vertices[u] < vertices[p] {
                            pred[v] = Some((u, edge.id()));
                        }
                    }
                    (Some(current), _) if candidate >= current => {}
                    _ => {
                        cost[v] = Some(candidate);
                        pred[v] = Some((u, edge.id()));
                        heap.push(Reverse((candidate, vertices[v], v)));
                    }
                }
            }
        }
        pred
    }

    fn tree(&self, src: usize, vertices: &[NetPointId]) -> Rc<PredecessorTree> {
        if !self.cached {
            return Rc::new(self.shortest_tree(src, vertices));
        }
        if let Some(tree) = self.cache.borrow().get(&src) {
            return tree.clone();
        }
        log::trace!("Dijkstra cache miss for source {}", src);
        let tree = Rc::new(self.shortest_tree(src, vertices));
        self.cache.borrow_mut().insert(src, tree.clone());
        tree
    }

    pub(super) fn resolve(
        &self,
        src: usize,
        dst: usize,
        vertices: &[NetPointId],
    ) -> Option<Vec<(usize, &RouteEntry)>> {
        if src >= self.graph.node_count() || dst >= self.graph.node_count() {
            return None;
        }
        if src == dst {
            let edge = self.graph.find_edge(node_index(src), node_index(src))?;
            return Some(vec![(src, &self.graph[edge])]);
        }
        let tree = self.tree(src, vertices);
        let mut hops = Vec::new();
        let mut current = dst;
        while current != src {
            let (prev, edge) = tree[current]?;
            hops.push((current, &self.graph[edge]));
            current = prev;
        }
        hops.reverse();
        Some(hops)
    }

    pub(super) fn entries(&self) -> Vec<(usize, usize, &RouteEntry)> {
        let mut entries = self
            .graph
            .edge_references()
            .map(|e| (e.source().index(), e.target().index(), e.weight()))
            .collect::<Vec<_>>();
        entries.sort_by_key(|&(s, d, _)| (s, d));
        entries
    }
}
