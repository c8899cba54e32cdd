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
use std::collections::HashMap;

/// All pairs shortest paths, computed once when the zone is sealed.
///
/// Three dense `n x n` matrices: the one-hop routes, the cost of the best
/// known path, and the predecessor of the destination on that path.
#[derive(Debug, Default)]
pub struct FloydRouting {
    pending: HashMap<(usize, usize), RouteEntry>,
    links: Vec<Option<RouteEntry>>,
    cost: Vec<Option<PathCost>>,
    pred: Vec<Option<usize>>,
    size: usize,
}

impl FloydRouting {
    pub fn new() -> Self {
        Self::default()
    }

    fn at(&self, src: usize, dst: usize) -> usize {
        src * self.size + dst
    }

    pub(super) fn has_route(&self, src: usize, dst: usize) -> bool {
        if self.pending.contains_key(&(src, dst)) {
            return true;
        }
        src < self.size && dst < self.size && self.links[self.at(src, dst)].is_some()
    }

    pub(super) fn store(&mut self, src: usize, dst: usize, entry: RouteEntry) {
        self.pending.insert((src, dst), entry);
    }

    pub(super) fn seal(&mut self, vertices: &[NetPointId]) {
        let n = vertices.len();
        self.size = n;
        self.links = vec![None; n * n];
        self.cost = vec![None; n * n];
        self.pred = vec![None; n * n];
        for ((src, dst), entry) in self.pending.drain().collect::<Vec<_>>() {
            let at = src * n + dst;
            self.cost[at] = Some(entry.cost);
            self.pred[at] = Some(src);
            self.links[at] = Some(entry);
        }

        for k in 0..n {
            for i in 0..n {
                if i == k {
                    continue;
                }
                let ik = match self.cost[i * n + k] {
                    Some(c) => c,
                    None => continue,
                };
                for j in 0..n {
                    if j == i || j == k {
                        continue;
                    }
                    let kj = match self.cost[k * n + j] {
                        Some(c) => c,
                        None => continue,
                    };
                    let candidate = ik.add(&kj);
                    let (ij, via) = (i * n + j, self.pred[k * n + j]);
                    let better = match (self.cost[ij], self.pred[ij], via) {
                        (None, _, _) => true,
                        (Some(current), Some(p), Some(v)) => {
                            candidate < current
                                || (candidate == current && vertices[v] < vertices[p])
                        }
                        (Some(current), _, _) => candidate < current,
                    };
                    if better {
                        self.cost[ij] = Some(candidate);
                        self.pred[ij] = via;
                    }
                }
            }
        }
        log::debug!("Floyd precomputation done for {} vertices", n);
    }

    pub(super) fn resolve(&self, src: usize, dst: usize) -> Option<Vec<(usize, &RouteEntry)>> {
        if src >= self.size || dst >= self.size {
            return None;
        }
        if src == dst {
            return self.links[self.at(src, src)].as_ref().map(|e| vec![(src, e)]);
        }
        let mut hops = Vec::new();
        let mut current = dst;
        while current != src {
            let prev = self.pred[self.at(src, current)]?;
            hops.push((current, self.links[self.at(prev, current)].as_ref()?));
            current = prev;
            if hops.len() > self.size {
                log::error!("Cycle in the predecessor matrix from {} to {}", src, dst);
                return None;
            }
        }
        hops.reverse();
        Some(hops)
    }

    pub(super) fn entries(&self) -> Vec<(usize, usize, &RouteEntry)> {
        let mut entries = self
            .links
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i / self.size, i % self.size, e)))
            .chain(self.pending.iter().map(|(&(s, d), e)| (s, d, e)))
            .collect::<Vec<_>>();
        entries.sort_by_key(|&(s, d, _)| (s, d));
        entries
    }
}
