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

use super::RouteEntry;
use std::collections::HashMap;

/// Explicit routing: every (src, dst) route is registered by the user.
///
/// Routes are collected in a map while the zone is open and moved to a dense
/// `n x n` table when it is sealed.
#[derive(Debug, Default)]
pub struct FullRouting {
    pending: HashMap<(usize, usize), RouteEntry>,
    table: Vec<Option<RouteEntry>>,
    size: usize,
}

impl FullRouting {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn has_route(&self, src: usize, dst: usize) -> bool {
        self.pending.contains_key(&(src, dst)) || self.lookup(src, dst).is_some()
    }

    pub(super) fn store(&mut self, src: usize, dst: usize, entry: RouteEntry) {
        self.pending.insert((src, dst), entry);
    }

    pub(super) fn seal(&mut self, size: usize) {
        self.size = size;
        self.table = vec![None; size * size];
        for ((src, dst), entry) in self.pending.drain() {
            self.table[src * size + dst] = Some(entry);
        }
    }

    fn lookup(&self, src: usize, dst: usize) -> Option<&RouteEntry> {
        if src >= self.size || dst >= self.size {
            return None;
        }
        self.table[src * self.size + dst].as_ref()
    }

    pub(super) fn resolve(&self, src: usize, dst: usize) -> Option<Vec<(usize, &RouteEntry)>> {
        self.lookup(src, dst).map(|entry| vec![(dst, entry)])
    }

    pub(super) fn entries(&self) -> Vec<(usize, usize, &RouteEntry)> {
        let mut entries = self
            .table
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i / self.size, i % self.size, e)))
            .chain(self.pending.iter().map(|(&(s, d), e)| (s, d, e)))
            .collect::<Vec<_>>();
        entries.sort_by_key(|&(s, d, _)| (s, d));
        entries
    }
}
