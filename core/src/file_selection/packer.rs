/*
 * Copyright 2025 table-compaction
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

/// First-Fit Decreasing bin packing with a bounded lookback.
///
/// Items are sorted by weight descending (stable, so equal weights keep their
/// input order) and each one goes into the newest bin that still has room.
/// With the default lookback of 1 this is a greedy accumulation: the current
/// bin is closed as soon as the next item would overflow it.
///
/// Unlike a plain packer the capacity is a hard bound: an item heavier than
/// the capacity is never placed and is returned in [`Packing::oversized`].
#[derive(Debug, Clone)]
pub struct ListPacker {
    pub capacity: u64,
    /// Number of most recent bins to try before opening a new one.
    pub lookback: usize,
}

#[derive(Debug)]
pub struct Packing<T> {
    pub bins: Vec<Vec<T>>,
    pub oversized: Vec<T>,
}

impl ListPacker {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            lookback: 1,
        }
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback.max(1);
        self
    }

    pub fn pack<T, F>(&self, mut items: Vec<T>, weight_func: F) -> Packing<T>
    where
        F: Fn(&T) -> u64,
    {
        items.sort_by_key(|item| std::cmp::Reverse(weight_func(item)));

        let mut bins: Vec<Bin<T>> = vec![];
        let mut oversized = vec![];

        for item in items {
            let weight = weight_func(&item);
            if weight > self.capacity {
                oversized.push(item);
                continue;
            }

            let open_bin = bins
                .iter_mut()
                .rev()
                .take(self.lookback)
                .find(|bin| bin.weight + weight <= self.capacity);

            match open_bin {
                Some(bin) => bin.add(item, weight),
                None => {
                    let mut bin = Bin::default();
                    bin.add(item, weight);
                    bins.push(bin);
                }
            }
        }

        Packing {
            bins: bins.into_iter().map(|bin| bin.items).collect(),
            oversized,
        }
    }
}

#[derive(Debug)]
struct Bin<T> {
    items: Vec<T>,
    weight: u64,
}

impl<T> Default for Bin<T> {
    fn default() -> Self {
        Self {
            items: vec![],
            weight: 0,
        }
    }
}

impl<T> Bin<T> {
    fn add(&mut self, item: T, weight: u64) {
        self.weight += weight;
        self.items.push(item);
    }
}
