/// Cross-renderer ordering.
///
/// The timeline is the order in which renderers submit within a frame.
/// Dependencies are explicit edges from a consumer to producers that sit
/// earlier in the timeline; nothing is inferred from shared resources.

use std::fmt;
use rustc_hash::{FxHashMap, FxHashSet};
use crate::error::{Error, Result};
use crate::engine_error;

/// Identifier of a renderer inside a [`DeviceContext`](crate::DeviceContext)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RendererId(u32);

impl RendererId {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RendererId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "renderer#{}", self.0)
    }
}

/// Hands out renderer ids, recycling released ones
#[derive(Debug, Default)]
pub struct RendererIdAllocator {
    next: u32,
    free: Vec<u32>,
    live: FxHashSet<u32>,
}

impl RendererIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> RendererId {
        let index = self.free.pop().unwrap_or_else(|| {
            let index = self.next;
            self.next += 1;
            index
        });
        self.live.insert(index);
        RendererId(index)
    }

    /// Return `id` to the free list
    ///
    /// Returns false if `id` was not live.
    pub fn release(&mut self, id: RendererId) -> bool {
        if !self.live.remove(&id.0) {
            return false;
        }
        self.free.push(id.0);
        true
    }

    pub fn is_live(&self, id: RendererId) -> bool {
        self.live.contains(&id.0)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

fn invalid(message: String) -> Error {
    engine_error!("topaz::RenderGraph", "{}", message);
    Error::InvalidConfiguration(message)
}

/// Timeline and dependency edges of every renderer on a device
#[derive(Debug, Default)]
pub struct RenderGraph {
    timeline: Vec<RendererId>,
    dependencies: FxHashMap<RendererId, Vec<RendererId>>,
    /// Bumped on every change that can move a renderer's rank
    revision: u64,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeline(&self) -> &[RendererId] {
        &self.timeline
    }

    /// Replace the submission order
    ///
    /// # Errors
    ///
    /// Fails if an id appears twice, or if an existing dependency would end
    /// up with its producer at or after its consumer.
    pub fn set_timeline(&mut self, timeline: Vec<RendererId>) -> Result<()> {
        let mut seen = FxHashSet::default();
        for id in &timeline {
            if !seen.insert(*id) {
                return Err(invalid(format!("{} appears twice in the timeline", id)));
            }
        }
        let rank = |id: &RendererId| timeline.iter().position(|t| t == id);
        for (consumer, producers) in &self.dependencies {
            for producer in producers {
                match (rank(producer), rank(consumer)) {
                    (Some(p), Some(c)) if p < c => {}
                    _ => {
                        return Err(invalid(format!(
                            "new timeline breaks the dependency of {} on {}",
                            consumer, producer
                        )));
                    }
                }
            }
        }
        self.timeline = timeline;
        self.revision += 1;
        Ok(())
    }

    /// Append `id` at the end of the timeline
    pub fn push(&mut self, id: RendererId) -> Result<()> {
        if self.timeline.contains(&id) {
            return Err(invalid(format!("{} is already in the timeline", id)));
        }
        self.timeline.push(id);
        self.revision += 1;
        Ok(())
    }

    /// Position of `id` in the timeline
    pub fn rank(&self, id: RendererId) -> Option<usize> {
        self.timeline.iter().position(|t| *t == id)
    }

    /// Declare that `consumer` waits for each of `producers`
    ///
    /// Either every edge is added or none is.
    ///
    /// # Errors
    ///
    /// Rejects renderers missing from the timeline, self-dependencies and
    /// producers ranked at or after the consumer.
    pub fn add_dependencies(&mut self, consumer: RendererId, producers: &[RendererId]) -> Result<()> {
        let Some(consumer_rank) = self.rank(consumer) else {
            return Err(invalid(format!("{} is not in the timeline", consumer)));
        };
        for producer in producers {
            if *producer == consumer {
                return Err(invalid(format!("{} cannot depend on itself", consumer)));
            }
            match self.rank(*producer) {
                None => return Err(invalid(format!("{} is not in the timeline", producer))),
                Some(rank) if rank > consumer_rank => {
                    return Err(invalid(format!(
                        "{} (rank {}) cannot wait for {} (rank {}) submitted after it",
                        consumer, consumer_rank, producer, rank
                    )));
                }
                Some(_) => {}
            }
        }

        let edges = self.dependencies.entry(consumer).or_default();
        for producer in producers {
            if !edges.contains(producer) {
                edges.push(*producer);
            }
        }
        self.revision += 1;
        Ok(())
    }

    pub fn dependencies(&self, consumer: RendererId) -> &[RendererId] {
        self.dependencies.get(&consumer).map_or(&[], |d| d.as_slice())
    }

    pub fn clear_dependencies(&mut self, consumer: RendererId) {
        if self.dependencies.remove(&consumer).is_some() {
            self.revision += 1;
        }
    }

    /// Drop `id` from the timeline and from every edge
    pub fn remove(&mut self, id: RendererId) {
        let before = self.timeline.len();
        self.timeline.retain(|t| *t != id);
        let mut changed = before != self.timeline.len();
        changed |= self.dependencies.remove(&id).is_some();
        for producers in self.dependencies.values_mut() {
            let count = producers.len();
            producers.retain(|p| *p != id);
            changed |= count != producers.len();
        }
        self.dependencies.retain(|_, producers| !producers.is_empty());
        if changed {
            self.revision += 1;
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
#[path = "render_graph_tests.rs"]
mod tests;
