/// Timeline semaphore values for renderers in the render graph.
///
/// A frame is one pass over the timeline. Within a frame the renderer at
/// rank `r` signals `base + r + 1` and waits on `base + rank(p) + 1` for each
/// producer `p`. When the last rank submits (or a renderer submits again
/// at a rank that already went this frame) `base` moves on by the
/// timeline length.

use std::sync::Arc;
use crate::device::Semaphore;
use crate::error::{Error, Result};
use crate::{engine_error, engine_trace};
use super::render_graph::{RenderGraph, RendererId};

/// Semaphore values of one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelinePlan {
    pub rank: usize,
    pub waits: Vec<u64>,
    pub signal: u64,
    frame_base: u64,
    new_frame: bool,
}

pub(crate) struct FrameScheduler {
    semaphore: Arc<dyn Semaphore>,
    base: u64,
    next_rank: usize,
    /// Ranks that signalled in the current frame
    done: Vec<bool>,
    /// Highest value any submission or host signal was scheduled to reach
    scheduled: u64,
    revision: u64,
}

impl FrameScheduler {
    pub fn new(semaphore: Arc<dyn Semaphore>) -> Result<Self> {
        let base = semaphore.value()?;
        Ok(Self { semaphore, base, next_rank: 0, done: Vec::new(), scheduled: base, revision: 0 })
    }

    pub fn semaphore(&self) -> &Arc<dyn Semaphore> {
        &self.semaphore
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Restart the frame when the graph changed under us
    fn follow(&mut self, graph: &RenderGraph) {
        if graph.revision() != self.revision || self.done.len() != graph.timeline().len() {
            self.revision = graph.revision();
            self.base = self.scheduled;
            self.next_rank = 0;
            self.done = vec![false; graph.timeline().len()];
        }
    }

    /// Values for `id`'s next submission, or `None` if it is not in the timeline
    ///
    /// # Errors
    ///
    /// A dependency that has not signalled in this frame would never be
    /// satisfied; this is reported instead of deadlocking the queue.
    pub fn plan(&mut self, graph: &RenderGraph, id: RendererId) -> Result<Option<TimelinePlan>> {
        self.follow(graph);
        let Some(rank) = graph.rank(id) else {
            return Ok(None);
        };
        let new_frame = rank < self.next_rank;
        let frame_base = if new_frame { self.base + self.done.len() as u64 } else { self.base };

        let mut waits = Vec::with_capacity(graph.dependencies(id).len());
        for producer in graph.dependencies(id) {
            let Some(producer_rank) = graph.rank(*producer) else {
                continue;
            };
            if new_frame || !self.done[producer_rank] {
                let message = format!(
                    "{} depends on {} which has not submitted this frame (render or skip_renderer it first)",
                    id, producer
                );
                engine_error!("topaz::FrameScheduler", "{}", message);
                return Err(Error::InvalidConfiguration(message));
            }
            waits.push(frame_base + producer_rank as u64 + 1);
        }

        Ok(Some(TimelinePlan { rank, waits, signal: frame_base + rank as u64 + 1, frame_base, new_frame }))
    }

    /// Record that `plan` was submitted
    pub fn commit(&mut self, plan: &TimelinePlan) {
        if plan.new_frame {
            self.base = plan.frame_base;
            self.done.fill(false);
        }
        self.done[plan.rank] = true;
        self.next_rank = plan.rank + 1;
        self.scheduled = self.scheduled.max(plan.signal);
        if self.next_rank == self.done.len() {
            self.base += self.done.len() as u64;
            self.next_rank = 0;
            self.done.fill(false);
        }
        engine_trace!("topaz::FrameScheduler", "Rank {} signals {} (base {})", plan.rank, plan.signal, self.base);
    }

    /// Signal `id`'s value from the host for a frame it does not render
    ///
    /// Blocks until every value already scheduled is reached so that host
    /// and GPU signals stay in increasing order.
    pub fn skip(&mut self, graph: &RenderGraph, id: RendererId) -> Result<()> {
        self.follow(graph);
        let Some(rank) = graph.rank(id) else {
            return Ok(());
        };
        let new_frame = rank < self.next_rank;
        let frame_base = if new_frame { self.base + self.done.len() as u64 } else { self.base };
        let plan = TimelinePlan { rank, waits: Vec::new(), signal: frame_base + rank as u64 + 1, frame_base, new_frame };

        if plan.signal > self.scheduled {
            self.semaphore.wait(self.scheduled)?;
            self.semaphore.signal(plan.signal)?;
        }
        self.commit(&plan);
        Ok(())
    }
}

#[cfg(test)]
#[path = "frame_scheduler_tests.rs"]
mod tests;
