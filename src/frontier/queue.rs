use crate::request::Request;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

/// Order in which pending requests are served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontierOrder {
    /// First in, first out.
    #[default]
    Bfs,
    /// Last in, first out.
    Dfs,
    /// Highest `Request::priority` first, arrival order among equals.
    Priority,
}

struct Prioritized {
    priority: i32,
    sequence: u64,
    request: Request,
}

impl PartialEq for Prioritized {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Prioritized {}

impl PartialOrd for Prioritized {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prioritized {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

pub(crate) enum PendingQueue {
    Bfs(VecDeque<Request>),
    Dfs(Vec<Request>),
    Priority {
        heap: BinaryHeap<Prioritized>,
        sequence: u64,
    },
}

impl PendingQueue {
    pub(crate) fn new(order: FrontierOrder) -> Self {
        match order {
            FrontierOrder::Bfs => PendingQueue::Bfs(VecDeque::new()),
            FrontierOrder::Dfs => PendingQueue::Dfs(Vec::new()),
            FrontierOrder::Priority => PendingQueue::Priority {
                heap: BinaryHeap::new(),
                sequence: 0,
            },
        }
    }

    pub(crate) fn push(&mut self, request: Request) {
        match self {
            PendingQueue::Bfs(queue) => queue.push_back(request),
            PendingQueue::Dfs(stack) => stack.push(request),
            PendingQueue::Priority { heap, sequence } => {
                *sequence += 1;
                heap.push(Prioritized {
                    priority: request.priority,
                    sequence: *sequence,
                    request,
                });
            }
        }
    }

    pub(crate) fn pop(&mut self) -> Option<Request> {
        match self {
            PendingQueue::Bfs(queue) => queue.pop_front(),
            PendingQueue::Dfs(stack) => stack.pop(),
            PendingQueue::Priority { heap, .. } => heap.pop().map(|entry| entry.request),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            PendingQueue::Bfs(queue) => queue.len(),
            PendingQueue::Dfs(stack) => stack.len(),
            PendingQueue::Priority { heap, .. } => heap.len(),
        }
    }

    pub(crate) fn clear(&mut self) {
        match self {
            PendingQueue::Bfs(queue) => queue.clear(),
            PendingQueue::Dfs(stack) => stack.clear(),
            PendingQueue::Priority { heap, .. } => heap.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(fingerprint: &str, priority: i32) -> Request {
        Request::builder("job", "https://example.com/")
            .fingerprint(fingerprint)
            .priority(priority)
            .build()
            .unwrap()
    }

    fn drain(queue: &mut PendingQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.pop()).map(|r| r.fingerprint).collect()
    }

    #[test]
    fn bfs_is_fifo_and_dfs_is_lifo() {
        let mut bfs = PendingQueue::new(FrontierOrder::Bfs);
        let mut dfs = PendingQueue::new(FrontierOrder::Dfs);
        for fp in ["a", "b", "c"] {
            bfs.push(request(fp, 0));
            dfs.push(request(fp, 0));
        }
        assert_eq!(drain(&mut bfs), ["a", "b", "c"]);
        assert_eq!(drain(&mut dfs), ["c", "b", "a"]);
    }

    #[test]
    fn priority_then_arrival() {
        let mut queue = PendingQueue::new(FrontierOrder::Priority);
        queue.push(request("low-1", 0));
        queue.push(request("high", 5));
        queue.push(request("low-2", 0));
        queue.push(request("mid", 1));
        assert_eq!(queue.len(), 4);
        assert_eq!(drain(&mut queue), ["high", "mid", "low-1", "low-2"]);
    }
}
