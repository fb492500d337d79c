// SPDX-License-Identifier: MPL-2.0

//! Bounded frame queue between the GStreamer streaming thread and the
//! render loop.
//!
//! ```text
//! appsink callback --push()--> FrameQueue --current()--> render_into
//!                  drops oldest           reuses last
//! ```
//!
//! Neither side ever blocks: the producer drops the oldest frame when the
//! queue is full (or skips on lock contention), and the consumer falls back
//! to the last frame it took when nothing new arrived.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Instant,
};

pub const DEFAULT_QUEUE_CAPACITY: usize = 3;

/// One decoded frame, tightly packed RGBA rows, top row first.
#[derive(Clone)]
pub struct Frame {
    pub pixels: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// presentation timestamp in nanoseconds
    pub pts_ns: Option<u64>,
    pub queued_at: Instant,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, pts_ns: Option<u64>) -> Self {
        Self {
            pixels: pixels.into(),
            width,
            height,
            pts_ns,
            queued_at: Instant::now(),
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("bytes", &self.pixels.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts_ns", &self.pts_ns)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: u64,
    /// dropped by the producer because the queue was full or locked
    pub dropped: u64,
    pub popped: u64,
    /// times the consumer reused the last frame
    pub reused: u64,
}

pub struct FrameQueue {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    /// mirrors `frames.len()` so readers need no lock
    len: AtomicUsize,
    last: Mutex<Option<Frame>>,
    stopped: AtomicBool,
    pushed: AtomicU64,
    dropped: AtomicU64,
    popped: AtomicU64,
    reused: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            len: AtomicUsize::new(0),
            last: Mutex::new(None),
            stopped: AtomicBool::new(false),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Producer side. Returns `false` once the queue is stopped.
    pub fn push(&self, frame: Frame) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }

        let Ok(mut frames) = self.frames.try_lock() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(pts_ns = ?frame.pts_ns, "Frame dropped: lock contention");
            return true;
        };

        while frames.len() >= self.capacity {
            if let Some(old) = frames.pop_front() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(
                    pts_ns = ?old.pts_ns,
                    age_ms = old.queued_at.elapsed().as_millis(),
                    "Frame dropped: queue full"
                );
            }
        }

        frames.push_back(frame);
        self.len.store(frames.len(), Ordering::Release);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Take the oldest queued frame, if any. Never blocks.
    pub fn try_pop(&self) -> Option<Frame> {
        if self.len.load(Ordering::Acquire) == 0 {
            return None;
        }

        let frame = {
            let mut frames = self.frames.try_lock().ok()?;
            let frame = frames.pop_front();
            self.len.store(frames.len(), Ordering::Release);
            frame
        }?;

        self.popped.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last.try_lock() {
            *last = Some(frame.clone());
        }

        Some(frame)
    }

    /// The next queued frame, or the last one taken when the queue is empty.
    /// `None` only until the first frame arrives.
    pub fn current(&self) -> Option<Frame> {
        if let Some(frame) = self.try_pop() {
            return Some(frame);
        }

        self.reused.fetch_add(1, Ordering::Relaxed);
        self.last.try_lock().ok()?.clone()
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse further frames. Queued ones stay poppable.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
        }
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

pub type SharedFrameQueue = Arc<FrameQueue>;

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8, pts: u64) -> Frame {
        Frame::new(vec![tag; 4], 1, 1, Some(pts))
    }

    #[test]
    fn test_push_then_pop() {
        let queue = FrameQueue::new(3);
        assert!(queue.push(frame(7, 0)));
        assert_eq!(queue.len(), 1);

        let popped = queue.try_pop().unwrap();
        assert_eq!(&popped.pixels[..], &[7, 7, 7, 7]);
        assert!(queue.is_empty());
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let queue = FrameQueue::new(2);
        queue.push(frame(1, 1));
        queue.push(frame(2, 2));
        queue.push(frame(3, 3));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop().unwrap().pts_ns, Some(2));
        assert_eq!(queue.try_pop().unwrap().pts_ns, Some(3));
    }

    #[test]
    fn test_current_reuses_last_frame() {
        let queue = FrameQueue::new(2);
        assert!(queue.current().is_none());

        queue.push(frame(9, 1));
        assert_eq!(queue.current().unwrap().pts_ns, Some(1));
        assert!(queue.is_empty());

        let again = queue.current().unwrap();
        assert_eq!(again.pts_ns, Some(1));
        assert_eq!(&again.pixels[..], &[9; 4]);
    }

    #[test]
    fn test_stopped_queue_refuses_frames() {
        let queue = FrameQueue::new(2);
        queue.push(frame(1, 1));
        queue.stop();

        assert!(queue.is_stopped());
        assert!(!queue.push(frame(2, 2)));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pop().unwrap().pts_ns, Some(1));
    }

    #[test]
    fn test_minimum_capacity_is_two() {
        let queue = FrameQueue::new(0);
        queue.push(frame(1, 1));
        queue.push(frame(2, 2));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_stats_are_counted() {
        let queue = FrameQueue::new(2);
        queue.push(frame(1, 1));
        queue.push(frame(2, 2));
        queue.push(frame(3, 3));

        queue.try_pop();
        queue.try_pop();
        queue.current();

        assert_eq!(
            queue.stats(),
            QueueStats {
                pushed: 3,
                dropped: 1,
                popped: 2,
                reused: 1,
            }
        );
    }

    #[test]
    fn test_producer_on_another_thread() {
        let queue: SharedFrameQueue = Arc::new(FrameQueue::new(3));
        let producer = Arc::clone(&queue);

        std::thread::spawn(move || {
            for pts in 0..10 {
                producer.push(frame(pts as u8, pts));
            }
        })
        .join()
        .unwrap();

        let stats = queue.stats();
        assert_eq!(queue.len(), 3);
        assert_eq!(stats.pushed, 10);
        assert_eq!(stats.dropped, 7);
        assert_eq!(queue.try_pop().unwrap().pts_ns, Some(7));
    }
}
