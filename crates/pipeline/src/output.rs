//! Outbound audio queue
//!
//! Holds synthesized PCM chunks between the TTS worker and the media
//! sender. Unlike a plain channel it supports draining on barge-in: no
//! frame produced before a clear may be sent after it.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Notify;

use switchboard_core::AudioFrame;

#[derive(Default)]
struct Inner {
    chunks: VecDeque<AudioFrame>,
    closed: bool,
}

/// Clearable queue of synthesized audio chunks
pub struct AudioOutputQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl AudioOutputQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        })
    }

    /// Enqueue a chunk for playback.
    pub fn push(&self, frame: AudioFrame) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.chunks.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Wait for the next chunk; `None` once closed and drained.
    pub async fn pop(&self) -> Option<AudioFrame> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(frame) = inner.chunks.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking take, for senders that poll between pacing ticks.
    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.inner.lock().chunks.pop_front()
    }

    /// Drop all queued chunks; returns how many were discarded.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.chunks.len();
        inner.chunks.clear();
        dropped
    }

    /// Close the queue; pending chunks still drain.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().chunks.len()
    }
}

impl Default for AudioOutputQueue {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::SampleRate;

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(vec![0i16; 160], SampleRate::Hz24000, seq)
    }

    #[tokio::test]
    async fn test_push_pop_order() {
        let queue = AudioOutputQueue::new();
        queue.push(frame(1));
        queue.push(frame(2));
        assert_eq!(queue.pop().await.unwrap().sequence, 1);
        assert_eq!(queue.pop().await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_clear_reports_dropped() {
        let queue = AudioOutputQueue::new();
        for i in 0..5 {
            queue.push(frame(i));
        }
        assert_eq!(queue.clear(), 5);
        assert!(queue.is_empty());
        // Idempotent
        assert_eq!(queue.clear(), 0);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = AudioOutputQueue::new();
        queue.push(frame(1));
        queue.close();
        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
        // Pushes after close are discarded.
        queue.push(frame(2));
        assert!(queue.pop().await.is_none());
    }
}
