use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio::sync::Semaphore;

/// Ordinary and control frames never exceed this size.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frames on the large-message pipeline never exceed this size.
pub const MAX_LARGE_FRAME_SIZE: usize = 5 * 1024 * 1024;

/// Buffers retained per envelope-buffer pool.
pub(crate) const MAX_POOLED_BUFFERS: usize = 256;

/// Inbound envelope wrappers kept for reuse.
pub(crate) const INBOUND_ENVELOPE_POOL_CAPACITY: usize = 16;

/// Bounded pool of fixed-capacity frame buffers.
///
/// At most `max_pooled` buffers are outstanding at any time; `acquire`
/// suspends until a buffer is released once the bound is reached. Released
/// buffers are cleared and kept for reuse.
pub(crate) struct EnvelopeBufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    available: Arc<Semaphore>,
    buffer_capacity: usize,
    max_pooled: usize,
}

impl EnvelopeBufferPool {
    pub(crate) fn new(buffer_capacity: usize, max_pooled: usize) -> Self {
        EnvelopeBufferPool {
            buffers: Mutex::new(Vec::with_capacity(max_pooled)),
            available: Arc::new(Semaphore::new(max_pooled)),
            buffer_capacity,
            max_pooled,
        }
    }

    pub(crate) fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub(crate) async fn acquire(&self) -> BytesMut {
        // the permit is restored on release
        if let Ok(permit) = self.available.acquire().await {
            permit.forget();
        }
        let pooled = {
            let mut buffers = self.buffers.lock().unwrap();
            buffers.pop()
        };
        pooled.unwrap_or_else(|| BytesMut::with_capacity(self.buffer_capacity))
    }

    pub(crate) fn release(&self, mut buf: BytesMut) {
        buf.clear();
        {
            let mut buffers = self.buffers.lock().unwrap();
            debug_assert!(buffers.len() < self.max_pooled, "envelope buffer released twice");
            if buffers.len() < self.max_pooled {
                buffers.push(buf);
            }
        }
        self.available.add_permits(1);
    }
}

/// Types cycled through an [`ObjectPool`] clear themselves here.
pub(crate) trait Reusable: Default {
    fn reset(&mut self);
}

/// Generic bounded pool of reusable objects.
///
/// `acquire` hands out a pooled instance when one is available and a freshly
/// allocated one otherwise; `release` resets the instance and keeps it unless
/// the pool is already full, in which case it is simply dropped.
pub(crate) struct ObjectPool<T: Reusable> {
    pool: Mutex<Vec<T>>,
    capacity: usize,
}

impl<T: Reusable> ObjectPool<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        ObjectPool {
            pool: Mutex::new(Vec::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    pub(crate) fn acquire(&self) -> T {
        let pooled = {
            let mut pool = self.pool.lock().unwrap();
            pool.pop()
        };
        pooled.unwrap_or_default()
    }

    pub(crate) fn release(&self, mut obj: T) {
        obj.reset();
        let mut pool = self.pool.lock().unwrap();
        if pool.len() < self.capacity {
            pool.push(obj);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct Counter {
        value: u32,
    }

    impl Reusable for Counter {
        fn reset(&mut self) {
            self.value = 0;
        }
    }

    #[tokio::test]
    async fn test_buffer_pool_reuses_released_buffers() {
        let pool = EnvelopeBufferPool::new(64, 2);

        let mut a = pool.acquire().await;
        a.extend_from_slice(b"hello");
        pool.release(a);

        let b = pool.acquire().await;
        assert!(b.is_empty(), "released buffer must come back cleared");
        assert!(b.capacity() >= 64);
    }

    #[tokio::test]
    async fn test_buffer_pool_blocks_when_exhausted() {
        let pool = Arc::new(EnvelopeBufferPool::new(16, 1));
        let held = pool.acquire().await;

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await })
        };

        // the waiter cannot finish while the only buffer is held
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        pool.release(held);
        let buf = waiter.await.unwrap();
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_object_pool_allocates_past_capacity() {
        let pool: ObjectPool<Counter> = ObjectPool::new(1);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(a.value, 0);
        assert_eq!(b.value, 0);

        pool.release(a);
        pool.release(b); // beyond capacity, dropped
        assert_eq!(pool.pool.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_object_pool_resets_on_release() {
        let pool: ObjectPool<Counter> = ObjectPool::new(4);
        let mut c = pool.acquire();
        c.value = 7;
        pool.release(c);
        assert_eq!(pool.acquire().value, 0);
    }
}
