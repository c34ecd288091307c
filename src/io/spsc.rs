use crate::error::{PopError, PushError};
use crate::io::base::{QueueSink, QueueSource};
use crossbeam::utils::Backoff;
use ringbuf::consumer::Consumer;
use ringbuf::producer::Producer;
use ringbuf::traits::Split;
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Bounded single-producer/single-consumer queue endpoint.
///
/// Strict FIFO within one queue, capacity fixed at creation. Waiting uses
/// a spin/yield/sleep ladder so short timeouts stay cheap.
pub struct SpscQueue;

impl SpscQueue {
    pub fn bounded<T>(name: impl Into<String>, capacity: usize) -> (SpscSender<T>, SpscReceiver<T>) {
        let name: Arc<str> = Arc::from(name.into());
        let rb = HeapRb::<T>::new(capacity.max(1));
        let (prod, cons) = rb.split();

        (
            SpscSender {
                name: name.clone(),
                prod,
            },
            SpscReceiver { name, cons },
        )
    }
}

/// Producing half of an [`SpscQueue`].
pub struct SpscSender<T> {
    name: Arc<str>,
    prod: HeapProd<T>,
}

impl<T> std::fmt::Debug for SpscSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpscSender")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> QueueSink<T> for SpscSender<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn push_wait_for(&mut self, value: T, timeout: Duration) -> Result<(), PushError<T>> {
        let start = Instant::now();
        let backoff = Backoff::new();
        let mut spins: u32 = 0;
        let mut value = value;

        loop {
            match self.prod.try_push(value) {
                Ok(()) => return Ok(()),
                Err(v) => {
                    // Queue full; the failed attempt returns ownership.
                    value = v;
                    if start.elapsed() >= timeout {
                        return Err(PushError::timeout(Some(value)));
                    }
                    spins = spins.saturating_add(1);
                    if spins < 64 {
                        backoff.spin();
                    } else if spins < 256 {
                        backoff.snooze();
                    } else {
                        thread::sleep(Duration::from_micros(2));
                    }
                }
            }
        }
    }
}

/// Consuming half of an [`SpscQueue`].
pub struct SpscReceiver<T> {
    name: Arc<str>,
    cons: HeapCons<T>,
}

impl<T> std::fmt::Debug for SpscReceiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpscReceiver")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> QueueSource<T> for SpscReceiver<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn pop_wait_for(&mut self, timeout: Duration) -> Result<T, PopError> {
        let start = Instant::now();
        let backoff = Backoff::new();
        let mut spins: u32 = 0;

        loop {
            match self.cons.try_pop() {
                Some(v) => return Ok(v),
                None => {
                    if start.elapsed() >= timeout {
                        return Err(PopError::Timeout);
                    }
                    spins = spins.saturating_add(1);
                    if spins < 64 {
                        backoff.spin();
                    } else if spins < 256 {
                        backoff.snooze();
                    } else {
                        thread::sleep(Duration::from_micros(2));
                    }
                }
            }
        }
    }
}
