//! Request bookkeeping for one actor proxy.
//!
//! The wire protocol answers requests per actor in FIFO order, one response
//! per request. The proxy keeps at most one request on the wire at a time;
//! the rest wait in a queue. Idempotent queries can additionally be memoized
//! by key.

use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;

pub type Waiter = oneshot::Sender<Result<Value>>;

enum CacheSlot {
    /// First request for this key is on the wire; later callers park here.
    InFlight(Vec<Waiter>),
    Ready(Value),
}

#[derive(Default)]
pub struct RequestQueues {
    /// Built packets not yet written.
    queue: VecDeque<(Value, Waiter)>,
    /// Requests on the wire, oldest first.
    pending: VecDeque<Waiter>,
    cache: HashMap<&'static str, CacheSlot>,
    rejected: bool,
}

pub enum CacheLookup {
    Hit(Value),
    /// Another caller's request is in flight; await this receiver.
    Wait(oneshot::Receiver<Result<Value>>),
    /// Caller must perform the request and then settle the key.
    Miss,
}

impl RequestQueues {
    /// Accept a request. Returns the packet if it should be written now
    /// (the actor was idle), `None` if it was queued behind earlier requests.
    pub fn push(&mut self, packet: Value, waiter: Waiter) -> Option<Value> {
        if self.rejected {
            let _ = waiter.send(Err(Error::Disconnected));
            return None;
        }
        if self.pending.is_empty() && self.queue.is_empty() {
            self.pending.push_back(waiter);
            Some(packet)
        } else {
            self.queue.push_back((packet, waiter));
            None
        }
    }

    /// Settle the oldest in-flight request with `result`. Returns the next
    /// queued packet to write, if any. `false` in the flag position means no
    /// request was in flight and the response had no consumer.
    pub fn complete(&mut self, result: Result<Value>) -> (bool, Option<Value>) {
        let Some(waiter) = self.pending.pop_front() else {
            return (false, None);
        };
        let _ = waiter.send(result);

        let next = self.queue.pop_front().map(|(packet, waiter)| {
            self.pending.push_back(waiter);
            packet
        });
        (true, next)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Fail every queued and in-flight request; later pushes fail fast.
    pub fn reject_all(&mut self, err: impl Fn() -> Error) {
        self.rejected = true;
        for waiter in self.pending.drain(..) {
            let _ = waiter.send(Err(err()));
        }
        for (_, waiter) in self.queue.drain(..) {
            let _ = waiter.send(Err(err()));
        }
        for (_, slot) in self.cache.drain() {
            if let CacheSlot::InFlight(waiters) = slot {
                for waiter in waiters {
                    let _ = waiter.send(Err(err()));
                }
            }
        }
    }

    pub fn cache_lookup(&mut self, key: &'static str) -> CacheLookup {
        match self.cache.get_mut(key) {
            Some(CacheSlot::Ready(value)) => CacheLookup::Hit(value.clone()),
            Some(CacheSlot::InFlight(waiters)) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                CacheLookup::Wait(rx)
            }
            None => {
                self.cache.insert(key, CacheSlot::InFlight(Vec::new()));
                CacheLookup::Miss
            }
        }
    }

    /// Record the outcome of the first request for `key` and release parked
    /// callers. On failure the key is forgotten so a later call may retry.
    pub fn cache_settle(&mut self, key: &'static str, result: &Result<Value>) {
        let Some(slot) = self.cache.remove(key) else {
            return;
        };
        let CacheSlot::InFlight(waiters) = slot else {
            return;
        };
        match result {
            Ok(value) => {
                for waiter in waiters {
                    let _ = waiter.send(Ok(value.clone()));
                }
                self.cache.insert(key, CacheSlot::Ready(value.clone()));
            }
            Err(_) => {
                // Parked callers observe a dropped channel and map it to a
                // disconnect; the cache stays empty.
                drop(waiters);
            }
        }
    }
}
