//! Readiness-based networking runtime.
//!
//! One listener thread accepts connections and hands them to a fixed pool
//! of worker threads. Each worker multiplexes its connections with its own
//! `Poller` (epoll on Linux, kqueue on macOS):
//! - `BufferPool`: per-worker buffer management
//! - `Connection`: per-connection phase machine
//! - `pipeline`: decode -> dispatch -> encode for one request

mod buffer;
mod connection;
mod listener;
mod pipeline;
mod poller;
mod worker;

pub(crate) use listener::{create_listener, Listener, WorkerHandle};
pub(crate) use poller::Poller;
pub(crate) use worker::Worker;
