#![cfg(feature = "rcgen")]

mod common;
mod concurrency;
mod cookie;
mod full;
mod resume;
mod snapshot;
mod tickets;
mod would_block;
