//! Passive DNS query logger.
//!
//! Frames captured from one or more sources are decoded down to their first
//! DNS question, the name is reduced to its registrable domain through a
//! shared LRU cache, and the resulting events are batched into a sink.
//!
//! - [`capture`] and [`decode`]: libpcap sources and link-layer decoding
//! - [`normalizer`], [`cache`] and [`suffix`]: eTLD+1 with memoization
//! - [`batch`]: count and time flush policy
//! - [`sink`] and [`clickhouse`]: persistence
//! - [`pipeline`]: wiring and shutdown

pub mod batch;
pub mod cache;
pub mod capture;
pub mod clickhouse;
pub mod config;
pub mod decode;
pub mod event;
pub mod normalizer;
pub mod pipeline;
pub mod proto_utils;
pub mod sink;
pub mod suffix;
