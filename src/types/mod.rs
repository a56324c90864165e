//! Types and traits that are used across multiple components of the chained-BFT core.
//!
//! Types that are specific to a single component, e.g., [`TimerEvent`](crate::timer_service::TimerEvent),
//! live in that component's module.

pub mod block;

pub mod certificates;

pub mod crypto_primitives;

pub mod data_types;
