/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Liveness and proposal-verification core of a chained-BFT (HotStuff-style) blockchain node.
//!
//! The core decides when a node moves to a new consensus level, and whether a candidate block may
//! extend the chain. It does not run the voting protocol, execute transactions, or persist blocks:
//! those are [collaborators](pluggables) it calls out to.
//!
//! ## Components
//!
//! 1. [`timer_service`]: owns the state timer and the pacemaker timer.
//! 2. [`pacemaker`]: turns certificates into level changes and arms level timeouts.
//! 3. [`proposal_cache`]: candidate blocks above the committed height, keyed by height and
//!    fingerprint.
//! 4. [`block_verifier`]: checks candidate blocks and publishes the outcome.
//! 5. [`block_committer`]: persists decided blocks and advances the ledger.
//! 6. [`core_engine`]: routes [messages](messages) between the components and drives the Pacemaker
//!    from expired timers.
//!
//! [`node`] wires all of them together. Observable state changes are published as
//! [events](events) and can be [logged](logging).

pub mod access_control;

pub mod block_committer;

pub mod block_verifier;

pub mod config;

pub mod core_engine;

pub mod events;

pub(crate) mod event_bus;

pub mod ledger_cache;

pub mod logging;

pub mod messages;

pub mod msg_bus;

pub mod node;

pub mod pacemaker;

pub mod pluggables;

pub mod proposal_cache;

pub mod timer_service;

pub mod types;
