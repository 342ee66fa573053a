//! Crate with the runtime components of the GatewayClass controller
//!
//! This crate contains the building blocks that turn watch notifications into status
//! writes: an in-memory [`reflector`] cache, the [`router`] deciding which notifications
//! matter, the deduplicating [`workqueue`], the [`reconciler`] applying the condition
//! policy, and the [`controller`] running workers over all of it.
//!
//! Newcomers should generally get started with the [`Controller`], which wires the queue,
//! routers and workers together.

#![deny(unsafe_code)]

pub mod client;
pub mod controller;
pub mod reconciler;
pub mod reflector;
pub mod router;
pub mod utils;
pub mod watcher;
pub mod workqueue;

pub use client::{StatusError, StatusWriter};
pub use controller::{Config, Controller};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use reflector::{reflector, ObjectCache, ObjectRef, Store};
pub use router::EventRouter;
pub use workqueue::WorkQueue;
