//! Reconciles the status of Gateway API `GatewayClass` objects.
//!
//! This crate is an umbrella over two layers, re-exported as modules:
//!
//! - [`core`]: the object types and the pure condition policy deciding what a class's
//!   status should say
//! - [`runtime`]: the in-memory cache, event routing, work queue, reconciler and controller
//!   that drive observed status toward that policy
//!
//! # Example
//!
//! Feed watch notifications through a [`reflector`](runtime::reflector()) and a router,
//! and run the controller until shutdown:
//!
//! ```no_run
//! use futures::Stream;
//! use portico::{
//!     core::GatewayClass,
//!     runtime::{reflector, watcher::Event, Config, Controller, StatusWriter},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! async fn serve(
//!     feed: impl Stream<Item = Event<GatewayClass>> + Send + 'static,
//!     api: impl StatusWriter<GatewayClass> + 'static,
//!     initial: Vec<GatewayClass>,
//! ) -> Result<(), portico::runtime::controller::Error> {
//!     let (reader, mut writer) = reflector::store();
//!     writer.apply_initial_list(initial);
//!     let controller = Controller::new(reader, api, Config::default());
//!     let router = controller.router();
//!     let token = CancellationToken::new();
//!     let feed_token = token.clone();
//!     tokio::spawn(async move { router.run(reflector(writer, feed), feed_token).await });
//!     controller.run(token).await
//! }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]

#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
#[doc(inline)]
pub use portico_runtime as runtime;

#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub use runtime::{Config, Controller};

pub use crate::core::{Gateway, GatewayClass, Resource, ResourceExt};
#[doc(inline)]
pub use portico_core as core;
