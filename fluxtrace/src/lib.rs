// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! fluxtrace threads a distributed-tracing context through a push-based reactive stream.
//!
//! Asynchronous producers (a database cursor, any [`futures_core::Stream`]) are adapted onto the
//! [`reactive`] protocol. A [`Flux`] lifted with a [`Tracing`] facility installs a
//! [`ScopePassingSubscriber`] at subscribe time, so every signal of the subscription is delivered
//! while the parent [`TraceContext`] is current.
//!
//! ```
//! use fluxtrace::reactive::Recorder;
//! use fluxtrace::trace::{TraceContext, Tracing};
//! use fluxtrace::Flux;
//!
//! let tracing = Tracing::default();
//! let parent = TraceContext::new_root();
//! let (recorder, handle) = Recorder::new();
//! {
//!     let _scope = tracing.current_trace_context().new_scope(Some(parent));
//!     Flux::from_iter(vec!["Paris"]).lift_tracing(Some(&tracing)).subscribe(recorder);
//! }
//! assert_eq!(handle.items(), vec!["Paris"]);
//! ```
#![deny(missing_docs)]
#![allow(clippy::type_complexity)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod context;
pub mod error;
pub mod lift;
pub mod reactive;
pub mod scope_passing;
pub mod trace;
pub mod wrap;

pub use context::Context;
pub use error::{BoxError, FluxError};
pub use lift::{lift, resolve_parent, trace_subscriber, TracedFlux};
pub use reactive::{Flux, Publisher, Subscriber, Subscription};
pub use scope_passing::ScopePassingSubscriber;
pub use trace::{CurrentTraceContext, Scope, TraceContext, Tracing};
pub use wrap::{wrap, MaybeWrapped};
