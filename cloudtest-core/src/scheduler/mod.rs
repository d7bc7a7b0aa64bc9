// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The scheduler: task queue, event loop, retry policy and health checks
//! (components D through G of `spec.md` §2).

pub mod dispatcher;
pub mod events;
pub mod health;
pub mod queue;
pub mod retry;

pub use dispatcher::{Dispatcher, DispatcherDeps};
pub use events::OperationEvent;
pub use queue::{Assignment, TaskQueue};
pub use retry::{InstanceRetestCounter, RetryDecision, RetryPolicy};
