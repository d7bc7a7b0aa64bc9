// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI plumbing for the `cloudtest` binary. See [`dispatch::CloudTestApp`].

pub mod dispatch;
