// Copyright 2026 Cortex Contributors
// SPDX-License-Identifier: Apache-2.0

//! menu-capture: capture structured API responses from a remote browser
//! while walking a page's interactive items.
//!
//! A run provisions a remote browser ([`provision`]), opens a page on it
//! ([`session`]), attaches a [`interceptor::ResponseInterceptor`] to the
//! page's network traffic, then lets the [`driver::GuidedDriver`] open and
//! close every item so the page fetches each item's data. Matching payloads
//! are written to a JSON file ([`output`]) and the session is released.

pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod interceptor;
pub mod output;
pub mod provision;
pub mod run;
pub mod session;

pub use error::{CaptureError, Result};
