//! # Quizroom
//!
//! This library runs live, classroom-paced quiz sessions. An instructor
//! steps through questions while students poll for the current view and
//! send answers. Answers are normalized and grouped into buckets the
//! instructor can merge, and selected buckets can be put to a vote.
//!
//! Clients only poll, so nothing runs in the background: a question whose
//! time is up is closed by the first request that notices. Every session
//! is one stored record, loaded and written back per request by the
//! [`room::Engine`].

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::wildcard_imports)]
#![allow(clippy::module_name_repetitions)]

pub mod attempt;
pub mod clock;
pub mod config;
pub mod constants;
pub mod controls;
pub mod error;
pub mod id;
pub mod question;
pub mod responses;
pub mod resync;
pub mod room;
pub mod session;
pub mod store;
pub mod vote;

pub use error::Error;
pub use id::Id;
pub use room::{Engine, IncomingMessage, Reply};
