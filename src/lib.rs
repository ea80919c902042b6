//! `decision_core` is the client-side decision engine of a feature-flagging and experimentation
//! SDK. Given a user, their attributes, and a flag key, it deterministically resolves which
//! variation the user receives and why.
//!
//! # Overview
//!
//! [`ProjectConfig`] is the heart of the engine. It is an immutable snapshot compiled from the
//! datafile published by the server. [`ConfigurationStore`] holds the currently active snapshot;
//! whenever configuration changes, the snapshot is replaced completely. A decision reads one
//! snapshot and uses it to the end.
//!
//! A flag is decided in stages, and the first stage that serves the user wins:
//!
//! 1. a flag-level forced decision set on the [`UserContext`];
//! 2. [holdouts](holdouts), in configuration order;
//! 3. the flag's experiments, in order. Each one honors a rule-level forced decision, client-set
//!    forced variations, the server-side whitelist, the user profile, audience targeting, and
//!    then either bucketing or a [contextual bandit](bandits);
//! 4. the flag's rollout, whose last rule ("Everyone Else") catches users that match a rule's
//!    audience but miss its traffic.
//!
//! Audience targeting uses three-valued logic: an attribute that is missing or of the wrong type
//! makes its condition unknown rather than false. See [`audience`].
//!
//! Bucketing hashes the user's bucketing id with MurmurHash3 into `[0, 10000)`. The hash is
//! compatible with other SDK implementations, so the same user lands in the same variation
//! everywhere. See [`bucketer`].
//!
//! [`Client`] ties it together: it reads snapshots from a [`ConfigProvider`], decides flags, and
//! hands a [`DecisionEvent`] to the configured [`DecisionListener`] after every decision.
//!
//! # Error Handling
//!
//! Problems found while evaluating audiences or bucketing (malformed conditions, stale forced
//! decisions, invalid traffic tables) never abort a decision. They are recorded as
//! [reasons](decision::DecisionReasons) and the engine moves on to the next candidate. Errors
//! about the request itself (no configuration, unknown flag, bandit failure) produce a
//! [`Decision`] without a variation whose reasons contain the [`Error`].
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with the `decision_core`
//! target. Every decision reason is logged as well.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod attributes;
pub mod audience;
pub mod bandits;
pub mod bucketer;
mod client;
mod config;
pub mod configuration_store;
pub mod decision;
mod error;
pub mod events;
pub mod forced_decisions;
pub mod holdouts;
pub mod project;
mod user_context;
pub mod user_profile;
mod variables;

pub use attributes::{AttributeValue, Attributes};
pub use client::{Client, Decision};
pub use config::ClientConfig;
pub use configuration_store::{ConfigProvider, ConfigurationStore};
pub use decision::{DecideOption, DecideOptions};
pub use error::{Error, Result};
pub use events::{DecisionEvent, DecisionListener};
pub use forced_decisions::ForcedDecisionKey;
pub use project::ProjectConfig;
pub use user_context::UserContext;
