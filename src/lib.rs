//! Rust SDK for Featurevisor, a feature flags, experiments, and remote configuration management
//! tool.
//!
//! # Overview
//!
//! The SDK revolves around an [`Instance`] that evaluates features of a datafile against a
//! [`Context`] of user attributes. A feature evaluates to three things:
//!
//! - whether it is enabled (flag),
//! - which variation applies,
//! - values of its variables.
//!
//! Every evaluation returns an [`Evaluation`] carrying the resolved value together with the
//! [`EvaluationReason`] explaining it. Bucketing is deterministic: the same context gets the same
//! result in every process and every SDK reading the same datafile.
//!
//! [`Hook`]s can rewrite evaluation requests, bucket keys and values, and evaluation results.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. They are only returned when configuring the SDK
//! (e.g., parsing a datafile or registering a hook).
//!
//! Evaluation itself never fails. Missing features or variables are reported through the
//! evaluation reason, and unexpected faults (including panics inside hooks) produce an evaluation
//! with [`EvaluationReason::Error`] and an [`EvaluationError`] attached.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages under
//! the `featurevisor` target, with structured key-values. Consider integrating a `log`-compatible
//! logger implementation for better visibility into SDK operations.
//!
//! # Examples
//!
//! Examples can be found in the `demos` directory of the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod bucketer;
mod child;
mod conditions;
mod config;
mod context;
pub mod datafile;
mod datafile_reader;
mod datafile_store;
mod error;
mod eval;
mod evaluation;
mod hooks;
mod instance;
mod regex_cache;
mod segments;

pub use child::ChildInstance;
pub use config::InstanceConfig;
pub use context::{get_value_from_context, AttributeValue, Context};
pub use datafile::DatafileContent;
pub use datafile_reader::{get_variation_from_weights, DatafileDiff, DatafileReader};
pub use error::{Error, EvaluationError, Result};
pub use eval::{evaluate, evaluate_with_hooks, EvaluateRequest};
pub use evaluation::{
    EvaluatedFeature, EvaluatedFeatures, Evaluation, EvaluationReason, EvaluationType,
    StickyFeatures,
};
pub use hooks::{BucketKeyInput, BucketValueInput, Hook, HookHandle, HooksManager};
pub use instance::{Instance, OverrideOptions};
pub use regex_cache::RegexCache;
