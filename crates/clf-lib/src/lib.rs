//! Filter class predictor library
//!
//! This crate provides the core functionality for:
//! - The false-positive cost model of multi-unit filters
//! - Labeled dataset loading from CSV
//! - A pluggable classifier with persist-then-reload semantics
//! - The cost-driven retrain policy and the shared active model
//! - The line protocol, per-connection sessions and the TCP listener
//! - Health checks and observability

pub mod classifier;
pub mod cost;
pub mod dataset;
pub mod error;
pub mod health;
pub mod listener;
pub mod models;
pub mod observability;
pub mod policy;
pub mod protocol;
pub mod session;

pub use classifier::{ClassModel, ClassifierAdapter, DecisionTreeTrainer, Trainer, TreeModel};
pub use cost::CostModel;
pub use dataset::DatasetResolver;
pub use error::{ClfError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use listener::Listener;
pub use models::*;
pub use observability::{ClfMetrics, StructuredLogger};
pub use policy::{PolicyConfig, RetrainOutcome, RetrainPolicy};
pub use protocol::{parse_message, Directive};
pub use session::{ServiceContext, Session, DEFAULT_MAX_MESSAGE_BYTES};
