//! # babel-dispatch
//!
//! 多后端调度层：加权轮询与有序回退选择、故障转移冷却、令牌桶准入及有界重试。
//!
//! Resilient multi-backend dispatch for translation and language-detection
//! services.
//!
//! ## Overview
//!
//! A dispatch service holds a set of interchangeable backends. Each request is
//! routed to one of them by a selector, admitted through the backend's token
//! bucket, and invoked under a per-call timeout. Backends that keep failing are
//! taken out of rotation for an escalating cooldown; failed requests are retried
//! on whichever backend the selector picks next.
//!
//! ## Key Features
//!
//! - **Smooth weighted round-robin** and **ordered fallback** selection
//! - **Failover** with consecutive-failure threshold and a cooldown that grows by one base unit per disable cycle
//! - **Admission control** with a token bucket per backend
//! - **Bounded retries** with a fixed, cancellable cooldown
//! - **Hot reload**: rebuild from configuration and swap atomically
//! - **Telemetry hooks** for selections, task gauges, availability and token usage
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use babel_dispatch::config::AppConfig;
//! use babel_dispatch::facade::{DetectorRegistry, LanguageGateway, TranslatorRegistry};
//!
//! # async fn run(translators: TranslatorRegistry) -> babel_dispatch::Result<()> {
//! let cfg = AppConfig::load("babel.yaml").await?;
//! let gateway = LanguageGateway::new(translators, DetectorRegistry::new("detector"), &cfg)?;
//! let outcome = gateway.process("こんにちは").await?;
//! println!("{:?}", outcome.translation());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`routing`] | Selector traits, weighted round-robin and fallback selectors |
//! | [`resilience`] | Failover handler and admission limiter |
//! | [`backend`] | Backend trait and the dispatchable wrapper |
//! | [`dispatch`] | Dispatch service with bounded retries |
//! | [`config`] | YAML configuration, defaults and validation |
//! | [`registry`] | Backend factories and atomic reload |
//! | [`telemetry`] | Dispatch events, observers and logging setup |
//! | [`types`] | Request, response and token usage types |
//! | [`facade`] | Detect-then-translate gateway |

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod facade;
pub mod registry;
pub mod resilience;
pub mod routing;
pub mod telemetry;
pub mod types;

// Re-export main types for convenience
pub use backend::{Backend, BackendSettings, CallContext, DynBackend};
pub use dispatch::{DispatchService, Dispatched, RetryPolicy};
pub use facade::{LanguageGateway, Outcome};
pub use routing::SelectorKind;
pub use telemetry::{DispatchEvent, DispatchObserver};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{BackendError, BackendErrorKind, Error, ErrorContext};
