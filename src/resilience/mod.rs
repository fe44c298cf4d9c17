//! 弹性模块：后端级故障转移与令牌桶准入控制。
//!
//! # Resilience Primitives Module
//!
//! Per-backend resilience primitives.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`failover`] | Failure counting with escalating, time-boxed disablement |
//! | [`rate_limiter`] | Token bucket admission gate with deadline and cancellation |
//!
//! ## Failover
//!
//! A backend moves between three states:
//! - **Healthy**: selectable
//! - **Cooling down**: `max_failures` failures started a disable cycle; the window
//!   is `cycle * cooldown_base`
//! - **Permanently disabled**: `max_disable_cycles` cycles were reached; only a
//!   rebuild from configuration brings it back
//!
//! ```rust
//! use babel_dispatch::resilience::failover::{FailoverConfig, FailoverHandler};
//!
//! let handler = FailoverHandler::new("primary", FailoverConfig::new().with_max_failures(1));
//! assert!(handler.on_failure());
//! assert!(handler.is_disabled());
//! ```

pub mod failover;
pub mod rate_limiter;

pub use failover::{FailoverConfig, FailoverHandler, FailoverSnapshot, FailoverStatus};
pub use rate_limiter::{AdmissionDenied, AdmissionLimiter, RateLimitConfig, RateLimiterSnapshot};
