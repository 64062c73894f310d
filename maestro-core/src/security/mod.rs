//! Security components for the request path
//!
//! Rate limiting ([`RateLimiter`]) and input validation
//! ([`InputValidator`]) sit in front of every request before it reaches
//! the model.

pub mod rate_limit;
pub mod validate;

pub use rate_limit::{
    LimitKind, RateLimitConfig, RateLimitExceeded, RateLimiter, UsageSnapshot, WindowUsage,
};
pub use validate::{
    detect_prompt_injection, sanitize_input, InputContext, InputValidator, ValidationConfig,
    ValidationError, ValidationKind, DEFAULT_INJECTION_PATTERNS,
};
