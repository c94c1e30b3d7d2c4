//! Webhook handling: payload parsing, target matching and signatures.
//!
//! This module provides:
//! - Provider-specific parsers producing a canonical [`PushEvent`](crate::types::PushEvent)
//! - Target matching on parent organization and anchored branch patterns
//! - HMAC-SHA256 signature verification

pub mod matcher;
pub mod parser;
pub mod signature;

pub use matcher::{MatchError, TargetMatcher, parent_from_git_url_prefix};
pub use parser::{UnknownProvider, WebhookProvider};
pub use signature::{
    WebhookSecrets, compute_signature, format_signature_header, parse_signature_header,
    verify_signature,
};
