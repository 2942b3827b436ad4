//! Registered method identity.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CallError;
use crate::matcher::RequestMatcher;

/// How the server treats the first message of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadHandling {
    /// Publish as soon as metadata is routed.
    #[default]
    None,
    /// Read the first message and hand it over with the call.
    ReadInitialMessage,
}

/// Registration flags for a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodFlags(u32);

impl MethodFlags {
    /// Only accept calls the client marked idempotent.
    pub const IDEMPOTENT_REQUEST: u32 = 0x10;
    pub const USED_MASK: u32 = Self::IDEMPOTENT_REQUEST;

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn idempotent() -> Self {
        Self(Self::IDEMPOTENT_REQUEST)
    }

    pub fn from_bits(bits: u32) -> Result<Self, CallError> {
        if bits & !Self::USED_MASK != 0 {
            return Err(CallError::InvalidFlags(bits));
        }
        Ok(Self(bits))
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_idempotent_only(&self) -> bool {
        self.0 & Self::IDEMPOTENT_REQUEST != 0
    }
}

/// Immutable identity of a registered method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpec {
    pub name: String,
    /// None matches any host.
    pub host: Option<String>,
    pub payload: PayloadHandling,
    pub flags: MethodFlags,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
            payload: PayloadHandling::None,
            flags: MethodFlags::empty(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_payload(mut self, payload: PayloadHandling) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Same name and same host (host-less counts as its own host).
    pub fn same_route(&self, other: &MethodSpec) -> bool {
        self.name == other.name && self.host == other.host
    }
}

/// Index of a registered method within its server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodHandle(pub(crate) usize);

impl MethodHandle {
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// A registered method and the matcher serving it.
///
/// The matcher is created when the server starts and never replaced.
#[derive(Debug, Clone)]
pub struct RegisteredMethod {
    pub spec: MethodSpec,
    pub matcher: Arc<dyn RequestMatcher>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_reject_unknown_bits() {
        assert!(MethodFlags::from_bits(0).is_ok());
        assert!(MethodFlags::from_bits(MethodFlags::IDEMPOTENT_REQUEST)
            .unwrap()
            .is_idempotent_only());
        assert_eq!(MethodFlags::from_bits(0x1), Err(CallError::InvalidFlags(0x1)));
        assert_eq!(MethodFlags::idempotent().bits(), MethodFlags::IDEMPOTENT_REQUEST);
        assert_eq!(MethodFlags::empty().bits(), 0);
    }

    #[test]
    fn test_same_route() {
        let a = MethodSpec::new("/svc/A");
        let b = MethodSpec::new("/svc/A").with_payload(PayloadHandling::ReadInitialMessage);
        let c = MethodSpec::new("/svc/A").with_host("h");

        assert!(a.same_route(&b));
        assert!(!a.same_route(&c));
    }

    #[test]
    fn test_payload_handling_serde_names() {
        let p: PayloadHandling = serde_json::from_str("\"read_initial_message\"").unwrap();
        assert_eq!(p, PayloadHandling::ReadInitialMessage);
    }
}
