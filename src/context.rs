//! # Operating Context
//!
//! The dispatcher consults the current mode and severity through the
//! [`ContextProvider`] seam rather than reading process-wide state, so tests
//! and embedders can supply whatever context they need.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Current operating state consulted during rule matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingContext {
    /// Operating-state label, e.g. a market regime such as `BULL`
    pub mode: String,
    /// Escalation level; higher is more severe
    pub severity: i32,
}

impl OperatingContext {
    pub fn new(mode: impl Into<String>, severity: i32) -> Self {
        Self {
            mode: mode.into(),
            severity,
        }
    }
}

/// External state service supplying the current operating context
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn current(&self) -> Result<OperatingContext>;
}

/// Context provider holding a value set by its owner
#[derive(Debug)]
pub struct StaticContextProvider {
    context: RwLock<OperatingContext>,
}

impl StaticContextProvider {
    pub fn new(mode: impl Into<String>, severity: i32) -> Self {
        Self {
            context: RwLock::new(OperatingContext::new(mode, severity)),
        }
    }

    pub fn set_mode(&self, mode: impl Into<String>) {
        self.context.write().mode = mode.into();
    }

    pub fn set_severity(&self, severity: i32) {
        self.context.write().severity = severity;
    }

    pub fn set(&self, context: OperatingContext) {
        *self.context.write() = context;
    }
}

#[async_trait]
impl ContextProvider for StaticContextProvider {
    async fn current(&self) -> Result<OperatingContext> {
        Ok(self.context.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_updates() {
        let provider = StaticContextProvider::new("BULL", 3);
        assert_eq!(provider.current().await.unwrap(), OperatingContext::new("BULL", 3));

        provider.set_mode("BEAR");
        provider.set_severity(7);
        assert_eq!(provider.current().await.unwrap(), OperatingContext::new("BEAR", 7));
    }
}
