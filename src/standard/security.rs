use crate::context::{ContextInstance, Entry};
use crate::error::ContextTypeError;
use crate::registry::ContextType;
use crate::standard::{decode, encode, expect_instance};
use crate::types::{ModeSet, PropagationMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SECURITY_CONTEXT: &str = "security";

const ANONYMOUS: &str = "ANONYMOUS";

/// Caller identity a task runs as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityIdentity {
    pub principal: String,
    pub groups: Vec<String>,
}

impl SecurityIdentity {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            groups: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS)
    }

    pub fn is_anonymous(&self) -> bool {
        self.principal == ANONYMOUS && self.groups.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SecurityType;

impl ContextType for SecurityType {
    fn name(&self) -> &str {
        SECURITY_CONTEXT
    }

    fn supported_modes(&self) -> ModeSet {
        PropagationMode::Thread
            | PropagationMode::Rmi
            | PropagationMode::Soap
            | PropagationMode::MimeHeader
    }

    fn serialize(&self, instance: &dyn ContextInstance) -> Result<Vec<u8>, ContextTypeError> {
        encode(
            SECURITY_CONTEXT,
            expect_instance::<SecurityIdentity>(SECURITY_CONTEXT, instance)?,
        )
    }

    fn deserialize(
        &self,
        version: u32,
        payload: &[u8],
    ) -> Result<Arc<dyn ContextInstance>, ContextTypeError> {
        let identity: SecurityIdentity = decode(SECURITY_CONTEXT, version, payload)?;
        Ok(Arc::new(identity))
    }

    /// Cleared workers run unauthenticated rather than with no identity at all.
    fn cleared(&self) -> Option<Entry> {
        Some(Entry::new(
            SecurityIdentity::anonymous(),
            PropagationMode::Thread.into(),
        ))
    }
}
