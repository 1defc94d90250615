use crate::context::ContextInstance;
use crate::error::ContextTypeError;
use crate::registry::ContextType;
use crate::standard::{decode, encode, expect_instance};
use crate::types::{ModeSet, PropagationMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const NAMING_CONTEXT: &str = "naming";

/// Component whose naming environment lookups resolve against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingScope {
    pub application: String,
    pub module: String,
    pub component: String,
}

impl NamingScope {
    pub fn new(
        application: impl Into<String>,
        module: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        Self {
            application: application.into(),
            module: module.into(),
            component: component.into(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NamingType;

impl ContextType for NamingType {
    fn name(&self) -> &str {
        NAMING_CONTEXT
    }

    fn supported_modes(&self) -> ModeSet {
        PropagationMode::Thread | PropagationMode::Rmi
    }

    fn serialize(&self, instance: &dyn ContextInstance) -> Result<Vec<u8>, ContextTypeError> {
        encode(
            NAMING_CONTEXT,
            expect_instance::<NamingScope>(NAMING_CONTEXT, instance)?,
        )
    }

    fn deserialize(
        &self,
        version: u32,
        payload: &[u8],
    ) -> Result<Arc<dyn ContextInstance>, ContextTypeError> {
        let scope: NamingScope = decode(NAMING_CONTEXT, version, payload)?;
        Ok(Arc::new(scope))
    }
}
