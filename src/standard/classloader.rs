use crate::context::ContextInstance;
use crate::error::ContextTypeError;
use crate::registry::ContextType;
use crate::standard::{decode, encode, expect_instance};
use crate::types::{ModeSet, PropagationMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const CLASSLOADER_CONTEXT: &str = "classloader";

/// Application class-loading scope a task runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassloaderScope {
    pub application: String,
    pub module: Option<String>,
}

impl ClassloaderScope {
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            module: None,
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }
}

/// Stays inside the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClassloaderType;

impl ContextType for ClassloaderType {
    fn name(&self) -> &str {
        CLASSLOADER_CONTEXT
    }

    fn supported_modes(&self) -> ModeSet {
        PropagationMode::Local | PropagationMode::Thread
    }

    fn serialize(&self, instance: &dyn ContextInstance) -> Result<Vec<u8>, ContextTypeError> {
        encode(
            CLASSLOADER_CONTEXT,
            expect_instance::<ClassloaderScope>(CLASSLOADER_CONTEXT, instance)?,
        )
    }

    fn deserialize(
        &self,
        version: u32,
        payload: &[u8],
    ) -> Result<Arc<dyn ContextInstance>, ContextTypeError> {
        let scope: ClassloaderScope = decode(CLASSLOADER_CONTEXT, version, payload)?;
        Ok(Arc::new(scope))
    }
}
