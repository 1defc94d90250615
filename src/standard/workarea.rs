use crate::context::{ContextInstance, Entry, WorkArea, WORKAREA_CONTEXT};
use crate::error::ContextTypeError;
use crate::registry::ContextType;
use crate::standard::{decode, encode, expect_instance};
use crate::types::{ModeSet, PropagationMode};
use std::sync::Arc;

/// Carries every view. Each view entry decides its own modes, so the type
/// itself accepts all of them and filters per entry on the way out.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkAreaType;

impl ContextType for WorkAreaType {
    fn name(&self) -> &str {
        WORKAREA_CONTEXT
    }

    fn supported_modes(&self) -> ModeSet {
        ModeSet::all()
    }

    fn serialize(&self, instance: &dyn ContextInstance) -> Result<Vec<u8>, ContextTypeError> {
        encode(
            WORKAREA_CONTEXT,
            expect_instance::<WorkArea>(WORKAREA_CONTEXT, instance)?,
        )
    }

    fn deserialize(
        &self,
        version: u32,
        payload: &[u8],
    ) -> Result<Arc<dyn ContextInstance>, ContextTypeError> {
        let area: WorkArea = decode(WORKAREA_CONTEXT, version, payload)?;
        Ok(Arc::new(area))
    }

    fn context_to_propagate(
        &self,
        entry: &Entry,
        mode: PropagationMode,
    ) -> Option<Arc<dyn ContextInstance>> {
        let filtered = entry.downcast::<WorkArea>()?.filtered(mode);
        if filtered.is_empty() {
            return None;
        }
        Some(Arc::new(filtered))
    }
}
