use crate::context::{ContextInstance, Location, LOCATION_CONTEXT};
use crate::error::ContextTypeError;
use crate::registry::ContextType;
use crate::standard::{decode, encode, expect_instance};
use crate::types::{ModeSet, OriginId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
struct LocationPayload {
    origin: String,
    path: Vec<u32>,
}

/// Travels unchanged until a receiver records the hop.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocationType;

impl ContextType for LocationType {
    fn name(&self) -> &str {
        LOCATION_CONTEXT
    }

    fn supported_modes(&self) -> ModeSet {
        Location::modes()
    }

    fn serialize(&self, instance: &dyn ContextInstance) -> Result<Vec<u8>, ContextTypeError> {
        let location = expect_instance::<Location>(LOCATION_CONTEXT, instance)?;
        encode(
            LOCATION_CONTEXT,
            &LocationPayload {
                origin: location.origin().to_string(),
                path: location.location_id().to_vec(),
            },
        )
    }

    fn deserialize(
        &self,
        version: u32,
        payload: &[u8],
    ) -> Result<Arc<dyn ContextInstance>, ContextTypeError> {
        let payload: LocationPayload = decode(LOCATION_CONTEXT, version, payload)?;
        Ok(Arc::new(Location::received(
            OriginId::from_raw(payload.origin),
            payload.path,
        )))
    }

    fn context_added(
        &self,
        instance: Arc<dyn ContextInstance>,
    ) -> Result<Arc<dyn ContextInstance>, ContextTypeError> {
        let mut location = expect_instance::<Location>(LOCATION_CONTEXT, &*instance)?.clone();
        location.context_added()?;
        Ok(Arc::new(location))
    }
}
