//! Built-in context types and the names configuration refers to them by.

mod classloader;
mod location;
mod naming;
mod security;
mod workarea;

pub use classloader::{ClassloaderScope, ClassloaderType, CLASSLOADER_CONTEXT};
pub use location::LocationType;
pub use naming::{NamingScope, NamingType, NAMING_CONTEXT};
pub use security::{SecurityIdentity, SecurityType, SECURITY_CONTEXT};
pub use workarea::WorkAreaType;

use crate::context::{ContextInstance, LOCATION_CONTEXT, WORKAREA_CONTEXT};
use crate::error::ContextTypeError;
use crate::registry::ContextType;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, OnceLock};

/// Types a managed resource propagates when its descriptor names none, in
/// installation order.
pub const STANDARD_SETUP_TYPES: [&str; 4] = [
    CLASSLOADER_CONTEXT,
    NAMING_CONTEXT,
    SECURITY_CONTEXT,
    WORKAREA_CONTEXT,
];

/// Shared instances of every built-in factory.
pub fn factories() -> Vec<Arc<dyn ContextType>> {
    static FACTORIES: OnceLock<Vec<Arc<dyn ContextType>>> = OnceLock::new();
    FACTORIES
        .get_or_init(|| {
            vec![
                Arc::new(ClassloaderType) as Arc<dyn ContextType>,
                Arc::new(NamingType),
                Arc::new(SecurityType),
                Arc::new(WorkAreaType),
                Arc::new(LocationType),
            ]
        })
        .clone()
}

/// Registry name for a configuration token.
///
/// Case-insensitive. Known aliases map to the built-in names, anything else
/// is returned trimmed and lowercased.
pub fn canonical_name(token: &str) -> String {
    let lowered = token.trim().to_lowercase();
    match lowered.as_str() {
        "classloader" | "classloading" => CLASSLOADER_CONTEXT.to_string(),
        "jndi" | "naming" => NAMING_CONTEXT.to_string(),
        "security" => SECURITY_CONTEXT.to_string(),
        "workarea" | "work-area" | "work_area" => WORKAREA_CONTEXT.to_string(),
        "location" => LOCATION_CONTEXT.to_string(),
        _ => lowered,
    }
}

pub(crate) fn encode<T: Serialize>(
    context_type: &str,
    value: &T,
) -> Result<Vec<u8>, ContextTypeError> {
    bincode::serialize(value).map_err(|e| ContextTypeError::serialize(context_type, e))
}

pub(crate) fn decode<T: DeserializeOwned>(
    context_type: &str,
    version: u32,
    payload: &[u8],
) -> Result<T, ContextTypeError> {
    if version != 1 {
        return Err(ContextTypeError::deserialize(
            context_type,
            version,
            "unsupported payload version",
        ));
    }
    bincode::deserialize(payload).map_err(|e| ContextTypeError::deserialize(context_type, version, e))
}

pub(crate) fn expect_instance<'a, T: ContextInstance>(
    context_type: &str,
    instance: &'a dyn ContextInstance,
) -> Result<&'a T, ContextTypeError> {
    instance
        .downcast_ref::<T>()
        .ok_or_else(|| ContextTypeError::WrongInstance(context_type.to_string()))
}
