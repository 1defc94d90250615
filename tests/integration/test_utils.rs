//! Shared helpers for integration tests

use ambit::config::ContextServiceDescriptor;
use ambit::context::Flow;
use ambit::pool::{ExecutorConfig, ManagedExecutor};
use ambit::registry::Registry;
use ambit::setup::{ContextSetup, SharedSetup};
use ambit::standard::{SecurityIdentity, SECURITY_CONTEXT};
use ambit::types::ModeSet;

/// Setup resolved against the standard registry.
pub fn setup_with(descriptor: ContextServiceDescriptor) -> SharedSetup {
    ContextSetup::new(&descriptor, &Registry::with_standard_types()).shared()
}

/// Setup that propagates only `context_info`.
pub fn propagating(context_info: &str) -> SharedSetup {
    setup_with(ContextServiceDescriptor::new("test-service").with_context_info(context_info))
}

/// Pool with a single worker, so consecutive tasks share a thread.
pub fn single_worker(name: &str, setup: SharedSetup) -> ManagedExecutor {
    ManagedExecutor::new(
        ExecutorConfig::new(name)
            .core_pool_size(1)
            .maximum_pool_size(1),
        setup,
    )
}

/// A flow authenticated as `principal`, with the identity allowed on every mode.
pub fn flow_as(principal: &str) -> Flow {
    let mut flow = Flow::origin();
    flow.context()
        .put_instance(SECURITY_CONTEXT, SecurityIdentity::new(principal), ModeSet::all());
    flow
}

pub fn principal_of(flow: &Flow) -> Option<String> {
    flow.peek()
        .and_then(|map| map.instance::<SecurityIdentity>(SECURITY_CONTEXT))
        .map(|identity| identity.principal.clone())
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: std::time::Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    condition()
}

/// True when the flow runs under the cleared, unauthenticated identity.
pub fn is_anonymous(flow: &Flow) -> bool {
    flow.peek()
        .and_then(|map| map.instance::<SecurityIdentity>(SECURITY_CONTEXT))
        .is_some_and(SecurityIdentity::is_anonymous)
}
