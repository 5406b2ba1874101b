//! Test helpers: an in-memory relay and a ready-to-use [`Core`].

mod relay;

use std::sync::Arc;
use std::time::Duration;

pub use relay::{InMemoryRelay, InMemorySocket};

use crate::secure_storage::InMemoryKeyStorage;
use crate::storage::InMemoryStorage;
use crate::{AppMetadata, Core, CoreConfig};

/// Config with short timeouts suited to tests.
pub fn test_config(name: &str) -> CoreConfig {
    CoreConfig::new(
        AppMetadata::new(name, format!("https://{}.example", name)).with_description("test peer"),
    )
    .with_ack_timeout(Duration::from_secs(2))
}

/// A started core on `relay` with in-memory storage.
///
/// # Panics
///
/// Panics if the core fails to start.
pub async fn connected_core(relay: &InMemoryRelay, name: &str) -> Core {
    let core = Core::new(
        test_config(name),
        Arc::new(relay.socket()),
        Arc::new(InMemoryKeyStorage::new()),
        Arc::new(InMemoryStorage::new()),
    );
    core.start().await.expect("core starts on in-memory relay");
    core
}
