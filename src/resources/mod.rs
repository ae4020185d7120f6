//! Readable resources
//!
//! Two variants implement the resource contract: [`StaticResource`] serves
//! inline bytes or fetches a URL, [`DynamicResource`] delegates reads to a
//! tool invocation.

mod dynamic;
mod static_resource;

use async_trait::async_trait;

use crate::protocol::{Resource, ResourceContents};
use crate::{Error, Result};

pub use dynamic::DynamicResource;
pub use static_resource::{StaticContent, StaticResource};

/// A resource the resource manager can serve.
#[async_trait]
pub trait ReadableResource: Send + Sync {
    /// Wire descriptor; `uri` is the primary key.
    fn definition(&self) -> &Resource;

    /// Produce the resource contents.
    async fn read(&self) -> Result<Vec<ResourceContents>>;

    /// Subscribe to change notifications.
    async fn subscribe(&self) -> Result<()> {
        Err(Error::Resource(format!(
            "subscribe is not yet implemented for \"{}\"",
            self.definition().uri
        )))
    }
}
