//! IdP metadata store and SP metadata rendering.

pub mod idp;
pub mod sp;
pub mod store;

pub use idp::{IdpMetadata, BINDING_POST, BINDING_REDIRECT};
pub use sp::sp_metadata_xml;
pub use store::{spawn_refresh_task, MetadataSource, MetadataStore};
