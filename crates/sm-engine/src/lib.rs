pub mod archive;
pub mod config;
pub mod conversations;
pub mod service;
pub mod share;
pub mod sources;
pub mod sync;
pub mod vault;

pub use archive::{ArchiveGateway, BundlerUploadBackend};
pub use config::EngineConfig;
pub use conversations::ConversationSync;
pub use service::SyncService;
pub use share::ShareChannel;
pub use sync::SyncEngine;
pub use vault::Vault;
