pub mod gateway;
pub mod upload;

pub use gateway::ArchiveGateway;
pub use upload::BundlerUploadBackend;
