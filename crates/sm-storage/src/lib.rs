pub mod crypto;
pub mod identity;
pub mod sqlite;

pub use identity::Keypair;
pub use sqlite::FactStore;
