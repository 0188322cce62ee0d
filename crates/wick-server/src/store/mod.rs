pub mod db;
pub mod model;

pub use db::Store;
pub use model::SecretRecord;
