pub mod evidence_store;
pub mod locking;
pub mod results;

pub use evidence_store::EvidenceStore;
pub use results::{load_result, store_result};
