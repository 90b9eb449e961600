pub mod audit;
pub mod crosslist;
pub mod export;

pub use audit::{AuditLog, AuditRecord};
pub use crosslist::CrosslistService;
