//! Subsystems: the wire protocol, the world document and its merge
//! processor, and the reputation ledger.

pub mod protocol;
pub mod reputation;
pub mod sync;
pub mod world;
