/*
[INPUT]:  Stream schema definitions and serde requirements
[OUTPUT]: Typed Rust structs/enums with serialization support
[POS]:    Data layer - type definitions for stream payloads
[UPDATE]: When stream schema changes or new types added
*/

pub mod enums;
pub mod models;

pub use enums::*;
pub use models::*;
