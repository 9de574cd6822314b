//! Formats and pure logic shared by the banana engine and CLI: the model
//! table, the PNG text codec, the session file schema and the embedded
//! metadata record.

pub mod error;
pub mod events;
pub mod metadata;
pub mod models;
pub mod png;
pub mod session;
