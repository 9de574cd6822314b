pub mod resume;
mod schema;
mod store;

pub use resume::{sanitize_for_resume, ResumePolicy};
pub use schema::{
    decode_session, Blob, DecodeError, Part, Role, Session, Strictness, Turn, Usage,
    SESSION_FIELDS,
};
pub use store::{
    derive_path, list_session_files, load, model_turns, read, validate, write_new, SessionInfo,
    SESSION_SUFFIX,
};
