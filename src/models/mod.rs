//! Data models for filmacquire.

mod comment;
mod movie;
mod proxy;

pub use comment::{CommentKey, CommentRecord};
pub use movie::{CandidateMovie, MovieRecord};
pub use proxy::{EgressProxy, ProxyProtocol};
