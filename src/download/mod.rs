//! Transfer engines and the retry policy wrapped around them

pub mod engine;
pub mod http;
pub mod retry;
pub mod ytdlp;

pub use engine::*;
pub use http::*;
pub use retry::*;
pub use ytdlp::*;
