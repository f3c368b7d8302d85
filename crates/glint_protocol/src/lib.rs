#![forbid(unsafe_code)]

pub mod framing;
pub mod message;

pub use framing::LineBuffer;
pub use message::{ChatLine, EmoteSpan, parse_line};
