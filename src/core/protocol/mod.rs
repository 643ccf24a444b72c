// src/core/protocol/mod.rs

pub mod request;
pub mod resp_frame;
pub use request::{RequestArgs, next_request};
pub use resp_frame::{RespFrame, RespFrameCodec};
