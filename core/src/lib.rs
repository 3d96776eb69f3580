#![allow(clippy::too_many_arguments, clippy::identity_op)]

pub mod codec;
pub mod engine;
pub mod error;
pub mod fs;
pub mod resource;
pub mod scheduler;
pub mod sys;
pub mod video;

pub use crate::engine::Engine;
pub use crate::error::{Error, Result};
pub use crate::resource::Platform;
