#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

pub mod indices;
pub mod instructions;
pub mod io;
pub mod module;
pub mod pool;
pub mod swf;
pub mod types;

pub use module::{AbcFile, WriteOptions};
pub use swf::Swf;
