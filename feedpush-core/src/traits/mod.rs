pub use reader::*;
pub use source::*;
pub use submitter::*;

mod reader;
mod source;
mod submitter;
