pub mod parser;
pub mod path;
pub mod sdp;
pub mod splitter;
pub mod transport;

pub use parser::*;
pub use path::*;
pub use sdp::*;
pub use splitter::*;
pub use transport::*;
