pub mod io;
pub mod rtsp_session;
pub mod state;
pub mod track;

pub use io::*;
pub use rtsp_session::*;
pub use state::{RtspError, RtspResult, SessionState};
pub use track::*;
