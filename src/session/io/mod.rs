pub mod tcp_writer;

pub use tcp_writer::{SharedTcpWriter, TcpWriter};
