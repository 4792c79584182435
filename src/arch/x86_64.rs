pub mod io;

pub use io::PortIo;
