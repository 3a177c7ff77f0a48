pub mod packet;
pub mod transport;

pub use packet::{ClientCodec, Frame, FunctionCode, Request, Response, ServerCodec};
pub use transport::{RegisterIo, Transport};
