pub mod resolve;
pub mod socket;

pub use resolve::{Network, Resolve, SystemResolver, Target};
pub use socket::{open_transport, DatagramSocket, Frame, RawSocket, Transport, TransportKind};
