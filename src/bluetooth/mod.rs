pub mod bluez;
pub mod codec;
pub mod discovery;
pub mod session;
pub mod transport;

pub use bluez::BluezTransport;
pub use discovery::{scan_candidates, DriverProfile};
pub use session::{LinkSession, SessionTimeouts};
