pub mod session;
pub mod supervisor;
pub mod transport;

pub use session::{LinkState, MessageHandler, Session, SessionMonitor, SessionSettings};
pub use supervisor::{Supervisor, SupervisorSettings};
pub use transport::{MqttTransport, Transport, TransportError, TransportEvent};
