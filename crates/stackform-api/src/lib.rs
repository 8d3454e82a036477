// stackform-api: control-plane clients (HTTP gateway + in-memory sandbox)

pub mod error;
pub mod http;
pub mod platform;
pub mod record;
pub mod sandbox;
pub mod transport;

pub use error::Error;
pub use http::HttpPlatform;
pub use platform::{AnyPlatform, Platform};
pub use record::{Attributes, CreateRequest, Filter, LookupQuery, Record};
pub use sandbox::{Call, Fault, FaultKind, Operation, SANDBOX_VPC_ID, SandboxPlatform};
pub use transport::{TlsMode, TransportConfig};
