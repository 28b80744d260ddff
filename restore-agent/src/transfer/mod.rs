//! Upload transport: connection factories, retry policy and the
//! request/payload/acknowledgement exchange.

pub mod connector;
pub mod progress;
pub mod retry;
pub mod upload;

pub use connector::{Connector, TcpConnector};
pub use retry::{with_retry, with_retry_when, RetryPolicy};
pub use upload::{Payload, UploadReceipt, UploadTransport};
