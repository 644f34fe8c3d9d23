//! Request and response types exchanged with callers.
//!
//! - [`RequestSpec`]: method, path, headers and optional body of one call
//! - [`ResponseHead`]: status and cleaned header map parsed from the transport
//! - [`Response`]: the head plus the fully assembled body

mod request;
pub use request::BodyEncoding;
pub use request::RequestBody;
pub use request::RequestSpec;
pub use request::SUPPORTED_METHODS;

mod response;
pub use response::RawHeaders;
pub use response::Response;
pub use response::ResponseHead;
pub use response::STATUS_PSEUDO_HEADER;
