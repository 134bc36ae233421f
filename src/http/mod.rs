//! HTTP 调用层
//!
//! [`HttpCaller`] 是可替换的传输实现，默认使用 [`UreqCaller`]

mod caller;
pub(crate) mod client;
mod error;
mod request;
mod response;

pub use caller::{HttpCaller, UreqCaller};
pub use error::{Error, ErrorKind, Result, RetryKind};
pub use http::{header, Method};
pub use request::{Request, RequestBuilder};
pub use response::{Response, ResponseBuilder, StatusCode};
