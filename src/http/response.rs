use getset::{CopyGetters, Getters};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use std::fmt;

pub type StatusCode = u16;

const REQUEST_ID_HEADER: &str = "X-Reqid";

/// HTTP 响应，响应体已被完整读出
#[derive(Clone, Getters, CopyGetters)]
pub struct Response {
    #[get_copy = "pub"]
    status_code: StatusCode,

    #[get = "pub"]
    headers: HeaderMap,

    #[get = "pub"]
    body: Vec<u8>,
}

impl Response {
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder {
            response: Response {
                status_code: 200,
                headers: HeaderMap::new(),
                body: Vec::new(),
            },
        }
    }

    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers.get(name.as_ref()).and_then(|v| v.to_str().ok())
    }

    pub fn request_id(&self) -> Option<&str> {
        self.header(REQUEST_ID_HEADER)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn parse_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Response")
            .field("status_code", &self.status_code)
            .field("headers", &self.headers)
            .field("body_size", &self.body.len())
            .finish()
    }
}

pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    pub fn status_code(mut self, status_code: StatusCode) -> Self {
        self.response.status_code = status_code;
        self
    }

    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_ref().as_bytes()),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.response.headers.append(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.response.body = body.into();
        self
    }

    pub fn build(self) -> Response {
        self.response
    }
}
