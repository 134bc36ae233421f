use getset::{CopyGetters, Getters, MutGetters};
use http::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method,
};
use std::{fmt, time::Duration};

/// HTTP 请求
///
/// 请求体一次性放在内存中，因此同一个请求可以被重复发送
#[derive(Clone, Getters, CopyGetters, MutGetters)]
pub struct Request {
    #[get = "pub"]
    method: Method,

    #[get = "pub"]
    url: String,

    #[get = "pub"]
    #[get_mut = "pub"]
    headers: HeaderMap,

    #[get = "pub"]
    body: Vec<u8>,

    #[get_copy = "pub"]
    timeout: Option<Duration>,
}

impl Request {
    pub fn builder(method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            request: Request {
                method,
                url: url.into(),
                headers: HeaderMap::new(),
                body: Vec::new(),
                timeout: None,
            },
        }
    }

    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers.get(name.as_ref()).and_then(|v| v.to_str().ok())
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body_size", &self.body.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// 设置请求头，非法的请求头名称或值会被忽略
    pub fn header(mut self, name: HeaderName, value: impl AsRef<str>) -> RequestBuilder {
        if let Ok(value) = HeaderValue::from_str(value.as_ref()) {
            self.request.headers.insert(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> RequestBuilder {
        self.request.body = body.into();
        self
    }

    /// 单次请求的超时时长，覆盖 HTTP 客户端的默认读超时
    pub fn timeout(mut self, timeout: Duration) -> RequestBuilder {
        self.request.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}
