use super::{Request, Response, StatusCode};
use getset::Getters;
use http::Method;
use serde::Deserialize;
use std::{fmt, result};
use thiserror::Error;

pub type Result<T> = result::Result<T, Error>;

/// 是否可以重试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    /// 重新发送同一个请求可能会成功
    Retryable,
    /// 重新发送同一个请求也不会成功
    Unretryable,
}

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("status code {code}: {message}")]
    StatusCode { code: StatusCode, message: String },
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// HTTP 调用错误，附带请求方法，URL 和七牛的请求 ID
#[derive(Error, Getters)]
#[error("{method} {url}: {kind}")]
#[get = "pub"]
pub struct Error {
    #[source]
    kind: ErrorKind,
    method: Method,
    url: String,
    request_id: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl Error {
    pub fn new(kind: ErrorKind, request: &Request, response: Option<&Response>) -> Error {
        Error {
            kind,
            method: request.method().to_owned(),
            url: request.url().to_owned(),
            request_id: response.and_then(|r| r.request_id()).map(|id| id.to_owned()),
        }
    }

    pub fn new_from_parts(kind: ErrorKind, method: Method, url: impl Into<String>) -> Error {
        Error {
            kind,
            method,
            url: url.into(),
            request_id: None,
        }
    }

    /// 根据非 2xx 响应构建错误，尝试从 `{"error": "..."}` 响应体中提取错误信息
    pub fn from_status(request: &Request, response: &Response) -> Error {
        let message = response
            .parse_json::<ErrorBody>()
            .map(|body| body.error)
            .unwrap_or_else(|_| String::from_utf8_lossy(response.body()).into_owned());
        Self::new(
            ErrorKind::StatusCode {
                code: response.status_code(),
                message,
            },
            request,
            Some(response),
        )
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        match &self.kind {
            ErrorKind::StatusCode { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout(_))
    }

    /// 网络错误，超时和服务端 5xx 错误可以重试，其中 579（回调失败）除外
    pub fn retry_kind(&self) -> RetryKind {
        match &self.kind {
            ErrorKind::Transport(_) | ErrorKind::Timeout(_) => RetryKind::Retryable,
            ErrorKind::StatusCode { code, .. } => match code {
                579 => RetryKind::Unretryable,
                500..=599 => RetryKind::Retryable,
                _ => RetryKind::Unretryable,
            },
            ErrorKind::Decode(_) => RetryKind::Unretryable,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("request_id", &self.request_id)
            .finish()
    }
}
