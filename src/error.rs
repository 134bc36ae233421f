use super::http::{Error as HttpError, RetryKind};
use std::{io, result};
use thiserror::Error;

pub type Result<T> = result::Result<T, Error>;

/// 存储服务错误
#[derive(Error, Debug)]
pub enum Error {
    /// 网络错误，超时或服务端临时错误，重试可能成功
    #[error("transient network error: {0}")]
    TransientNetwork(#[source] HttpError),

    /// 认证失败，不应重试
    #[error("authentication failed: {0}")]
    Authentication(#[source] HttpError),

    /// 对象不存在
    #[error("object not found: {0}")]
    NotFound(#[source] HttpError),

    /// 上传的数据无法通过校验
    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("invalid upload policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("upload of `{key}` was cancelled")]
    Cancelled { key: String },

    /// 创建文件失败，已上传的块不会被清理
    #[error("failed to make file from {} uploaded blocks: {source}", .contexts.len())]
    FinalizeFailed {
        contexts: Vec<String>,
        #[source]
        source: Box<Error>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Http(HttpError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

impl Error {
    /// 对于分块上传，可以重新发送同一块数据
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransientNetwork(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<HttpError> for Error {
    fn from(err: HttpError) -> Self {
        match err.status_code() {
            Some(401) | Some(403) => Error::Authentication(err),
            Some(404) | Some(612) => Error::NotFound(err),
            _ if err.retry_kind() == RetryKind::Retryable => Error::TransientNetwork(err),
            _ => Error::Http(err),
        }
    }
}
