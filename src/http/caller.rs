use super::{Error, ErrorKind, Request, Response, Result};
use log::debug;
use std::{
    error::Error as StdError,
    io::{self, Read},
    time::Duration,
};
use ureq::{Agent, AgentBuilder, Error as UreqError};

const USER_AGENT: &str = concat!("QiniuStorageService/", env!("CARGO_PKG_VERSION"));

/// HTTP 调用接口
///
/// 只负责把请求发出去并拿回响应，任何状态码都作为成功的响应返回，
/// 只有网络错误和超时才返回错误
pub trait HttpCaller: Send + Sync {
    fn call(&self, request: &Request) -> Result<Response>;
}

/// 基于 ureq 的 HTTP 客户端
#[derive(Debug, Clone)]
pub struct UreqCaller {
    agent: Agent,
}

impl UreqCaller {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            agent: AgentBuilder::new()
                .timeout_connect(connect_timeout)
                .timeout_read(read_timeout)
                .user_agent(USER_AGENT)
                .build(),
        }
    }
}

impl From<Agent> for UreqCaller {
    fn from(agent: Agent) -> Self {
        Self { agent }
    }
}

impl HttpCaller for UreqCaller {
    fn call(&self, request: &Request) -> Result<Response> {
        let mut ureq_request = self.agent.request(request.method().as_str(), request.url());
        for (name, value) in request.headers() {
            if let Ok(value) = value.to_str() {
                ureq_request = ureq_request.set(name.as_str(), value);
            }
        }
        if let Some(timeout) = request.timeout() {
            ureq_request = ureq_request.timeout(timeout);
        }

        let response = match ureq_request.send_bytes(request.body()) {
            Ok(response) => response,
            Err(UreqError::Status(_, response)) => response,
            Err(UreqError::Transport(transport)) => {
                debug!("{} {} failed: {}", request.method(), request.url(), transport);
                let kind = if is_timeout(&transport) {
                    ErrorKind::Timeout(transport.to_string())
                } else {
                    ErrorKind::Transport(transport.to_string())
                };
                return Err(Error::new(kind, request, None));
            }
        };

        let mut builder = Response::builder().status_code(response.status());
        for name in response.headers_names() {
            if let Some(value) = response.header(&name) {
                builder = builder.header(&name, value);
            }
        }
        let mut body = Vec::new();
        response.into_reader().read_to_end(&mut body).map_err(|err| {
            let kind = if is_timeout_io(&err) {
                ErrorKind::Timeout(err.to_string())
            } else {
                ErrorKind::Transport(err.to_string())
            };
            Error::new(kind, request, None)
        })?;
        Ok(builder.body(body).build())
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = transport.source();
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return is_timeout_io(io_err);
        }
        source = err.source();
    }
    false
}

fn is_timeout_io(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}
