use super::{Error, HttpCaller, Request, Response, Result, RetryKind};
use log::warn;
use std::{sync::Arc, thread, time::Duration};

/// 在 [`HttpCaller`] 之上检查状态码并按需重试
#[derive(Clone)]
pub(crate) struct Client {
    caller: Arc<dyn HttpCaller>,
    retry_delay: Duration,
}

impl Client {
    pub(crate) fn new(caller: Arc<dyn HttpCaller>, retry_delay: Duration) -> Self {
        Self { caller, retry_delay }
    }

    /// 发送一次请求，非 2xx 状态码作为错误返回
    pub(crate) fn send(&self, request: &Request) -> Result<Response> {
        let response = self.caller.call(request)?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(Error::from_status(request, &response))
        }
    }

    /// 最多发送 `attempts` 次请求，仅在错误可重试时再次发送
    pub(crate) fn send_with_attempts(&self, request: &Request, attempts: usize) -> Result<Response> {
        let attempts = attempts.max(1);
        let mut attempted = 0;
        loop {
            attempted += 1;
            match self.send(request) {
                Ok(response) => return Ok(response),
                Err(err) if err.retry_kind() == RetryKind::Retryable && attempted < attempts => {
                    warn!(
                        "Retry request {} {} ({}/{}) after error: {}",
                        request.method(),
                        request.url(),
                        attempted,
                        attempts,
                        err
                    );
                    if self.retry_delay > Duration::from_secs(0) {
                        thread::sleep(self.retry_delay);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}
