use super::{CancellationHandle, UploadResponse};
use crate::{
    config::Config,
    http::{
        client::Client,
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method, Request,
    },
    utils::{base64, crc32},
    Error, Result,
};
use log::{debug, warn};
use md5::{Digest, Md5};
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::{
    fmt,
    io::{self, Read},
    thread,
    time::Duration,
};

/// 分块上传的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Reading,
    BlockUploading,
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct StateTracker<'a> {
    key: &'a str,
    state: UploadState,
}

impl<'a> StateTracker<'a> {
    fn new(key: &'a str) -> Self {
        Self {
            key,
            state: UploadState::Idle,
        }
    }

    fn enter(&mut self, state: UploadState) {
        if self.state != state {
            debug!("Upload {}: {} -> {}", self.key, self.state, state);
            self.state = state;
        }
    }
}

#[derive(Deserialize)]
struct BlockResponse {
    ctx: String,
    #[serde(default)]
    crc32: Option<u32>,
    #[serde(default)]
    expired_at: Option<u64>,
}

/// 分块上传器
///
/// 将数据流切分成固定尺寸的块，逐块调用 `mkblk` 上传，最后用按块顺序排列的上下文调用 `mkfile` 创建文件。
///
/// 每一块在遇到网络错误，超时或服务端 5xx 错误时会重新发送，最多尝试 `block_upload_attempts` 次。
/// 创建文件的请求不会重试，失败时返回 [`Error::FinalizeFailed`]，其中带有已上传块的上下文。
pub struct ResumableUploader {
    config: Config,
    client: Client,
    authorization: String,
    key: Option<String>,
    mime: Option<String>,
    checksum: Option<String>,
    cancellation: CancellationHandle,
}

impl ResumableUploader {
    pub fn new(config: Config, upload_token: impl AsRef<str>) -> Self {
        let client = Client::new(config.caller(), config.http_request_retry_delay());
        Self {
            config,
            client,
            authorization: "UpToken ".to_owned() + upload_token.as_ref(),
            key: None,
            mime: None,
            checksum: None,
            cancellation: Default::default(),
        }
    }

    /// 对象名称，不指定时由服务端按照上传策略决定
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// 数据的 MD5，使用标准 Base64 编码，创建文件前会校验
    pub fn checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn cancellation(mut self, cancellation: CancellationHandle) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// 上传数据流
    pub fn upload(&self, mut reader: impl Read) -> Result<UploadResponse> {
        let key = self.key.as_deref().unwrap_or("~");
        let mut tracker = StateTracker::new(key);
        match self.upload_with_tracker(&mut reader, &mut tracker) {
            Ok(response) => {
                tracker.enter(UploadState::Done);
                Ok(response)
            }
            Err(err) => {
                tracker.enter(UploadState::Failed);
                Err(err)
            }
        }
    }

    fn upload_with_tracker(&self, reader: &mut dyn Read, tracker: &mut StateTracker) -> Result<UploadResponse> {
        let block_size = self.config.upload_block_size();
        let concurrency = self.config.upload_concurrency().max(1);
        let pool = if concurrency > 1 {
            Some(self.thread_pool(concurrency)?)
        } else {
            None
        };
        let mut digest = self.checksum.as_ref().map(|_| Md5::new());
        let mut contexts = Vec::new();
        let mut total_size = 0u64;

        loop {
            self.check_cancelled()?;
            tracker.enter(UploadState::Reading);
            let mut batch = Vec::with_capacity(concurrency);
            let mut eof = false;
            while batch.len() < concurrency {
                let block = read_block(reader, block_size)?;
                if let Some(digest) = digest.as_mut() {
                    digest.update(&block);
                }
                total_size += block.len() as u64;
                eof = block.len() < block_size;
                if !block.is_empty() {
                    batch.push(block);
                }
                if eof {
                    break;
                }
            }

            if !batch.is_empty() {
                tracker.enter(UploadState::BlockUploading);
                let base_index = contexts.len();
                match &pool {
                    Some(pool) => {
                        let results: Vec<Result<String>> = pool.install(|| {
                            batch
                                .into_par_iter()
                                .enumerate()
                                .map(|(i, block)| self.upload_block(base_index + i, block))
                                .collect()
                        });
                        for result in results {
                            contexts.push(result?);
                        }
                    }
                    None => {
                        for (i, block) in batch.into_iter().enumerate() {
                            contexts.push(self.upload_block(base_index + i, block)?);
                        }
                    }
                }
            }
            if eof {
                break;
            }
        }

        if let (Some(expected), Some(digest)) = (&self.checksum, digest) {
            let actual = base64::standard(&digest.finalize());
            if &actual != expected {
                return Err(Error::Integrity(format!(
                    "checksum mismatch, expected {}, computed {}",
                    expected, actual
                )));
            }
        }

        self.check_cancelled()?;
        tracker.enter(UploadState::Finalizing);
        self.make_file(total_size, contexts)
    }

    fn upload_block(&self, index: usize, block: Vec<u8>) -> Result<String> {
        let expected_crc32 = crc32::from_bytes(&block);
        let block_size = block.len();
        let request = Request::builder(Method::POST, format!("{}/mkblk/{}", self.config.up_url(), block_size))
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_TYPE, mime::APPLICATION_OCTET_STREAM.as_ref())
            .body(block)
            .build();
        let attempts = self.config.block_upload_attempts().max(1);
        let mut attempted = 0;
        loop {
            self.check_cancelled()?;
            attempted += 1;
            match self.try_upload_block(&request, expected_crc32) {
                Ok(context) => {
                    debug!(
                        "Block {} ({} bytes) of {} is uploaded after {} attempt(s)",
                        index,
                        block_size,
                        self.key.as_deref().unwrap_or("~"),
                        attempted
                    );
                    return Ok(context);
                }
                Err(err) if should_retry_block(&err) && attempted < attempts => {
                    warn!(
                        "Retry uploading block {} of {} ({}/{}): {}",
                        index,
                        self.key.as_deref().unwrap_or("~"),
                        attempted,
                        attempts,
                        err
                    );
                    let delay = self.config.http_request_retry_delay();
                    if delay > Duration::from_secs(0) {
                        thread::sleep(delay);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn try_upload_block(&self, request: &Request, expected_crc32: u32) -> Result<String> {
        let response: BlockResponse = self.client.send(request)?.parse_json()?;
        if let Some(crc32) = response.crc32 {
            if crc32 != expected_crc32 {
                return Err(Error::Integrity(format!(
                    "block crc32 mismatch, expected {}, got {}",
                    expected_crc32, crc32
                )));
            }
        }
        if let Some(expired_at) = response.expired_at {
            debug!("Block context expires at {}", expired_at);
        }
        Ok(response.ctx)
    }

    fn make_file(&self, total_size: u64, contexts: Vec<String>) -> Result<UploadResponse> {
        let mut url = format!("{}/mkfile/{}", self.config.up_url(), total_size);
        if let Some(key) = &self.key {
            url.push_str("/key/");
            url.push_str(&base64::urlsafe_no_pad(key.as_bytes()));
        }
        if let Some(content_type) = &self.mime {
            url.push_str("/mimeType/");
            url.push_str(&base64::urlsafe_no_pad(content_type.as_bytes()));
        }
        let request = Request::builder(Method::POST, url)
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_TYPE, mime::TEXT_PLAIN.as_ref())
            .timeout(self.config.finalize_timeout())
            .body(contexts.join(","))
            .build();
        let response = match self.client.send(&request) {
            Ok(response) => response,
            Err(err) => {
                return Err(Error::FinalizeFailed {
                    contexts,
                    source: Box::new(err.into()),
                })
            }
        };
        Ok(response.parse_json::<Value>()?.into())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            Err(Error::Cancelled {
                key: self.key.to_owned().unwrap_or_default(),
            })
        } else {
            Ok(())
        }
    }

    fn thread_pool(&self, concurrency: usize) -> Result<ThreadPool> {
        ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|index| format!("qiniu.block_uploader.{}", index))
            .build()
            .map_err(|err| Error::Config(err.to_string()))
    }
}

/// 块数据在内存中，可以原样重新发送
fn should_retry_block(err: &Error) -> bool {
    err.is_retryable() || matches!(err, Error::Integrity(_))
}

fn read_block(reader: &mut dyn Read, block_size: usize) -> io::Result<Vec<u8>> {
    let mut block = Vec::with_capacity(block_size);
    reader.take(block_size as u64).read_to_end(&mut block)?;
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ConfigBuilder,
        http::{Error as HttpError, ErrorKind, HttpCaller, Response, Result as HttpResult},
    };
    use serde_json::json;
    use std::{
        error::Error as StdError,
        io::Cursor,
        result::Result as StdResult,
        sync::{
            atomic::{AtomicUsize, Ordering::Relaxed},
            Arc, Mutex,
        },
    };

    #[derive(Clone, Copy)]
    enum Failure {
        Status(u16),
        Timeout,
        WrongCrc32,
    }

    /// 模拟上传服务：`mkblk` 返回以块首字节命名的上下文，并可按顺序注入失败
    #[derive(Default)]
    struct FakeUpHost {
        block_failures: Mutex<Vec<Failure>>,
        finalize_failure: Option<Failure>,
        cancel_after_blocks: Option<(usize, CancellationHandle)>,
        mkblk_sizes: Mutex<Vec<usize>>,
        mkblk_attempts: AtomicUsize,
        mkfile_calls: Mutex<Vec<(String, String)>>,
        mkfile_timeouts: Mutex<Vec<Option<Duration>>>,
    }

    impl FakeUpHost {
        fn failing_blocks(failures: Vec<Failure>) -> Self {
            Self {
                block_failures: Mutex::new(failures),
                ..Default::default()
            }
        }

        fn fail(&self, failure: Failure, request: &Request, body: &[u8]) -> HttpResult<Response> {
            match failure {
                Failure::Status(code) => Ok(Response::builder()
                    .status_code(code)
                    .body(r#"{"error":"injected"}"#)
                    .build()),
                Failure::Timeout => Err(HttpError::new(ErrorKind::Timeout("injected".into()), request, None)),
                Failure::WrongCrc32 => Ok(Response::builder()
                    .body(json!({"ctx": "bad", "crc32": crc32::from_bytes(body).wrapping_add(1)}).to_string())
                    .build()),
            }
        }

        fn mkfile_calls(&self) -> Vec<(String, String)> {
            self.mkfile_calls.lock().unwrap().to_owned()
        }
    }

    impl HttpCaller for FakeUpHost {
        fn call(&self, request: &Request) -> HttpResult<Response> {
            assert_eq!(request.header("Authorization"), Some("UpToken fake-token"));
            let path = url::Url::parse(request.url()).unwrap().path().to_owned();
            if path.starts_with("/mkblk/") {
                self.mkblk_attempts.fetch_add(1, Relaxed);
                let body = request.body();
                assert_eq!(path, format!("/mkblk/{}", body.len()));
                let failure = {
                    let mut failures = self.block_failures.lock().unwrap();
                    if failures.is_empty() {
                        None
                    } else {
                        Some(failures.remove(0))
                    }
                };
                if let Some(failure) = failure {
                    return self.fail(failure, request, body);
                }
                let uploaded = {
                    let mut sizes = self.mkblk_sizes.lock().unwrap();
                    sizes.push(body.len());
                    sizes.len()
                };
                if let Some((after, handle)) = &self.cancel_after_blocks {
                    if uploaded >= *after {
                        handle.cancel();
                    }
                }
                Ok(Response::builder()
                    .body(
                        json!({
                            "ctx": format!("ctx{}", body[0]),
                            "checksum": "fake",
                            "crc32": crc32::from_bytes(body),
                            "offset": body.len(),
                            "host": "http://upload.qiniup.com",
                            "expired_at": 1_600_000_000u64,
                        })
                        .to_string(),
                    )
                    .build())
            } else if path.starts_with("/mkfile/") {
                self.mkfile_calls
                    .lock()
                    .unwrap()
                    .push((path, String::from_utf8(request.body().to_owned()).unwrap()));
                self.mkfile_timeouts.lock().unwrap().push(request.timeout());
                if let Some(failure) = self.finalize_failure {
                    return self.fail(failure, request, b"");
                }
                Ok(Response::builder()
                    .body(json!({"key": "fake-key", "hash": "fake-hash", "fsize": 0}).to_string())
                    .build())
            } else {
                panic!("unexpected path {}", path)
            }
        }
    }

    fn config(host: Arc<FakeUpHost>, block_size: usize, concurrency: usize) -> Config {
        ConfigBuilder::default()
            .http_caller(host)
            .upload_block_size(block_size)
            .upload_concurrency(concurrency)
            .http_request_retry_delay(Duration::from_millis(0))
            .build()
            .unwrap()
    }

    /// 第 i 块的每个字节都是 i，便于从上下文还原块的顺序
    fn blocks_data(block_size: usize, total: usize) -> Vec<u8> {
        (0..total).map(|i| (i / block_size) as u8).collect()
    }

    #[test]
    fn test_upload_small_file() -> StdResult<(), Box<dyn StdError>> {
        let host = Arc::new(FakeUpHost::default());
        let response = ResumableUploader::new(config(host.clone(), 1 << 22, 1), "fake-token")
            .key("dir/a b+c.txt")
            .mime("text/plain")
            .upload(Cursor::new(b"hello".to_vec()))?;
        assert_eq!(response.key(), Some("fake-key"));
        assert_eq!(*host.mkblk_sizes.lock().unwrap(), vec![5]);

        let calls = host.mkfile_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].0,
            format!(
                "/mkfile/5/key/{}/mimeType/{}",
                base64::urlsafe_no_pad(b"dir/a b+c.txt"),
                base64::urlsafe_no_pad(b"text/plain")
            )
        );
        assert_eq!(calls[0].1, "ctx104");
        Ok(())
    }

    #[test]
    fn test_upload_10_mib_in_4_mib_blocks() -> StdResult<(), Box<dyn StdError>> {
        let host = Arc::new(FakeUpHost::default());
        let block_size = 4 * 1024 * 1024;
        let data = blocks_data(block_size, 10 * 1024 * 1024);
        ResumableUploader::new(config(host.clone(), block_size, 1), "fake-token")
            .key("big")
            .upload(Cursor::new(data))?;
        assert_eq!(
            *host.mkblk_sizes.lock().unwrap(),
            vec![block_size, block_size, 2 * 1024 * 1024]
        );
        let calls = host.mkfile_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.starts_with("/mkfile/10485760/key/"));
        assert_eq!(calls[0].1, "ctx0,ctx1,ctx2");
        Ok(())
    }

    #[test]
    fn test_block_count_and_sizes() -> StdResult<(), Box<dyn StdError>> {
        let block_size = 4;
        for total in 0..=13usize {
            let host = Arc::new(FakeUpHost::default());
            ResumableUploader::new(config(host.clone(), block_size, 1), "fake-token")
                .key("k")
                .upload(Cursor::new(blocks_data(block_size, total)))?;
            let sizes = host.mkblk_sizes.lock().unwrap().to_owned();
            assert_eq!(sizes.len(), (total + block_size - 1) / block_size);
            assert_eq!(sizes.iter().sum::<usize>(), total);
            assert_eq!(host.mkfile_calls().len(), 1);
        }
        Ok(())
    }

    #[test]
    fn test_empty_input_makes_empty_file() -> StdResult<(), Box<dyn StdError>> {
        let host = Arc::new(FakeUpHost::default());
        ResumableUploader::new(config(host.clone(), 4, 1), "fake-token")
            .key("empty")
            .upload(io::empty())?;
        assert_eq!(host.mkblk_attempts.load(Relaxed), 0);
        let calls = host.mkfile_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.starts_with("/mkfile/0/key/"));
        assert_eq!(calls[0].1, "");
        Ok(())
    }

    #[test]
    fn test_block_retried_after_two_transient_failures() -> StdResult<(), Box<dyn StdError>> {
        let host = Arc::new(FakeUpHost::failing_blocks(vec![
            Failure::Status(503),
            Failure::Timeout,
        ]));
        ResumableUploader::new(config(host.clone(), 4, 1), "fake-token")
            .key("k")
            .upload(Cursor::new(b"abc".to_vec()))?;
        assert_eq!(host.mkblk_attempts.load(Relaxed), 3);
        assert_eq!(host.mkfile_calls().len(), 1);
        Ok(())
    }

    #[test]
    fn test_block_fails_after_three_attempts() {
        let host = Arc::new(FakeUpHost::failing_blocks(vec![
            Failure::Status(502),
            Failure::Status(503),
            Failure::Timeout,
        ]));
        let err = ResumableUploader::new(config(host.clone(), 4, 1), "fake-token")
            .key("k")
            .upload(Cursor::new(b"abc".to_vec()))
            .unwrap_err();
        assert!(matches!(err, Error::TransientNetwork(_)));
        assert_eq!(host.mkblk_attempts.load(Relaxed), 3);
        assert!(host.mkfile_calls().is_empty());
    }

    #[test]
    fn test_authentication_failure_is_not_retried() {
        let host = Arc::new(FakeUpHost::failing_blocks(vec![Failure::Status(401)]));
        let err = ResumableUploader::new(config(host.clone(), 4, 1), "fake-token")
            .key("k")
            .upload(Cursor::new(b"abc".to_vec()))
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert_eq!(host.mkblk_attempts.load(Relaxed), 1);
        assert!(host.mkfile_calls().is_empty());
    }

    #[test]
    fn test_crc32_mismatch_is_resent() -> StdResult<(), Box<dyn StdError>> {
        let host = Arc::new(FakeUpHost::failing_blocks(vec![Failure::WrongCrc32]));
        ResumableUploader::new(config(host.clone(), 4, 1), "fake-token")
            .key("k")
            .upload(Cursor::new(b"abc".to_vec()))?;
        assert_eq!(host.mkblk_attempts.load(Relaxed), 2);
        assert_eq!(host.mkfile_calls()[0].1, "ctx97");
        Ok(())
    }

    #[test]
    fn test_finalize_uses_its_own_read_timeout() -> StdResult<(), Box<dyn StdError>> {
        let host = Arc::new(FakeUpHost::default());
        let config = ConfigBuilder::default()
            .http_caller(host.clone())
            .upload_block_size(4)
            .finalize_timeout(Duration::from_secs(300))
            .build()?;
        ResumableUploader::new(config, "fake-token")
            .key("k")
            .upload(Cursor::new(blocks_data(4, 6)))?;
        assert_eq!(*host.mkfile_timeouts.lock().unwrap(), vec![Some(Duration::from_secs(300))]);
        Ok(())
    }

    #[test]
    fn test_finalize_timeout_is_not_retried() {
        let host = Arc::new(FakeUpHost {
            finalize_failure: Some(Failure::Timeout),
            ..Default::default()
        });
        let err = ResumableUploader::new(config(host.clone(), 4, 1), "fake-token")
            .key("k")
            .upload(Cursor::new(blocks_data(4, 6)))
            .unwrap_err();
        match err {
            Error::FinalizeFailed { contexts, source } => {
                assert_eq!(contexts, vec!["ctx0".to_owned(), "ctx1".to_owned()]);
                assert!(source.is_retryable());
            }
            err => panic!("unexpected error {:?}", err),
        }
        assert_eq!(host.mkfile_calls().len(), 1);
    }

    #[test]
    fn test_checksum_verification() -> StdResult<(), Box<dyn StdError>> {
        let data = b"hello world".to_vec();
        let checksum = base64::standard(&Md5::digest(&data));

        let host = Arc::new(FakeUpHost::default());
        ResumableUploader::new(config(host.clone(), 4, 1), "fake-token")
            .key("k")
            .checksum(checksum)
            .upload(Cursor::new(data.to_owned()))?;
        assert_eq!(host.mkfile_calls().len(), 1);

        let host = Arc::new(FakeUpHost::default());
        let err = ResumableUploader::new(config(host.clone(), 4, 1), "fake-token")
            .key("k")
            .checksum(base64::standard(&Md5::digest(b"other")))
            .upload(Cursor::new(data))
            .unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
        assert!(host.mkfile_calls().is_empty());
        Ok(())
    }

    #[test]
    fn test_cancelled_upload_is_not_finalized() {
        let handle = CancellationHandle::default();
        let host = Arc::new(FakeUpHost {
            cancel_after_blocks: Some((1, handle.clone())),
            ..Default::default()
        });
        let err = ResumableUploader::new(config(host.clone(), 4, 1), "fake-token")
            .key("k")
            .cancellation(handle)
            .upload(Cursor::new(blocks_data(4, 12)))
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert_eq!(host.mkblk_sizes.lock().unwrap().len(), 1);
        assert!(host.mkfile_calls().is_empty());
    }

    #[test]
    fn test_parallel_upload_keeps_block_order() -> StdResult<(), Box<dyn StdError>> {
        let host = Arc::new(FakeUpHost::default());
        ResumableUploader::new(config(host.clone(), 4, 3), "fake-token")
            .key("k")
            .upload(Cursor::new(blocks_data(4, 38)))?;
        assert_eq!(host.mkblk_sizes.lock().unwrap().len(), 10);
        let calls = host.mkfile_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, format!("/mkfile/38/key/{}", base64::urlsafe_no_pad(b"k")));
        assert_eq!(
            calls[0].1,
            (0..10).map(|i| format!("ctx{}", i)).collect::<Vec<_>>().join(",")
        );
        Ok(())
    }

    #[test]
    fn test_read_error_fails_upload() {
        struct BrokenReader;
        impl Read for BrokenReader {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "disk failure"))
            }
        }

        let host = Arc::new(FakeUpHost::default());
        let err = ResumableUploader::new(config(host.clone(), 4, 1), "fake-token")
            .key("k")
            .upload(BrokenReader)
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(host.mkblk_attempts.load(Relaxed), 0);
        assert!(host.mkfile_calls().is_empty());
    }
}
