//! 面向宿主存储抽象的七牛存储服务
//!
//! [`StorageService`] 是宿主框架调用的接口，[`QiniuService`] 是基于七牛对象存储的实现

mod options;

pub use options::{Protocol, ServiceOptions};

use crate::{
    analyzer::{Analyzer, ImageAnalyzer, ObjectMetadata, VideoAnalyzer},
    config::Config,
    credential::Credential,
    http::{
        client::Client,
        header::{HeaderMap, HeaderValue, CONTENT_TYPE, RANGE},
        Method, Request,
    },
    storage::{
        bucket_manager::{BucketManager, DeletionReport},
        upload_policy::UploadPolicy,
        upload_token::UploadToken,
        uploader::{ResumableUploader, UploadResponse},
        url::{UrlBuilder, UrlOptions},
    },
    Error, Result,
};
use assert_impl::assert_impl;
use log::{debug, info};
use serde_json::{Map, Value};
use std::{io::Read, ops::Range, time::Duration};

const CONTENT_MD5: &str = "content-md5";

/// 客户端直传所需的上传地址和上传凭证
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectUpload {
    pub url: String,
    pub token: String,
}

/// 宿主框架使用的存储接口
pub trait StorageService: Send + Sync {
    /// 上传数据流，`checksum` 为标准 Base64 编码的 MD5
    fn upload(
        &self,
        key: &str,
        reader: &mut dyn Read,
        checksum: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<UploadResponse>;

    /// 删除对象，对象不存在时视为成功
    fn delete(&self, key: &str) -> Result<()>;

    fn delete_prefixed(&self, prefix: &str) -> Result<DeletionReport>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// 生成下载地址，私有空间的地址带有签名和过期时间
    fn url(&self, key: &str, options: &UrlOptions) -> String;

    /// 生成客户端直传的上传地址和凭证，凭证只能用于上传该对象
    fn url_for_direct_upload(
        &self,
        key: &str,
        expires_in: Duration,
        content_type: &str,
        content_length: u64,
        checksum: &str,
    ) -> Result<DirectUpload>;

    /// 客户端直传时需要携带的请求头
    fn headers_for_direct_upload(&self, key: &str, content_type: &str, checksum: &str) -> Result<HeaderMap>;

    fn download(&self, key: &str) -> Result<Vec<u8>>;

    /// 下载对象的一部分，`range` 为左闭右开区间
    fn download_chunk(&self, key: &str, range: Range<u64>) -> Result<Vec<u8>>;
}

/// 七牛存储服务
#[derive(Clone)]
pub struct QiniuService {
    bucket: String,
    credential: Credential,
    config: Config,
    client: Client,
    url_builder: UrlBuilder,
    bucket_manager: BucketManager,
    upload_options: Map<String, Value>,
}

impl QiniuService {
    pub fn new(options: ServiceOptions, config: Config) -> Self {
        let credential = Credential::new(options.access_key, options.secret_key);
        let url_lifetime = options
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.url_lifetime());
        let url_builder = UrlBuilder::new(
            &options.domain,
            options.protocol.is_https(),
            options.private,
            credential.to_owned(),
            url_lifetime,
        );
        let bucket_manager = BucketManager::new(options.bucket.to_owned(), credential.to_owned(), config.to_owned());
        Self {
            bucket: options.bucket,
            client: Client::new(config.caller(), config.http_request_retry_delay()),
            credential,
            config,
            url_builder,
            bucket_manager,
            upload_options: options.upload_options,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bucket_manager(&self) -> &BucketManager {
        &self.bucket_manager
    }

    pub fn url_builder(&self) -> &UrlBuilder {
        &self.url_builder
    }

    /// 为指定对象生成上传凭证，配置中的上传策略选项会写入凭证
    pub fn upload_token(&self, key: &str, lifetime: Duration) -> Result<String> {
        let policy = UploadPolicy::new_for_object(self.bucket.to_owned(), key, lifetime)
            .apply_options(&self.upload_options)
            .build();
        UploadToken::from_policy(policy, self.credential.to_owned()).token()
    }

    /// 创建上传器，可以在上传前设置取消句柄等选项
    pub fn uploader(&self, key: &str) -> Result<ResumableUploader> {
        check_key(key)?;
        let token = self.upload_token(key, self.config.upload_token_lifetime())?;
        Ok(ResumableUploader::new(self.config.to_owned(), token).key(key))
    }

    pub fn image_analyzer(&self) -> ImageAnalyzer {
        ImageAnalyzer::new(self.url_builder.to_owned(), &self.config)
    }

    pub fn video_analyzer(&self) -> VideoAnalyzer {
        VideoAnalyzer::new(self.url_builder.to_owned(), &self.config)
    }

    /// 按照 MIME 类型选择提取器获取元信息，不支持的类型或提取失败时返回空的元信息
    pub fn metadata(&self, key: &str, content_type: &str) -> ObjectMetadata {
        let image = self.image_analyzer();
        if image.accept(content_type) {
            return image.metadata(key);
        }
        let video = self.video_analyzer();
        if video.accept(content_type) {
            return video.metadata(key);
        }
        debug!("No analyzer accepts {} of {}", content_type, key);
        ObjectMetadata::default()
    }

    fn get(&self, key: &str, range: Option<&Range<u64>>) -> Result<Vec<u8>> {
        let mut builder = Request::builder(Method::GET, self.url_builder.build_url(key, &Default::default()));
        if let Some(range) = range {
            builder = builder.header(RANGE, format!("bytes={}-{}", range.start, range.end - 1));
        }
        let response = self
            .client
            .send_with_attempts(&builder.build(), self.config.http_request_attempts())?;
        let status_code = response.status_code();
        let mut body = response.into_body();
        if let Some(range) = range {
            if status_code != 206 {
                let len = body.len() as u64;
                let (start, end) = (range.start.min(len) as usize, range.end.min(len) as usize);
                body = body[start..end].to_vec();
            }
        }
        Ok(body)
    }

    #[allow(dead_code)]
    fn ignore() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        Err(Error::InvalidArgument("key must not be empty".into()))
    } else {
        Ok(())
    }
}

impl StorageService for QiniuService {
    fn upload(
        &self,
        key: &str,
        reader: &mut dyn Read,
        checksum: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<UploadResponse> {
        info!("Upload {} to bucket {}", key, self.bucket);
        let mut uploader = self.uploader(key)?;
        if let Some(checksum) = checksum {
            uploader = uploader.checksum(checksum);
        }
        if let Some(content_type) = content_type {
            uploader = uploader.mime(content_type);
        }
        uploader.upload(reader)
    }

    fn delete(&self, key: &str) -> Result<()> {
        info!("Delete {} from bucket {}", key, self.bucket);
        check_key(key)?;
        self.bucket_manager.delete(key)
    }

    fn delete_prefixed(&self, prefix: &str) -> Result<DeletionReport> {
        info!("Delete objects with prefix {:?} from bucket {}", prefix, self.bucket);
        self.bucket_manager.delete_prefixed(prefix)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        let exists = self.bucket_manager.exists(key)?;
        info!("Check existence of {} in bucket {}: {}", key, self.bucket, exists);
        Ok(exists)
    }

    fn url(&self, key: &str, options: &UrlOptions) -> String {
        let url = self.url_builder.build_url(key, options);
        info!("Generated URL for {}", key);
        url
    }

    fn url_for_direct_upload(
        &self,
        key: &str,
        expires_in: Duration,
        content_type: &str,
        content_length: u64,
        checksum: &str,
    ) -> Result<DirectUpload> {
        info!(
            "Generate direct upload for {} ({}, {} bytes, md5 {})",
            key, content_type, content_length, checksum
        );
        check_key(key)?;
        Ok(DirectUpload {
            url: self.config.up_url(),
            token: self.upload_token(key, expires_in)?,
        })
    }

    fn headers_for_direct_upload(&self, key: &str, content_type: &str, checksum: &str) -> Result<HeaderMap> {
        let header_value = |name: &str, value: &str| {
            HeaderValue::from_str(value)
                .map_err(|err| Error::InvalidArgument(format!("invalid {} of {}: {}", name, key, err)))
        };
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, header_value("content type", content_type)?);
        headers.insert(CONTENT_MD5, header_value("checksum", checksum)?);
        Ok(headers)
    }

    fn download(&self, key: &str) -> Result<Vec<u8>> {
        info!("Download {} from bucket {}", key, self.bucket);
        check_key(key)?;
        self.get(key, None)
    }

    fn download_chunk(&self, key: &str, range: Range<u64>) -> Result<Vec<u8>> {
        info!("Download {} bytes {:?} from bucket {}", key, range, self.bucket);
        check_key(key)?;
        if range.start >= range.end {
            return Err(Error::InvalidArgument(format!("empty byte range {:?}", range)));
        }
        self.get(key, Some(&range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ConfigBuilder,
        http::{HttpCaller, Response, Result as HttpResult},
        utils::base64,
    };
    use serde_json::json;
    use std::{
        error::Error as StdError,
        io::Cursor,
        result::Result,
        sync::{Arc, Mutex},
        time::{SystemTime, UNIX_EPOCH},
    };

    const OBJECT_CONTENT: &[u8] = b"0123456789";

    /// 模拟七牛的上传，对象管理，列举和下载域名
    #[derive(Default)]
    struct FakeQiniu {
        keys: Vec<&'static str>,
        ignore_range: bool,
        upload_tokens: Mutex<Vec<String>>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeQiniu {
        fn with_keys(keys: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                keys,
                ..Default::default()
            })
        }

        fn json(body: serde_json::Value) -> HttpResult<Response> {
            Ok(Response::builder().body(body.to_string()).build())
        }
    }

    impl HttpCaller for FakeQiniu {
        fn call(&self, request: &Request) -> HttpResult<Response> {
            let url = url::Url::parse(request.url()).unwrap();
            self.requests.lock().unwrap().push(request.url().to_owned());
            match url.host_str() {
                Some("upload.qiniup.com") => {
                    let authorization = request.header("Authorization").unwrap();
                    self.upload_tokens
                        .lock()
                        .unwrap()
                        .push(authorization.trim_start_matches("UpToken ").to_owned());
                    if url.path().starts_with("/mkblk/") {
                        Self::json(json!({"ctx": "ctx", "crc32": crate::utils::crc32::from_bytes(request.body())}))
                    } else {
                        Self::json(json!({"key": "avatar.png", "hash": "fake-hash", "fsize": 10}))
                    }
                }
                Some("rsf.qbox.me") => {
                    let prefix = url
                        .query_pairs()
                        .find(|(k, _)| k == "prefix")
                        .map(|(_, v)| v.into_owned())
                        .unwrap_or_default();
                    let items: Vec<_> = self
                        .keys
                        .iter()
                        .filter(|key| key.starts_with(prefix.as_str()))
                        .map(|key| json!({"key": key, "fsize": 1}))
                        .collect();
                    Self::json(json!({ "items": items }))
                }
                Some("rs.qbox.me") => {
                    assert!(request.header("Authorization").unwrap().starts_with("QBox ak:"));
                    Self::json(json!({}))
                }
                Some("cdn.example.com") => match request.header("Range") {
                    Some(range) if !self.ignore_range => {
                        let (start, end) = range.trim_start_matches("bytes=").split_once('-').unwrap();
                        let (start, end): (usize, usize) = (start.parse().unwrap(), end.parse().unwrap());
                        Ok(Response::builder()
                            .status_code(206)
                            .body(OBJECT_CONTENT[start..=end].to_vec())
                            .build())
                    }
                    _ if url.query() == Some("imageInfo") => Self::json(json!({"width": 64, "height": 32, "format": "png"})),
                    _ => Ok(Response::builder().body(OBJECT_CONTENT.to_vec()).build()),
                },
                host => panic!("unexpected host {:?}", host),
            }
        }
    }

    fn service(fake: Arc<FakeQiniu>, private: bool) -> QiniuService {
        let config = ConfigBuilder::default()
            .http_caller(fake)
            .http_request_retry_delay(Duration::from_millis(0))
            .build()
            .unwrap();
        let mut options = ServiceOptions::new("ak", "sk", "avatars", "cdn.example.com");
        options.private = private;
        options.expires_in = Some(600);
        options.upload_options.insert("insert_only".into(), json!(true));
        options.upload_options.insert("unknown_option".into(), json!("ignored"));
        QiniuService::new(options, config)
    }

    fn policy_of(token: &str) -> UploadPolicy {
        UploadToken::from_token(token).policy().unwrap().into_owned()
    }

    #[test]
    fn test_upload() -> Result<(), Box<dyn StdError>> {
        let fake = FakeQiniu::with_keys(vec![]);
        let service = service(fake.clone(), false);
        let checksum = base64::standard(&<md5::Md5 as md5::Digest>::digest(OBJECT_CONTENT));
        let response = service.upload(
            "avatar.png",
            &mut Cursor::new(OBJECT_CONTENT),
            Some(&checksum),
            Some("image/png"),
        )?;
        assert_eq!(response.key(), Some("avatar.png"));

        let tokens = fake.upload_tokens.lock().unwrap();
        assert_eq!(tokens.len(), 2);
        let policy = policy_of(&tokens[0]);
        assert_eq!(policy.bucket(), Some("avatars"));
        assert_eq!(policy.key(), Some("avatar.png"));
        assert!(policy.is_insert_only());
        assert!(policy.get("unknown_option").is_none());
        let token_lifetime = policy
            .token_deadline()
            .unwrap()
            .duration_since(SystemTime::now())
            .unwrap_or_default();
        assert!(token_lifetime > Duration::from_secs(3500) && token_lifetime <= Duration::from_secs(3600));

        let requests = fake.requests.lock().unwrap();
        assert_eq!(
            requests[1],
            format!(
                "http://upload.qiniup.com/mkfile/10/key/{}/mimeType/{}",
                base64::urlsafe_no_pad(b"avatar.png"),
                base64::urlsafe_no_pad(b"image/png")
            )
        );
        Ok(())
    }

    #[test]
    fn test_upload_rejects_empty_key() {
        let service = service(FakeQiniu::with_keys(vec![]), false);
        let err = service
            .upload("", &mut Cursor::new(OBJECT_CONTENT), None, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_exists_and_delete_prefixed() -> Result<(), Box<dyn StdError>> {
        let fake = FakeQiniu::with_keys(vec!["tmp/a", "tmp/b", "keep/c"]);
        let service = service(fake.clone(), false);
        assert!(service.exists("tmp/a")?);
        assert!(!service.exists("missing-key")?);
        assert!(!service.exists("tmp")?);

        let report = service.delete_prefixed("tmp/")?;
        assert_eq!(report.deleted, vec!["tmp/a".to_owned(), "tmp/b".to_owned()]);
        assert!(report.is_complete());
        service.delete("keep/c")?;
        Ok(())
    }

    #[test]
    fn test_urls() {
        let public = service(FakeQiniu::with_keys(vec![]), false);
        assert_eq!(
            public.url("a b.png", &UrlOptions::fop("imageView2/2/w/100")),
            "http://cdn.example.com/a%20b.png?imageView2/2/w/100"
        );

        let private = service(FakeQiniu::with_keys(vec![]), true);
        let url = private.url("a.png", &Default::default());
        let e: u64 = url
            .split("e=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .and_then(|e| e.parse().ok())
            .unwrap();
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        assert!(e >= now + 590 && e <= now + 610);
        assert!(url.contains("&token=ak:"));
    }

    #[test]
    fn test_direct_upload() -> Result<(), Box<dyn StdError>> {
        let service = service(FakeQiniu::with_keys(vec![]), false);
        let direct = service.url_for_direct_upload(
            "uploads/avatar.png",
            Duration::from_secs(300),
            "image/png",
            10,
            "eB5eJF1ptWaXm4bijSPyxw==",
        )?;
        assert_eq!(direct.url, "http://upload.qiniup.com");
        let policy = policy_of(&direct.token);
        assert_eq!(policy.key(), Some("uploads/avatar.png"));
        let deadline = policy.token_deadline().unwrap();
        let remaining = deadline.duration_since(SystemTime::now()).unwrap_or_default();
        assert!(remaining > Duration::from_secs(280) && remaining <= Duration::from_secs(300));

        let headers = service.headers_for_direct_upload("uploads/avatar.png", "image/png", "eB5eJF1ptWaXm4bijSPyxw==")?;
        assert_eq!(headers.get("Content-Type").unwrap(), "image/png");
        assert_eq!(headers.get("Content-MD5").unwrap(), "eB5eJF1ptWaXm4bijSPyxw==");
        assert!(service.headers_for_direct_upload("a", "image/png\n", "x").is_err());
        Ok(())
    }

    #[test]
    fn test_download() -> Result<(), Box<dyn StdError>> {
        let service = service(FakeQiniu::with_keys(vec![]), true);
        assert_eq!(service.download("a.bin")?, OBJECT_CONTENT);
        assert_eq!(service.download_chunk("a.bin", 2..5)?, b"234");
        assert!(matches!(
            service.download_chunk("a.bin", 5..5),
            Err(Error::InvalidArgument(_))
        ));

        let fake = Arc::new(FakeQiniu {
            ignore_range: true,
            ..Default::default()
        });
        let service = self::service(fake, false);
        assert_eq!(service.download_chunk("a.bin", 8..20)?, b"89");
        Ok(())
    }

    #[test]
    fn test_metadata() {
        let service = service(FakeQiniu::with_keys(vec![]), false);
        let metadata = service.metadata("a.png", "image/png");
        assert_eq!(metadata.width, Some(64));
        assert_eq!(metadata.format.as_deref(), Some("png"));
        assert!(service.metadata("a.txt", "text/plain").is_empty());
    }
}
