use super::{
    http::{HttpCaller, UreqCaller},
    Error, Result,
};
use assert_impl::assert_impl;
use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use once_cell::sync::OnceCell;
use std::{fmt, ops::Deref, sync::Arc, time::Duration};

/// 客户端配置
///
/// 所有配置项都有默认值，通过 [`ConfigBuilder`] 修改
#[derive(Builder, Getters, CopyGetters)]
#[builder(
    name = "ConfigBuilder",
    pattern = "owned",
    public,
    build_fn(name = "inner_build", private)
)]
pub struct ConfigInner {
    /// 访问七牛 API 时是否使用 HTTPS
    #[get_copy = "pub"]
    #[builder(default = "default::use_https()")]
    use_https: bool,

    /// 上传凭证有效期
    #[get_copy = "pub"]
    #[builder(default = "default::upload_token_lifetime()")]
    upload_token_lifetime: Duration,

    /// 私有空间下载地址的默认有效期
    #[get_copy = "pub"]
    #[builder(default = "default::url_lifetime()")]
    url_lifetime: Duration,

    /// 分块上传的块尺寸
    #[get_copy = "pub"]
    #[builder(default = "default::upload_block_size()")]
    upload_block_size: usize,

    /// 每一块最多尝试上传的次数
    #[get_copy = "pub"]
    #[builder(default = "default::block_upload_attempts()")]
    block_upload_attempts: usize,

    /// 同时上传的块数，为 1 时依次上传
    #[get_copy = "pub"]
    #[builder(default = "default::upload_concurrency()")]
    upload_concurrency: usize,

    /// 列举对象时单次请求的最大条目数
    #[get_copy = "pub"]
    #[builder(default = "default::list_limit()")]
    list_limit: usize,

    /// 列举，获取信息和下载请求最多尝试的次数
    #[get_copy = "pub"]
    #[builder(default = "default::http_request_attempts()")]
    http_request_attempts: usize,

    #[get_copy = "pub"]
    #[builder(default = "default::http_request_retry_delay()")]
    http_request_retry_delay: Duration,

    #[get_copy = "pub"]
    #[builder(default = "default::connect_timeout()")]
    connect_timeout: Duration,

    #[get_copy = "pub"]
    #[builder(default = "default::read_timeout()")]
    read_timeout: Duration,

    /// 创建文件请求的读超时，服务端合并大量块时耗时较长
    #[get_copy = "pub"]
    #[builder(default = "default::finalize_timeout()")]
    finalize_timeout: Duration,

    /// 上传域名
    #[get = "pub"]
    #[builder(setter(into), default = "default::up_host()")]
    up_host: String,

    /// 对象管理域名
    #[get = "pub"]
    #[builder(setter(into), default = "default::rs_host()")]
    rs_host: String,

    /// 对象列举域名
    #[get = "pub"]
    #[builder(setter(into), default = "default::rsf_host()")]
    rsf_host: String,

    /// HTTP 调用实现，未设置时使用按照超时配置创建的 [`UreqCaller`]
    #[get = "pub"]
    #[builder(setter(strip_option), default)]
    http_caller: Option<Arc<dyn HttpCaller>>,

    #[builder(setter(skip))]
    default_http_caller: OnceCell<Arc<dyn HttpCaller>>,
}

pub mod default {
    use super::*;

    pub fn use_https() -> bool {
        false
    }

    pub fn upload_token_lifetime() -> Duration {
        Duration::from_secs(60 * 60)
    }

    pub fn url_lifetime() -> Duration {
        Duration::from_secs(60 * 60)
    }

    pub fn upload_block_size() -> usize {
        1 << 22
    }

    pub fn block_upload_attempts() -> usize {
        3
    }

    pub fn upload_concurrency() -> usize {
        1
    }

    pub fn list_limit() -> usize {
        1000
    }

    pub fn http_request_attempts() -> usize {
        3
    }

    pub fn http_request_retry_delay() -> Duration {
        Duration::from_secs(1)
    }

    pub fn connect_timeout() -> Duration {
        Duration::from_secs(10)
    }

    pub fn read_timeout() -> Duration {
        Duration::from_secs(30)
    }

    pub fn finalize_timeout() -> Duration {
        Duration::from_secs(120)
    }

    pub fn up_host() -> String {
        "upload.qiniup.com".to_owned()
    }

    pub fn rs_host() -> String {
        "rs.qbox.me".to_owned()
    }

    pub fn rsf_host() -> String {
        "rsf.qbox.me".to_owned()
    }
}

impl ConfigInner {
    fn scheme(&self) -> &'static str {
        if self.use_https {
            "https"
        } else {
            "http"
        }
    }

    pub fn up_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.up_host)
    }

    pub fn rs_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.rs_host)
    }

    pub fn rsf_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.rsf_host)
    }

    /// 获取 HTTP 调用实现
    ///
    /// 默认实现在第一次使用时创建，之后共享同一个连接池
    pub fn caller(&self) -> Arc<dyn HttpCaller> {
        match &self.http_caller {
            Some(caller) => caller.to_owned(),
            None => self
                .default_http_caller
                .get_or_init(|| Arc::new(UreqCaller::new(self.connect_timeout, self.read_timeout)))
                .to_owned(),
        }
    }
}

impl fmt::Debug for ConfigInner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("use_https", &self.use_https)
            .field("upload_token_lifetime", &self.upload_token_lifetime)
            .field("url_lifetime", &self.url_lifetime)
            .field("upload_block_size", &self.upload_block_size)
            .field("block_upload_attempts", &self.block_upload_attempts)
            .field("upload_concurrency", &self.upload_concurrency)
            .field("list_limit", &self.list_limit)
            .field("http_request_attempts", &self.http_request_attempts)
            .field("http_request_retry_delay", &self.http_request_retry_delay)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("finalize_timeout", &self.finalize_timeout)
            .field("up_host", &self.up_host)
            .field("rs_host", &self.rs_host)
            .field("rsf_host", &self.rsf_host)
            .field("http_caller", &self.http_caller.as_ref().map(|_| "custom"))
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct Config(Arc<ConfigInner>);

impl ConfigBuilder {
    pub fn build(self) -> Result<Config> {
        let inner = self.inner_build().map_err(|err| Error::Config(err.to_string()))?;
        if inner.upload_block_size == 0 {
            return Err(Error::Config("upload_block_size must be positive".into()));
        }
        if inner.block_upload_attempts == 0 {
            return Err(Error::Config("block_upload_attempts must be positive".into()));
        }
        if inner.list_limit == 0 {
            return Err(Error::Config("list_limit must be positive".into()));
        }
        Ok(Config(Arc::new(inner)))
    }
}

impl Deref for Config {
    type Target = ConfigInner;

    #[inline]
    fn deref(&self) -> &ConfigInner {
        self.0.deref()
    }
}

impl Config {
    #[allow(dead_code)]
    fn ignore() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}
