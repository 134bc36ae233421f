use crate::{Error, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{env, fmt, io::Read, str::FromStr, time::Duration};

/// 访问下载域名使用的协议
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    #[serde(alias = "ssl")]
    Https,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Http
    }
}

impl Protocol {
    pub fn is_https(self) -> bool {
        self == Protocol::Https
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" | "ssl" => Ok(Protocol::Https),
            other => Err(Error::Config(format!("unsupported protocol `{}`", other))),
        }
    }
}

/// 存储服务的配置
///
/// 可以从 YAML 文件加载：
///
/// ```yaml
/// access_key: <AccessKey>
/// secret_key: <SecretKey>
/// bucket: my-bucket
/// domain: cdn.example.com
/// protocol: https
/// private: true
/// expires_in: 600
/// insert_only: true
/// fsize_limit: 10485760
/// ```
///
/// 除了已知字段外，其他字段都作为上传策略的附加选项
#[derive(Deserialize, Clone)]
pub struct ServiceOptions {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub domain: String,

    #[serde(default)]
    pub protocol: Protocol,

    /// 是否为私有空间，私有空间的下载地址需要签名
    #[serde(default)]
    pub private: bool,

    /// 私有空间下载地址的默认有效期，单位为秒
    ///
    /// 上传凭证的有效期由 [`crate::Config`] 的 `upload_token_lifetime` 决定
    #[serde(default)]
    pub expires_in: Option<u64>,

    #[serde(flatten)]
    pub upload_options: Map<String, Value>,
}

const ACCESS_KEY_ENV: &str = "QINIU_ACCESS_KEY";
const SECRET_KEY_ENV: &str = "QINIU_SECRET_KEY";
const BUCKET_ENV: &str = "QINIU_BUCKET";
const DOMAIN_ENV: &str = "QINIU_DOMAIN";
const PROTOCOL_ENV: &str = "QINIU_PROTOCOL";
const PRIVATE_ENV: &str = "QINIU_PRIVATE";

impl ServiceOptions {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        bucket: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            bucket: bucket.into(),
            domain: domain.into(),
            protocol: Default::default(),
            private: false,
            expires_in: None,
            upload_options: Default::default(),
        }
    }

    /// 从 `QINIU_ACCESS_KEY`，`QINIU_SECRET_KEY`，`QINIU_BUCKET`，`QINIU_DOMAIN`，
    /// `QINIU_PROTOCOL` 和 `QINIU_PRIVATE` 环境变量读取配置
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_yaml_reader(reader: impl Read) -> Result<Self> {
        serde_yaml::from_reader(reader).map_err(|err| Error::Config(err.to_string()))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| Error::Config(format!("environment variable {} must be set", name)))
        };
        let mut options = Self::new(
            required(ACCESS_KEY_ENV)?,
            required(SECRET_KEY_ENV)?,
            required(BUCKET_ENV)?,
            required(DOMAIN_ENV)?,
        );
        if let Some(protocol) = lookup(PROTOCOL_ENV) {
            options.protocol = protocol.parse()?;
        }
        if let Some(private) = lookup(PRIVATE_ENV) {
            options.private = matches!(private.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(options)
    }

    pub fn expires_in(&self) -> Option<Duration> {
        self.expires_in.map(Duration::from_secs)
    }
}

impl fmt::Debug for ServiceOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ServiceOptions")
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .field("bucket", &self.bucket)
            .field("domain", &self.domain)
            .field("protocol", &self.protocol)
            .field("private", &self.private)
            .field("expires_in", &self.expires_in)
            .field("upload_options", &self.upload_options)
            .finish()
    }
}
