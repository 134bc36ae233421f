use crate::{
    credential::Credential,
    utils::escape::{escape_path, escape_query_value},
};
use std::time::{Duration, SystemTime};

/// 下载方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 在浏览器中直接打开
    Inline,
    /// 作为附件下载
    Attachment,
}

/// 生成下载地址时的选项
///
/// 所有选项都是可选的：
/// - `fop`：数据处理指令，比如 `imageInfo`，`avinfo`，`imageView2/2/w/100`
/// - `attname`：作为附件下载时使用的文件名，指定后即为附件下载
/// - `disposition`：为 [`Disposition::Attachment`] 且未指定 `attname` 时，使用完整的对象名称作为文件名
/// - `lifetime`：私有空间下载地址的有效期，默认使用配置中的 `url_lifetime`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlOptions {
    pub fop: Option<String>,
    pub attname: Option<String>,
    pub disposition: Option<Disposition>,
    pub lifetime: Option<Duration>,
}

impl UrlOptions {
    pub fn fop(fop: impl Into<String>) -> Self {
        Self {
            fop: Some(fop.into()),
            ..Default::default()
        }
    }

    pub fn attachment(attname: impl Into<String>) -> Self {
        Self {
            attname: Some(attname.into()),
            disposition: Some(Disposition::Attachment),
            ..Default::default()
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    fn attachment_name<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        match (&self.attname, self.disposition) {
            (Some(attname), _) if !attname.is_empty() => Some(attname.as_str()),
            (_, Some(Disposition::Attachment)) => Some(key),
            _ => None,
        }
    }
}

/// 下载地址生成器
///
/// 公开空间生成 `<scheme>://<domain>/<key>[?<fop>]`，
/// 私有空间在此基础上追加 `e` 和 `token` 参数
#[derive(Debug, Clone)]
pub struct UrlBuilder {
    base_url: String,
    private: bool,
    credential: Credential,
    default_lifetime: Duration,
}

impl UrlBuilder {
    /// `domain` 可以带有协议头，此时忽略 `use_https`
    pub fn new(
        domain: &str,
        use_https: bool,
        private: bool,
        credential: Credential,
        default_lifetime: Duration,
    ) -> Self {
        let domain = domain.trim_end_matches('/');
        let base_url = if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.to_owned()
        } else if use_https {
            "https://".to_owned() + domain
        } else {
            "http://".to_owned() + domain
        };
        Self {
            base_url,
            private,
            credential,
            default_lifetime,
        }
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    /// 生成下载地址，私有空间的过期时间为当前时间加有效期
    pub fn build_url(&self, key: &str, options: &UrlOptions) -> String {
        let lifetime = options.lifetime.unwrap_or(self.default_lifetime);
        self.build_url_with_deadline(key, options, SystemTime::now() + lifetime)
    }

    /// 生成下载地址，私有空间使用指定的过期时间
    pub fn build_url_with_deadline(&self, key: &str, options: &UrlOptions, deadline: SystemTime) -> String {
        let url = self.unsigned_url(key, options);
        if self.private {
            self.credential.sign_download_url_with_deadline(&url, deadline)
        } else {
            url
        }
    }

    fn unsigned_url(&self, key: &str, options: &UrlOptions) -> String {
        let mut url = String::with_capacity(self.base_url.len() + key.len() + 64);
        url.push_str(&self.base_url);
        url.push('/');
        url.push_str(&escape_path(key));

        let mut params = Vec::with_capacity(2);
        if let Some(fop) = options.fop.as_deref().filter(|fop| !fop.is_empty()) {
            params.push(fop.to_owned());
        }
        if let Some(attname) = options.attachment_name(key) {
            params.push("attname=".to_owned() + &escape_query_value(attname));
        }
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }
}
