use super::{
    storage::upload_policy::UploadPolicy,
    utils::base64,
    Error, Result,
};
use assert_impl::assert_impl;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::{
    borrow::Cow,
    fmt,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use url::Url;

const FORM_MIME: &str = "application/x-www-form-urlencoded";

#[derive(Clone, Eq, PartialEq)]
struct CredentialInner {
    access_key: Cow<'static, str>,
    secret_key: Cow<'static, str>,
}

/// 认证信息
///
/// 持有 AccessKey 和 SecretKey，用于签发上传凭证、管理凭证和私有空间的下载地址
#[derive(Clone, Eq, PartialEq)]
pub struct Credential(Arc<CredentialInner>);

impl Credential {
    /// 创建认证信息
    pub fn new(access_key: impl Into<Cow<'static, str>>, secret_key: impl Into<Cow<'static, str>>) -> Credential {
        Credential(Arc::new(CredentialInner {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }))
    }

    /// 获取认证信息的 AccessKey
    pub fn access_key(&self) -> &str {
        self.0.access_key.as_ref()
    }

    fn secret_key(&self) -> &str {
        self.0.secret_key.as_ref()
    }

    /// 使用 SecretKey 对数据签名，返回 `<AccessKey>:<Signature>`
    pub fn sign(&self, data: &[u8]) -> String {
        self.access_key().to_owned() + ":" + &self.base64ed_hmac_digest(data)
    }

    /// 对数据的 Base64 编码签名，并将编码后的数据附在签名后
    pub fn sign_with_data(&self, data: &[u8]) -> String {
        let encoded_data = base64::urlsafe(data);
        self.sign(encoded_data.as_bytes()) + ":" + &encoded_data
    }

    /// 生成上传凭证
    ///
    /// SecretKey 为空，或上传策略没有指定存储空间时返回错误
    pub fn sign_upload_policy(&self, upload_policy: &UploadPolicy) -> Result<String> {
        if self.secret_key().is_empty() {
            return Err(Error::InvalidPolicy("secret key is empty".into()));
        }
        match upload_policy.bucket() {
            Some(bucket) if !bucket.is_empty() => {}
            _ => return Err(Error::InvalidPolicy("bucket is empty".into())),
        }
        Ok(self.sign_with_data(upload_policy.as_json()?.as_bytes()))
    }

    /// 生成管理凭证，用作 `Authorization` 头
    pub fn authorization_v1_for_request(
        &self,
        url: &str,
        content_type: Option<&str>,
        body: Option<&[u8]>,
    ) -> std::result::Result<String, url::ParseError> {
        Ok("QBox ".to_owned() + &self.sign_request_v1(url, content_type, body)?)
    }

    pub(crate) fn sign_request_v1(
        &self,
        url: &str,
        content_type: Option<&str>,
        body: Option<&[u8]>,
    ) -> std::result::Result<String, url::ParseError> {
        let u = Url::parse(url)?;
        let mut data_to_sign = Vec::with_capacity(1024);
        data_to_sign.extend_from_slice(u.path().as_bytes());
        if let Some(query) = u.query() {
            data_to_sign.extend_from_slice(b"?");
            data_to_sign.extend_from_slice(query.as_bytes());
        }
        data_to_sign.extend_from_slice(b"\n");
        if let (Some(content_type), Some(body)) = (content_type, body) {
            if FORM_MIME.eq_ignore_ascii_case(content_type) {
                data_to_sign.extend_from_slice(body);
            }
        }
        Ok(self.sign(&data_to_sign))
    }

    /// 为私有空间的下载地址签名
    ///
    /// 签名范围是包含查询参数的完整 URL，签名后追加 `e` 和 `token` 两个参数
    pub fn sign_download_url_with_deadline(&self, url: &str, deadline: SystemTime) -> String {
        let mut signed_url = String::with_capacity(url.len() + 64);
        signed_url.push_str(url);
        signed_url.push_str(if url.contains('?') { "&e=" } else { "?e=" });

        let deadline = deadline
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|d| u32::try_from(d.as_secs()).ok())
            .unwrap_or(u32::MAX);
        signed_url.push_str(&deadline.to_string());

        let token = self.sign(signed_url.as_bytes());
        signed_url.push_str("&token=");
        signed_url.push_str(&token);
        signed_url
    }

    pub fn sign_download_url_with_lifetime(&self, url: &str, lifetime: Duration) -> String {
        self.sign_download_url_with_deadline(url, SystemTime::now() + lifetime)
    }

    fn base64ed_hmac_digest(&self, data: &[u8]) -> String {
        // HMAC 接受任意长度的密钥
        let mut hmac = match Hmac::<Sha1>::new_from_slice(self.secret_key().as_bytes()) {
            Ok(hmac) => hmac,
            Err(_) => unreachable!("HMAC can take key of any size"),
        };
        hmac.update(data);
        base64::urlsafe(&hmac.finalize().into_bytes())
    }

    #[allow(dead_code)]
    fn assert() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_fmt(format_args!(
            "Credential {{ access_key: {:?}, secret_key: CENSORED }}",
            self.access_key()
        ))
    }
}
