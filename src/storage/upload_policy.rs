use assert_impl::assert_impl;
use log::debug;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::{
    borrow::Borrow,
    fmt,
    hash::Hash,
    ops::{Bound, RangeBounds},
    str::Split,
    time::{Duration, SystemTime},
};

const SCOPE_KEY: &str = "scope";
const DEADLINE_KEY: &str = "deadline";
const INSERT_ONLY_KEY: &str = "insertOnly";
const END_USER_KEY: &str = "endUser";
const RETURN_URL_KEY: &str = "returnUrl";
const RETURN_BODY_KEY: &str = "returnBody";
const CALLBACK_URL_KEY: &str = "callbackUrl";
const CALLBACK_HOST_KEY: &str = "callbackHost";
const CALLBACK_BODY_KEY: &str = "callbackBody";
const CALLBACK_BODY_TYPE_KEY: &str = "callbackBodyType";
const PERSISTENT_OPS_KEY: &str = "persistentOps";
const PERSISTENT_NOTIFY_URL_KEY: &str = "persistentNotifyUrl";
const PERSISTENT_PIPELINE_KEY: &str = "persistentPipeline";
const SAVE_KEY_KEY: &str = "saveKey";
const FORCE_SAVE_KEY_KEY: &str = "forceSaveKey";
const FSIZE_MIN_KEY: &str = "fsizeMin";
const FSIZE_LIMIT_KEY: &str = "fsizeLimit";
const DETECT_MIME_KEY: &str = "detectMime";
const MIME_LIMIT_KEY: &str = "mimeLimit";
const FILE_TYPE_KEY: &str = "fileType";
const DELETE_AFTER_DAYS_KEY: &str = "deleteAfterDays";

/// 可以通过服务配置透传给上传策略的选项，左侧为配置中的名称，右侧为上传策略中的字段
const PASS_THROUGH_OPTIONS: &[(&str, &str)] = &[
    ("insert_only", INSERT_ONLY_KEY),
    ("end_user", END_USER_KEY),
    ("return_url", RETURN_URL_KEY),
    ("return_body", RETURN_BODY_KEY),
    ("callback_url", CALLBACK_URL_KEY),
    ("callback_host", CALLBACK_HOST_KEY),
    ("callback_body", CALLBACK_BODY_KEY),
    ("callback_body_type", CALLBACK_BODY_TYPE_KEY),
    ("persistent_ops", PERSISTENT_OPS_KEY),
    ("persistent_notify_url", PERSISTENT_NOTIFY_URL_KEY),
    ("persistent_pipeline", PERSISTENT_PIPELINE_KEY),
    ("save_key", SAVE_KEY_KEY),
    ("fsize_min", FSIZE_MIN_KEY),
    ("fsize_limit", FSIZE_LIMIT_KEY),
    ("detect_mime", DETECT_MIME_KEY),
    ("mime_limit", MIME_LIMIT_KEY),
    ("file_type", FILE_TYPE_KEY),
    ("delete_after_days", DELETE_AFTER_DAYS_KEY),
];

/// 上传策略
///
/// 可以阅读 <https://developer.qiniu.com/kodo/manual/1206/put-policy> 了解七牛安全机制。
/// 上传策略一旦生成就不能再修改，需要修改时可以转换回 [`UploadPolicyBuilder`]
#[derive(Clone, Eq, PartialEq)]
pub struct UploadPolicy {
    inner: JsonValue,
}

impl UploadPolicy {
    /// 为指定的存储空间生成的上传策略，不限制上传的对象名称
    #[inline]
    pub fn new_for_bucket(bucket: impl Into<String>, upload_token_lifetime: Duration) -> UploadPolicyBuilder {
        UploadPolicyBuilder::new_policy_for_bucket(bucket, upload_token_lifetime)
    }

    /// 为指定的存储空间和对象名称生成的上传策略
    #[inline]
    pub fn new_for_object(
        bucket: impl Into<String>,
        key: impl AsRef<str>,
        upload_token_lifetime: Duration,
    ) -> UploadPolicyBuilder {
        UploadPolicyBuilder::new_policy_for_object(bucket, key, upload_token_lifetime)
    }

    /// 存储空间约束
    pub fn bucket(&self) -> Option<&str> {
        self.get(SCOPE_KEY)
            .and_then(|s| s.as_str())
            .and_then(|s| s.split(':').next())
    }

    /// 对象名称约束
    pub fn key(&self) -> Option<&str> {
        self.get(SCOPE_KEY)
            .and_then(|v| v.as_str())
            .and_then(|s| s.split_once(':').map(|x| x.1))
    }

    /// 是否仅允许新增对象，不允许覆盖对象
    pub fn is_insert_only(&self) -> bool {
        self.get(INSERT_ONLY_KEY).and_then(|v| v.as_u64()).unwrap_or_default() > 0
    }

    /// 是否启用 MIME 类型自动检测
    pub fn mime_detection_enabled(&self) -> bool {
        self.get(DETECT_MIME_KEY).and_then(|v| v.as_u64()).unwrap_or_default() > 0
    }

    /// 上传凭证过期时间
    pub fn token_deadline(&self) -> Option<SystemTime> {
        self.get(DEADLINE_KEY)
            .and_then(|v| v.as_u64())
            .and_then(|t| SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(t)))
    }

    pub fn return_url(&self) -> Option<&str> {
        self.get(RETURN_URL_KEY).and_then(|v| v.as_str())
    }

    pub fn return_body(&self) -> Option<&str> {
        self.get(RETURN_BODY_KEY).and_then(|v| v.as_str())
    }

    /// 上传成功后，七牛云向业务服务器发送 POST 请求的 URL 列表
    pub fn callback_urls(&self) -> Option<Split<char>> {
        self.get(CALLBACK_URL_KEY)
            .and_then(|v| v.as_str())
            .map(|s| s.split(';'))
    }

    pub fn callback_host(&self) -> Option<&str> {
        self.get(CALLBACK_HOST_KEY).and_then(|v| v.as_str())
    }

    pub fn callback_body(&self) -> Option<&str> {
        self.get(CALLBACK_BODY_KEY).and_then(|v| v.as_str())
    }

    pub fn callback_body_type(&self) -> Option<&str> {
        self.get(CALLBACK_BODY_TYPE_KEY).and_then(|v| v.as_str())
    }

    /// 自定义对象名称
    pub fn save_key(&self) -> Option<&str> {
        self.get(SAVE_KEY_KEY).and_then(|v| v.as_str())
    }

    /// 限定上传文件尺寸的范围
    ///
    /// 返回的第一个元素为最小尺寸，第二个元素为最大尺寸，如果为 `None` 表示不限制，单位为字节
    pub fn file_size_limitation(&self) -> (Option<u64>, Option<u64>) {
        (
            self.get(FSIZE_MIN_KEY).and_then(|v| v.as_u64()),
            self.get(FSIZE_LIMIT_KEY).and_then(|v| v.as_u64()),
        )
    }

    /// 限定用户上传的文件类型
    pub fn mime_types(&self) -> Option<Split<char>> {
        self.get(MIME_LIMIT_KEY).and_then(|v| v.as_str()).map(|s| s.split(';'))
    }

    /// 对象生命周期，精确到天
    pub fn object_lifetime(&self) -> Option<Duration> {
        self.get(DELETE_AFTER_DAYS_KEY)
            .and_then(|v| v.as_u64())
            .map(|d| Duration::from_secs(d * 60 * 60 * 24))
    }

    /// 获取 JSON 格式的上传策略
    pub fn as_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.inner)
    }

    /// 解析 JSON 格式的上传策略
    pub fn from_json(json: impl AsRef<[u8]>) -> serde_json::Result<UploadPolicy> {
        serde_json::from_slice(json.as_ref()).map(|inner| UploadPolicy { inner })
    }

    /// 根据指定的上传策略字段获取相应的值
    #[inline]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.inner.get(key)
    }

    #[allow(dead_code)]
    fn assert() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

impl fmt::Debug for UploadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.inner.fmt(f)
    }
}

/// 上传策略构建器
#[derive(Clone)]
pub struct UploadPolicyBuilder {
    inner: JsonMap<String, JsonValue>,
}

impl From<UploadPolicy> for UploadPolicyBuilder {
    fn from(policy: UploadPolicy) -> Self {
        let inner = match policy.inner {
            JsonValue::Object(map) => map,
            _ => JsonMap::new(),
        };
        Self { inner }
    }
}

impl UploadPolicyBuilder {
    /// 为指定的存储空间生成的上传策略
    ///
    /// 允许用户上传文件到指定的存储空间，不限制上传客户端指定对象名称。
    pub fn new_policy_for_bucket(bucket: impl Into<String>, upload_token_lifetime: Duration) -> Self {
        let mut policy = Self { inner: JsonMap::new() };
        policy.set(SCOPE_KEY.into(), JsonValue::String(bucket.into()));
        policy.token_lifetime(upload_token_lifetime);
        policy
    }

    /// 为指定的存储空间和对象名称生成的上传策略
    ///
    /// 上传客户端不能指定与上传策略冲突的对象名称。
    pub fn new_policy_for_object(
        bucket: impl Into<String>,
        key: impl AsRef<str>,
        upload_token_lifetime: Duration,
    ) -> Self {
        let mut policy = Self { inner: JsonMap::new() };
        policy.set(
            SCOPE_KEY.into(),
            JsonValue::String(bucket.into() + ":" + key.as_ref()),
        );
        policy.token_lifetime(upload_token_lifetime);
        policy
    }

    /// 指定上传凭证有效期
    ///
    /// 过期时间溢出时取最大值
    pub fn token_lifetime(&mut self, lifetime: Duration) -> &mut Self {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|t| t.as_secs())
            .unwrap_or_default();
        self.set(DEADLINE_KEY.into(), json!(now.saturating_add(lifetime.as_secs())))
    }

    /// 指定上传凭证过期时间
    pub fn token_deadline(&mut self, deadline: SystemTime) -> &mut Self {
        self.set(
            DEADLINE_KEY.into(),
            json!(deadline
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|t| t.as_secs())
                .unwrap_or(u64::MAX)),
        )
    }

    /// 仅允许创建新的对象，不允许覆盖和修改同名对象
    pub fn insert_only(&mut self) -> &mut Self {
        self.set(INSERT_ONLY_KEY.into(), json!(1))
    }

    /// 启用 MIME 类型自动检测
    pub fn enable_mime_detection(&mut self) -> &mut Self {
        self.set(DETECT_MIME_KEY.into(), json!(1))
    }

    pub fn disable_mime_detection(&mut self) -> &mut Self {
        self.unset(DETECT_MIME_KEY)
    }

    /// Web 端文件上传成功后，浏览器执行 303 跳转的 URL
    pub fn return_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.set(RETURN_URL_KEY.into(), JsonValue::String(url.into()))
    }

    /// 上传成功后，自定义七牛云最终返回给上传端的数据，要求是合法的 JSON 文本
    pub fn return_body(&mut self, body: impl Into<String>) -> &mut Self {
        self.set(RETURN_BODY_KEY.into(), JsonValue::String(body.into()))
    }

    /// 上传成功后，七牛云向业务服务器发送 POST 请求的 URL 列表，`Host`，回调请求的内容以及其 `Content-Type`
    ///
    /// `host` 或 `body_type` 为空字符串时使用默认值
    pub fn callback<V: AsRef<[S]>, S: AsRef<str>>(
        &mut self,
        urls: V,
        host: impl Into<String>,
        body: impl Into<String>,
        body_type: impl Into<String>,
    ) -> &mut Self {
        self.set(CALLBACK_URL_KEY.into(), JsonValue::String(join_str_slice(urls, ";")));
        let callback_host = host.into();
        if callback_host.is_empty() {
            self.unset(CALLBACK_HOST_KEY);
        } else {
            self.set(CALLBACK_HOST_KEY.into(), JsonValue::String(callback_host));
        }
        self.set(CALLBACK_BODY_KEY.into(), JsonValue::String(body.into()));
        let callback_body_type = body_type.into();
        if callback_body_type.is_empty() {
            self.unset(CALLBACK_BODY_TYPE_KEY);
        } else {
            self.set(CALLBACK_BODY_TYPE_KEY.into(), JsonValue::String(callback_body_type));
        }
        self
    }

    /// 自定义对象名称
    ///
    /// `force` 为 `true` 时，将忽略上传时指定的对象名称
    pub fn save_as(&mut self, save_as: impl Into<String>, force: bool) -> &mut Self {
        self.set(SAVE_KEY_KEY.into(), JsonValue::String(save_as.into()));
        if force {
            self.set(FORCE_SAVE_KEY_KEY.into(), JsonValue::Bool(true));
        } else {
            self.unset(FORCE_SAVE_KEY_KEY);
        }
        self
    }

    /// 限定上传文件尺寸的范围，单位为字节
    pub fn file_size_limitation(&mut self, size: impl RangeBounds<u64>) -> &mut Self {
        match size.start_bound() {
            Bound::Included(&s) => self.set(FSIZE_MIN_KEY.into(), json!(s)),
            Bound::Excluded(&s) => self.set(FSIZE_MIN_KEY.into(), json!(s + 1)),
            Bound::Unbounded => self.unset(FSIZE_MIN_KEY),
        };
        match size.end_bound() {
            Bound::Included(&s) => self.set(FSIZE_LIMIT_KEY.into(), json!(s)),
            Bound::Excluded(&s) => self.set(FSIZE_LIMIT_KEY.into(), json!(s.saturating_sub(1))),
            Bound::Unbounded => self.unset(FSIZE_LIMIT_KEY),
        };
        self
    }

    /// 限定用户上传的文件类型
    pub fn mime_types<V: AsRef<[S]>, S: AsRef<str>>(&mut self, content_types: V) -> &mut Self {
        self.set(
            MIME_LIMIT_KEY.into(),
            JsonValue::String(join_str_slice(content_types, ";")),
        )
    }

    /// 对象生命周期，不足一天按一天计算
    pub fn object_lifetime(&mut self, lifetime: Duration) -> &mut Self {
        const SECS_ONE_DAY: u64 = 60 * 60 * 24;
        let days = lifetime.as_secs().saturating_add(SECS_ONE_DAY - 1) / SECS_ONE_DAY;
        self.set(DELETE_AFTER_DAYS_KEY.into(), json!(days))
    }

    /// 应用服务配置中透传的上传策略选项
    ///
    /// 只接受能够识别的选项，其余选项（比如连接相关的配置）会被忽略。
    /// 布尔值会被转换为 `0` / `1`
    pub fn apply_options<'a>(&mut self, options: impl IntoIterator<Item = (&'a String, &'a JsonValue)>) -> &mut Self {
        for (name, value) in options {
            match PASS_THROUGH_OPTIONS.iter().find(|(option, _)| *option == name.as_str()) {
                Some((_, field)) => {
                    let value = match value {
                        JsonValue::Bool(b) => json!(u8::from(*b)),
                        value => value.to_owned(),
                    };
                    self.set((*field).to_owned(), value);
                }
                None => debug!("Ignore option `{}` which is not an upload policy field", name),
            }
        }
        self
    }

    /// 直接设置上传策略的键值对
    #[inline]
    pub fn set(&mut self, k: String, v: JsonValue) -> &mut Self {
        self.inner.insert(k, v);
        self
    }

    /// 直接删除上传策略的键
    #[inline]
    pub fn unset<Q>(&mut self, k: &Q) -> &mut Self
    where
        String: Borrow<Q>,
        Q: ?Sized + Ord + Eq + Hash,
    {
        self.inner.remove(k);
        self
    }

    /// 生成上传策略
    pub fn build(&self) -> UploadPolicy {
        UploadPolicy {
            inner: JsonValue::Object(self.inner.clone()),
        }
    }
}

impl fmt::Debug for UploadPolicyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.inner.fmt(f)
    }
}

fn join_str_slice<V: AsRef<[S]>, S: AsRef<str>, Sep: AsRef<str>>(slice: V, sep: Sep) -> String {
    let mut iter = slice.as_ref().iter().map(|s| s.as_ref());
    let mut joined = String::new();
    if let Some(first) = iter.next() {
        joined.push_str(first);
        joined = iter.fold(joined, |mut joined, s| {
            joined.push_str(sep.as_ref());
            joined.push_str(s);
            joined
        })
    }
    joined
}
