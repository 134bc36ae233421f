use super::encoded_entry_uri;
use crate::{
    config::Config,
    credential::Credential,
    http::{
        client::Client,
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method, Request,
    },
    Error, Result,
};
use getset::{CopyGetters, Getters};
use log::{debug, info, warn};
use serde::Deserialize;
use std::time::{Duration, SystemTime};
use url::form_urlencoded;

const FORM_MIME: &str = "application/x-www-form-urlencoded";

/// 列举出的对象
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct ListedObject {
    #[get = "pub"]
    key: String,

    #[get = "pub"]
    #[serde(default)]
    hash: String,

    /// 对象尺寸，单位为字节
    #[get_copy = "pub"]
    #[serde(default)]
    fsize: u64,

    #[get = "pub"]
    #[serde(rename = "mimeType", default)]
    mime_type: String,

    #[serde(rename = "putTime", default)]
    put_time: u64,
}

impl ListedObject {
    /// 对象的上传时间
    pub fn uploaded_at(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_nanos(self.put_time.saturating_mul(100))
    }
}

/// 一次列举请求的结果
///
/// 当 `possibly_truncated()` 为 `true` 时，结果不是完整的集合，需要用 `marker()` 继续列举
#[derive(Debug, Clone, Default, Getters, CopyGetters)]
pub struct ListPage {
    #[get = "pub"]
    items: Vec<ListedObject>,

    #[get = "pub"]
    marker: Option<String>,

    #[get_copy = "pub"]
    possibly_truncated: bool,
}

impl ListPage {
    pub fn into_items(self) -> Vec<ListedObject> {
        self.items
    }
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    marker: Option<String>,
    #[serde(default)]
    items: Vec<ListedObject>,
}

/// 对象详细信息
#[derive(Deserialize, Debug, Clone, Getters, CopyGetters)]
pub struct ObjectInfo {
    #[get_copy = "pub"]
    fsize: u64,

    #[get = "pub"]
    hash: String,

    #[get = "pub"]
    #[serde(rename = "mimeType")]
    mime_type: String,

    #[serde(rename = "putTime")]
    put_time: u64,
}

impl ObjectInfo {
    pub fn uploaded_at(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_nanos(self.put_time.saturating_mul(100))
    }
}

/// 按前缀删除的结果，删除不是事务性的，部分对象可能删除失败
#[derive(Debug, Default)]
pub struct DeletionReport {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

impl DeletionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 存储空间管理器
///
/// 负责列举，检查存在性，获取对象信息和删除对象
#[derive(Clone)]
pub struct BucketManager {
    bucket: String,
    credential: Credential,
    config: Config,
    client: Client,
}

impl BucketManager {
    pub fn new(bucket: impl Into<String>, credential: Credential, config: Config) -> Self {
        let client = Client::new(config.caller(), config.http_request_retry_delay());
        Self {
            bucket: bucket.into(),
            credential,
            config,
            client,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// 列举以 `prefix` 开头的对象，单次请求最多返回 `limit` 个
    ///
    /// 只发出一次请求，不会自动翻页
    pub fn list(&self, prefix: &str, limit: usize, marker: Option<&str>) -> Result<ListPage> {
        let limit = limit.max(1);
        let mut query = form_urlencoded::Serializer::new(String::new());
        query
            .append_pair("bucket", &self.bucket)
            .append_pair("prefix", prefix)
            .append_pair("limit", &limit.to_string());
        if let Some(marker) = marker.filter(|m| !m.is_empty()) {
            query.append_pair("marker", marker);
        }
        let url = format!("{}/list?{}", self.config.rsf_url(), query.finish());
        let request = self.management_request(Method::POST, url)?;
        let response = self
            .client
            .send_with_attempts(&request, self.config.http_request_attempts())?;
        let ListResponse { marker, items } = response.parse_json()?;
        let marker = marker.filter(|m| !m.is_empty());
        let possibly_truncated = marker.is_some() || items.len() >= limit;
        debug!(
            "Listed {} objects with prefix {:?} in bucket {}",
            items.len(),
            prefix,
            self.bucket
        );
        Ok(ListPage {
            items,
            marker,
            possibly_truncated,
        })
    }

    /// 对象是否存在
    ///
    /// 列举是前缀匹配，因此还需要确认列举出的第一个对象名称与 `key` 完全相同
    pub fn exists(&self, key: &str) -> Result<bool> {
        let page = self.list(key, 1, None)?;
        Ok(page.items().iter().any(|item| item.key() == key))
    }

    /// 获取对象详细信息
    pub fn stat(&self, key: &str) -> Result<ObjectInfo> {
        let url = format!(
            "{}/stat/{}",
            self.config.rs_url(),
            encoded_entry_uri(&self.bucket, key)
        );
        let request = self.management_request(Method::GET, url)?;
        Ok(self
            .client
            .send_with_attempts(&request, self.config.http_request_attempts())?
            .parse_json()?)
    }

    /// 删除对象，对象不存在时视为成功
    pub fn delete(&self, key: &str) -> Result<()> {
        let url = format!(
            "{}/delete/{}",
            self.config.rs_url(),
            encoded_entry_uri(&self.bucket, key)
        );
        let request = self.management_request(Method::POST, url)?;
        match self.client.send(&request).map_err(Error::from) {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!("Object {} is not found in bucket {}, skip deleting", key, self.bucket);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// 删除所有以 `prefix` 开头的对象
    ///
    /// 逐个删除，单个对象删除失败不会中止后续删除，结果中会记录每个对象的删除情况。
    /// 列举失败时返回错误
    pub fn delete_prefixed(&self, prefix: &str) -> Result<DeletionReport> {
        let mut report = DeletionReport::default();
        let mut marker: Option<String> = None;
        loop {
            let page = self.list(prefix, self.config.list_limit(), marker.as_deref())?;
            let next_marker = page.marker().to_owned();
            for item in page.into_items() {
                match self.delete(item.key()) {
                    Ok(()) => report.deleted.push(item.key),
                    Err(err) => {
                        warn!("Failed to delete {} from bucket {}: {}", item.key(), self.bucket, err);
                        report.failed.push((item.key, err));
                    }
                }
            }
            match next_marker {
                Some(next) if marker.as_deref() != Some(next.as_str()) => marker = Some(next),
                _ => break,
            }
        }
        info!(
            "Deleted {} objects with prefix {:?} from bucket {}, {} failed",
            report.deleted.len(),
            prefix,
            self.bucket,
            report.failed.len()
        );
        Ok(report)
    }

    fn management_request(&self, method: Method, url: String) -> Result<Request> {
        let authorization = self
            .credential
            .authorization_v1_for_request(&url, Some(FORM_MIME), Some(b""))?;
        Ok(Request::builder(method, url)
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, FORM_MIME)
            .build())
    }
}
