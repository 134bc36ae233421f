//! 基于七牛数据处理接口的元信息提取
//!
//! 提取结果只用于补充对象的描述信息，调用方可以通过 [`Analyzer::metadata`] 忽略提取失败

mod image;
mod video;

pub use image::{ImageAnalyzer, ImageInfo};
pub use video::{VideoAnalyzer, VideoInfo};

use crate::{
    config::Config,
    http::{client::Client, Error as HttpError, Method, Request},
    storage::url::{UrlBuilder, UrlOptions},
};
use log::warn;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// 元信息提取错误
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("failed to request `{fop}` of `{key}`: {source}")]
    Request {
        key: String,
        fop: &'static str,
        #[source]
        source: HttpError,
    },

    #[error("failed to parse `{fop}` of `{key}`: {source}")]
    Parse {
        key: String,
        fop: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// 对象的元信息，字段是否存在取决于对象类型和提取是否成功
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// 时长，单位为秒
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
}

impl ObjectMetadata {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// 元信息提取器
pub trait Analyzer {
    type Info: Into<ObjectMetadata>;

    /// 是否能处理该 MIME 类型的对象
    fn accept(&self, content_type: &str) -> bool;

    fn analyze(&self, key: &str) -> Result<Self::Info, ExtractionError>;

    /// 提取元信息，失败时记录日志并返回空的元信息
    fn metadata(&self, key: &str) -> ObjectMetadata {
        match self.analyze(key) {
            Ok(info) => info.into(),
            Err(err) => {
                warn!("Failed to extract metadata of {}: {}", key, err);
                ObjectMetadata::default()
            }
        }
    }
}

/// 通过下载地址调用数据处理接口
#[derive(Clone)]
pub(crate) struct FopFetcher {
    url_builder: UrlBuilder,
    client: Client,
    attempts: usize,
}

impl FopFetcher {
    pub(crate) fn new(url_builder: UrlBuilder, config: &Config) -> Self {
        Self {
            url_builder,
            client: Client::new(config.caller(), config.http_request_retry_delay()),
            attempts: config.http_request_attempts(),
        }
    }

    pub(crate) fn fetch<T: DeserializeOwned>(&self, key: &str, fop: &'static str) -> Result<T, ExtractionError> {
        let url = self.url_builder.build_url(key, &UrlOptions::fop(fop));
        let request = Request::builder(Method::GET, url).build();
        let response = self
            .client
            .send_with_attempts(&request, self.attempts)
            .map_err(|source| ExtractionError::Request {
                key: key.to_owned(),
                fop,
                source,
            })?;
        response.parse_json().map_err(|source| ExtractionError::Parse {
            key: key.to_owned(),
            fop,
            source,
        })
    }
}

fn has_top_level_type(content_type: &str, top_level: &str) -> bool {
    content_type
        .parse::<mime::Mime>()
        .map(|mime| mime.type_() == top_level)
        .unwrap_or(false)
}
