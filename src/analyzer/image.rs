use super::{has_top_level_type, Analyzer, ExtractionError, FopFetcher, ObjectMetadata};
use crate::{config::Config, storage::url::UrlBuilder};
use getset::{CopyGetters, Getters};
use serde::Deserialize;

const IMAGE_INFO_FOP: &str = "imageInfo";

/// `imageInfo` 返回的图片信息
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq, Getters, CopyGetters)]
pub struct ImageInfo {
    /// 文件尺寸，单位为字节
    #[get_copy = "pub"]
    #[serde(default)]
    size: Option<u64>,

    /// 图片格式，比如 `png`，`gif`
    #[get = "pub"]
    #[serde(default)]
    format: Option<String>,

    #[get_copy = "pub"]
    #[serde(default)]
    width: Option<u32>,

    #[get_copy = "pub"]
    #[serde(default)]
    height: Option<u32>,

    #[get = "pub"]
    #[serde(rename = "colorModel", default)]
    color_model: Option<String>,

    /// 帧数，仅对动图有意义
    #[get_copy = "pub"]
    #[serde(rename = "frameNumber", default)]
    frame_count: Option<u32>,
}

impl From<ImageInfo> for ObjectMetadata {
    fn from(info: ImageInfo) -> Self {
        ObjectMetadata {
            size: info.size,
            format: info.format,
            width: info.width,
            height: info.height,
            ..Default::default()
        }
    }
}

/// 图片元信息提取器
#[derive(Clone)]
pub struct ImageAnalyzer {
    fetcher: FopFetcher,
}

impl ImageAnalyzer {
    pub fn new(url_builder: UrlBuilder, config: &Config) -> Self {
        Self {
            fetcher: FopFetcher::new(url_builder, config),
        }
    }
}

impl Analyzer for ImageAnalyzer {
    type Info = ImageInfo;

    fn accept(&self, content_type: &str) -> bool {
        has_top_level_type(content_type, "image")
    }

    fn analyze(&self, key: &str) -> Result<ImageInfo, ExtractionError> {
        self.fetcher.fetch(key, IMAGE_INFO_FOP)
    }
}
