use super::{has_top_level_type, Analyzer, ExtractionError, FopFetcher, ObjectMetadata};
use crate::{config::Config, storage::url::UrlBuilder};
use getset::{CopyGetters, Getters};
use serde::Deserialize;
use serde_json::Value;

const AV_INFO_FOP: &str = "avinfo";

#[derive(Deserialize, Debug, Default)]
struct AvInfo {
    #[serde(default)]
    streams: Vec<Stream>,
}

#[derive(Deserialize, Debug, Default)]
struct Stream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    duration: Option<Value>,
    #[serde(default)]
    display_aspect_ratio: Option<String>,
}

/// `avinfo` 中第一条视频流的信息
///
/// 没有视频流时所有字段都为空
#[derive(Debug, Clone, Default, PartialEq, Getters, CopyGetters)]
pub struct VideoInfo {
    #[get_copy = "pub"]
    width: Option<u32>,

    #[get_copy = "pub"]
    height: Option<u32>,

    /// 时长，单位为秒
    #[get_copy = "pub"]
    duration: Option<f64>,

    /// 显示宽高比，比如 `16:9`
    #[get = "pub"]
    aspect_ratio: Option<String>,
}

impl From<AvInfo> for VideoInfo {
    fn from(info: AvInfo) -> Self {
        info.streams
            .into_iter()
            .find(|stream| stream.codec_type.as_deref() == Some("video"))
            .map(|stream| VideoInfo {
                width: stream.width,
                height: stream.height,
                duration: stream.duration.as_ref().and_then(parse_duration),
                aspect_ratio: stream.display_aspect_ratio,
            })
            .unwrap_or_default()
    }
}

fn parse_duration(duration: &Value) -> Option<f64> {
    match duration {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl From<VideoInfo> for ObjectMetadata {
    fn from(info: VideoInfo) -> Self {
        ObjectMetadata {
            width: info.width,
            height: info.height,
            duration: info.duration,
            aspect_ratio: info.aspect_ratio,
            ..Default::default()
        }
    }
}

/// 音视频元信息提取器
#[derive(Clone)]
pub struct VideoAnalyzer {
    fetcher: FopFetcher,
}

impl VideoAnalyzer {
    pub fn new(url_builder: UrlBuilder, config: &Config) -> Self {
        Self {
            fetcher: FopFetcher::new(url_builder, config),
        }
    }
}

impl Analyzer for VideoAnalyzer {
    type Info = VideoInfo;

    fn accept(&self, content_type: &str) -> bool {
        has_top_level_type(content_type, "video")
    }

    fn analyze(&self, key: &str) -> Result<VideoInfo, ExtractionError> {
        self.fetcher.fetch::<AvInfo>(key, AV_INFO_FOP).map(VideoInfo::from)
    }
}
