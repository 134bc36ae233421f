#![deny(
    anonymous_parameters,
    keyword_idents,
    macro_use_extern_crate,
    non_ascii_idents,
    unsafe_code,
    unused_extern_crates,
    unused_import_braces,
    unused_lifetimes
)]

//! # qiniu-storage-service
//!
//! ## 七牛对象存储的存储服务适配
//!
//! 为宿主框架的可插拔存储接口提供七牛对象存储实现：
//!
//! - [`service::QiniuService`] : 上传，删除，按前缀删除，检查存在性，生成下载地址和客户端直传凭证
//! - [`storage::uploader::ResumableUploader`] : 分块上传，块级重试，可选并发上传和取消
//! - [`storage::url::UrlBuilder`] : 公开空间和私有空间的下载地址
//! - [`analyzer`] : 通过 `imageInfo` 和 `avinfo` 提取图片和音视频元信息

pub mod analyzer;
pub mod config;
mod credential;
mod error;
pub mod http;
pub mod service;
pub mod storage;
pub mod utils;

pub use config::{Config, ConfigBuilder};
pub use credential::Credential;
pub use error::{Error, Result};
pub use service::{DirectUpload, Protocol, QiniuService, ServiceOptions, StorageService};
