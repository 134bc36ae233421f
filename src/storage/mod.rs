//! 存储空间相关的操作：上传，下载地址，列举和删除

pub mod bucket_manager;
pub mod upload_policy;
pub mod upload_token;
pub mod uploader;
pub mod url;

use crate::utils::base64;

/// 管理接口中用来指定对象的 `EncodedEntryURI`
pub(crate) fn encoded_entry_uri(bucket: &str, key: &str) -> String {
    base64::urlsafe((bucket.to_owned() + ":" + key).as_bytes())
}
