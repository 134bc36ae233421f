use serde_json::{Map, Value};

/// 上传响应
///
/// 对创建文件接口返回的 JSON 进行封装，当上传策略指定了 `returnBody` 时，响应内容可能与默认格式不同
#[derive(Debug, Clone, PartialEq)]
pub struct UploadResponse(Value);

impl UploadResponse {
    /// 对象名称
    pub fn key(&self) -> Option<&str> {
        self.0.get("key").and_then(|k| k.as_str())
    }

    /// 对象的 Etag
    pub fn hash(&self) -> Option<&str> {
        self.0.get("hash").and_then(|k| k.as_str())
    }

    /// 对象尺寸
    pub fn fsize(&self) -> Option<u64> {
        self.0.get("fsize").and_then(|k| k.as_u64())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        self.0.as_object()
    }

    pub fn into_json_value(self) -> Value {
        self.0
    }
}

impl From<Value> for UploadResponse {
    fn from(value: Value) -> Self {
        UploadResponse(value)
    }
}
