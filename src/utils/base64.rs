//! URL 安全的 Base64 编解码

pub use base64::DecodeError;

/// 以 URL 安全的方式，将指定的二进制数据编码为 Base64 字符串
pub fn urlsafe(data: &[u8]) -> String {
    base64::encode_config(data, base64::URL_SAFE)
}

/// 以 URL 安全的方式编码，并去掉末尾的 `=`
///
/// 用于拼接在 URL 路径中的对象名称和 MIME 类型
pub fn urlsafe_no_pad(data: &[u8]) -> String {
    base64::encode_config(data, base64::URL_SAFE_NO_PAD)
}

/// 以 URL 安全的方式，将指定的 Base64 字符串解码为二进制数据
///
/// 有无末尾的 `=` 均可解码
pub fn decode(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let trimmed = data.iter().rposition(|&b| b != b'=').map_or(&data[..0], |pos| &data[..=pos]);
    base64::decode_config(trimmed, base64::URL_SAFE_NO_PAD)
}

/// 标准 Base64 编码，`Content-MD5` 使用该格式
pub fn standard(data: &[u8]) -> String {
    base64::encode(data)
}
