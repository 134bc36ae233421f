pub mod base64;
pub(crate) mod crc32;
pub(crate) mod escape;
