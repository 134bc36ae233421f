use super::upload_policy::UploadPolicy;
use crate::{credential::Credential, utils::base64, Result};
use std::{borrow::Cow, fmt, result};
use thiserror::Error;

/// 上传凭证
///
/// 可以是已经签发好的凭证字符串，也可以是尚未签名的上传策略和认证信息
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum UploadToken {
    Token(String),
    Policy(UploadPolicy, Credential),
}

impl UploadToken {
    pub fn from_token(t: impl Into<String>) -> UploadToken {
        UploadToken::Token(t.into())
    }

    pub fn from_policy(policy: UploadPolicy, credential: Credential) -> UploadToken {
        UploadToken::Policy(policy, credential)
    }

    pub fn access_key(&self) -> UploadTokenParseResult<&str> {
        match self {
            UploadToken::Token(token) => token
                .split_once(':')
                .map(|(access_key, _)| access_key)
                .ok_or(UploadTokenParseError::InvalidUploadTokenFormat),
            UploadToken::Policy(_, credential) => Ok(credential.access_key()),
        }
    }

    /// 获取上传策略，对于凭证字符串会解析其中携带的策略
    pub fn policy(&self) -> UploadTokenParseResult<Cow<UploadPolicy>> {
        match self {
            UploadToken::Token(token) => {
                let mut parts = token.splitn(3, ':');
                let encoded_policy = match (parts.next(), parts.next(), parts.next()) {
                    (Some(_), Some(_), Some(encoded_policy)) => encoded_policy,
                    _ => return Err(UploadTokenParseError::InvalidUploadTokenFormat),
                };
                let decoded_policy = base64::decode(encoded_policy.as_bytes())?;
                Ok(Cow::Owned(UploadPolicy::from_json(decoded_policy)?))
            }
            UploadToken::Policy(policy, _) => Ok(Cow::Borrowed(policy)),
        }
    }

    /// 获取凭证字符串
    pub fn token(&self) -> Result<String> {
        match self {
            UploadToken::Token(token) => Ok(token.to_owned()),
            UploadToken::Policy(policy, credential) => credential.sign_upload_policy(policy),
        }
    }
}

impl From<String> for UploadToken {
    fn from(s: String) -> Self {
        Self::from_token(s)
    }
}

impl From<&str> for UploadToken {
    fn from(s: &str) -> Self {
        Self::from_token(s)
    }
}

impl fmt::Display for UploadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadToken::Token(token) => fmt::Display::fmt(token, f),
            UploadToken::Policy(policy, credential) => match credential.sign_upload_policy(policy) {
                Ok(token) => fmt::Display::fmt(&token, f),
                Err(_) => Err(fmt::Error),
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum UploadTokenParseError {
    #[error("Invalid upload token format")]
    InvalidUploadTokenFormat,
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),
    #[error("JSON decode error: {0}")]
    JSONDecodeError(#[from] serde_json::Error),
}

pub type UploadTokenParseResult<T> = result::Result<T, UploadTokenParseError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::{error::Error, result::Result, time::Duration};

    #[test]
    fn test_build_upload_token_from_upload_policy() -> Result<(), Box<dyn Error>> {
        let policy = UploadPolicy::new_for_object("test_bucket", "test:file", Duration::from_secs(3600)).build();
        let token = UploadToken::from_policy(policy, get_credential()).token()?;
        assert!(token.starts_with(get_credential().access_key()));

        let token = UploadToken::from_token(token);
        assert_eq!(token.access_key()?, "abcdefghklmnopq");
        let policy = token.policy()?;
        assert_eq!(policy.bucket(), Some("test_bucket"));
        assert_eq!(policy.key(), Some("test:file"));
        Ok(())
    }

    #[test]
    fn test_parse_invalid_upload_token() {
        assert!(matches!(
            UploadToken::from("no-colon-at-all").access_key(),
            Err(UploadTokenParseError::InvalidUploadTokenFormat)
        ));
        assert!(matches!(
            UploadToken::from("ak:sign").policy(),
            Err(UploadTokenParseError::InvalidUploadTokenFormat)
        ));
        assert!(matches!(
            UploadToken::from("ak:sign:!!!").policy(),
            Err(UploadTokenParseError::Base64DecodeError(_))
        ));
        assert!(matches!(
            UploadToken::from("ak:sign:bm90IGpzb24=").policy(),
            Err(UploadTokenParseError::JSONDecodeError(_))
        ));
    }

    fn get_credential() -> Credential {
        Credential::new("abcdefghklmnopq", "1234567890")
    }
}
