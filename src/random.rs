//! 安全随机数生成模块
//!
//! 为会话 ID、邀请 token 和审计事件 ID 提供密码学安全的随机字符串。

use rand::{TryRngCore, rngs::OsRng};

use crate::error::{CryptoError, Error, Result};

/// 生成指定长度的随机字节数组
///
/// 使用操作系统提供的密码学安全随机数生成器 (CSPRNG)
///
/// # Example
///
/// ```rust
/// use crm_access::random::generate_random_bytes;
///
/// let bytes = generate_random_bytes(32).unwrap();
/// assert_eq!(bytes.len(), 32);
/// ```
pub fn generate_random_bytes(length: usize) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::Crypto(CryptoError::RngFailed(format!("{:?}", e))))?;
    Ok(bytes)
}

/// 生成指定长度的十六进制随机字符串
///
/// 最终字符串长度为字节数的两倍
pub fn generate_random_hex(byte_length: usize) -> Result<String> {
    let bytes = generate_random_bytes(byte_length)?;
    Ok(hex_encode(&bytes))
}

/// 生成 Base64 URL 安全随机字符串（不含填充）
///
/// # Example
///
/// ```rust
/// use crm_access::random::generate_random_base64_url;
///
/// let token = generate_random_base64_url(32).unwrap();
/// assert!(!token.contains('+'));
/// assert!(!token.contains('/'));
/// ```
pub fn generate_random_base64_url(byte_length: usize) -> Result<String> {
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    let bytes = generate_random_bytes(byte_length)?;
    Ok(URL_SAFE_NO_PAD.encode(&bytes))
}

/// 生成会话 ID（256 位熵）
pub fn generate_session_id() -> Result<String> {
    generate_random_base64_url(32)
}

/// 生成邀请 token
///
/// 格式：`inv_随机字符串`
pub fn generate_invitation_token(byte_length: usize) -> Result<String> {
    Ok(format!("inv_{}", generate_random_base64_url(byte_length)?))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_random_bytes() {
        let bytes = generate_random_bytes(32).unwrap();
        assert_eq!(bytes.len(), 32);

        // 两次生成不应相同
        let bytes2 = generate_random_bytes(32).unwrap();
        assert_ne!(bytes, bytes2);
    }

    #[test]
    fn test_generate_random_hex() {
        let hex = generate_random_hex(16).unwrap();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_random_base64_url() {
        let token = generate_random_base64_url(32).unwrap();
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
        assert!(!token.contains('='));
    }

    #[test]
    fn test_generate_invitation_token() {
        let token = generate_invitation_token(24).unwrap();
        assert!(token.starts_with("inv_"));
        assert_eq!(token.len(), 4 + 32); // 24 字节 -> 32 个 base64 字符
    }

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(&[0x00, 0xff, 0x10]), "00ff10");
        assert_eq!(hex_encode(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
    }
}
