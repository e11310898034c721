/// Cipher mode applied to the media payload.
///
/// The ZRTP negotiation fixes the block cipher and auth tag length; the
/// session profile additionally selects counter or feedback mode.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CipherMode {
    #[default]
    Counter,
    Feedback,
}

/// ProtectionProfile specifies the cipher and auth tag pairing applied to
/// one SRTP session, similar to a TLS cipher suite.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtectionProfile {
    #[default]
    Aes128CmHmacSha1_80,
    Aes128CmHmacSha1_32,
    Aes256CmHmacSha1_80,
    Aes256CmHmacSha1_32,
    Aes128CfbHmacSha1_80,
    Aes128CfbHmacSha1_32,
    Aes256CfbHmacSha1_80,
    Aes256CfbHmacSha1_32,
}

impl ProtectionProfile {
    pub fn key_len(&self) -> usize {
        match self {
            ProtectionProfile::Aes128CmHmacSha1_80
            | ProtectionProfile::Aes128CmHmacSha1_32
            | ProtectionProfile::Aes128CfbHmacSha1_80
            | ProtectionProfile::Aes128CfbHmacSha1_32 => 16,
            ProtectionProfile::Aes256CmHmacSha1_80
            | ProtectionProfile::Aes256CmHmacSha1_32
            | ProtectionProfile::Aes256CfbHmacSha1_80
            | ProtectionProfile::Aes256CfbHmacSha1_32 => 32,
        }
    }

    pub fn salt_len(&self) -> usize {
        14
    }

    pub fn auth_key_len(&self) -> usize {
        20
    }

    pub fn rtp_auth_tag_len(&self) -> usize {
        match self {
            ProtectionProfile::Aes128CmHmacSha1_80
            | ProtectionProfile::Aes256CmHmacSha1_80
            | ProtectionProfile::Aes128CfbHmacSha1_80
            | ProtectionProfile::Aes256CfbHmacSha1_80 => 10,
            ProtectionProfile::Aes128CmHmacSha1_32
            | ProtectionProfile::Aes256CmHmacSha1_32
            | ProtectionProfile::Aes128CfbHmacSha1_32
            | ProtectionProfile::Aes256CfbHmacSha1_32 => 4,
        }
    }

    pub fn rtcp_auth_tag_len(&self) -> usize {
        self.rtp_auth_tag_len()
    }

    pub fn cipher_mode(&self) -> CipherMode {
        match self {
            ProtectionProfile::Aes128CfbHmacSha1_80
            | ProtectionProfile::Aes128CfbHmacSha1_32
            | ProtectionProfile::Aes256CfbHmacSha1_80
            | ProtectionProfile::Aes256CfbHmacSha1_32 => CipherMode::Feedback,
            _ => CipherMode::Counter,
        }
    }
}
