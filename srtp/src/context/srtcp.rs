use bytes::Bytes;

use super::*;

impl Context {
    /// Decrypts an SRTCP packet back into an RTCP packet.
    pub fn decrypt_rtcp(&mut self, encrypted: &[u8]) -> Result<Bytes> {
        let min_len = RTCP_ENCRYPTION_OFFSET + SRTCP_INDEX_SIZE + self.cipher.rtcp_auth_tag_len();
        if encrypted.len() < min_len {
            return Err(Error::SrtcpTooSmall(encrypted.len(), min_len));
        }

        let index = self.cipher.get_rtcp_index(encrypted);
        let ssrc = BigEndian::read_u32(&encrypted[4..8]);

        if let Some(replay_detector) = &mut self.get_srtcp_ssrc_state(ssrc).replay_detector {
            if !replay_detector.check(index as u64) {
                return Err(Error::SrtcpSsrcDuplicated(ssrc, index));
            }
        }

        let dst = self.cipher.decrypt_rtcp(encrypted, index, ssrc)?;

        if let Some(replay_detector) = &mut self.get_srtcp_ssrc_state(ssrc).replay_detector {
            replay_detector.accept();
        }

        Ok(dst)
    }

    /// Encrypts an RTCP packet, appending the SRTCP index word (E-bit set)
    /// and the auth tag.
    pub fn encrypt_rtcp(&mut self, plaintext: &[u8]) -> Result<Bytes> {
        if plaintext.len() < RTCP_ENCRYPTION_OFFSET {
            return Err(Error::SrtcpTooSmall(plaintext.len(), RTCP_ENCRYPTION_OFFSET));
        }
        let ssrc = BigEndian::read_u32(&plaintext[4..8]);

        let index = {
            let state = self.get_srtcp_ssrc_state(ssrc);
            state.srtcp_index += 1;
            if state.srtcp_index > MAX_SRTCP_INDEX {
                state.srtcp_index = 0;
            }
            state.srtcp_index
        };

        self.cipher.encrypt_rtcp(plaintext, index, ssrc)
    }
}
