use bytes::Bytes;

use super::*;

impl Context {
    pub fn decrypt_rtp_with_header(
        &mut self,
        encrypted: &[u8],
        header: &RtpHeader,
    ) -> Result<Bytes> {
        let auth_tag_len = self.cipher.rtp_auth_tag_len();
        if encrypted.len() < header.header_len + auth_tag_len {
            return Err(Error::SrtpTooSmall(
                encrypted.len(),
                header.header_len + auth_tag_len,
            ));
        }

        let state = self.get_srtp_ssrc_state(header.ssrc);
        let (roc, diff, _) = state.next_rollover_count(header.sequence_number);
        if let Some(replay_detector) = &mut state.replay_detector {
            if !replay_detector.check(header.sequence_number as u64) {
                return Err(Error::SrtpSsrcDuplicated(
                    header.ssrc,
                    header.sequence_number,
                ));
            }
        }

        let dst = self.cipher.decrypt_rtp(encrypted, header, roc)?;

        // The window only advances after the auth tag verified.
        let state = self.get_srtp_ssrc_state(header.ssrc);
        if let Some(replay_detector) = &mut state.replay_detector {
            replay_detector.accept();
        }
        state.update_rollover_count(header.sequence_number, diff);

        Ok(dst)
    }

    /// Decrypts an SRTP packet back into an RTP packet.
    pub fn decrypt_rtp(&mut self, encrypted: &[u8]) -> Result<Bytes> {
        let header = RtpHeader::unmarshal(encrypted)?;
        self.decrypt_rtp_with_header(encrypted, &header)
    }

    pub fn encrypt_rtp_with_header(
        &mut self,
        plaintext: &[u8],
        header: &RtpHeader,
    ) -> Result<Bytes> {
        let (roc, diff, ovf) = self
            .get_srtp_ssrc_state(header.ssrc)
            .next_rollover_count(header.sequence_number);
        if ovf {
            // When 2^48 SRTP packets have been secured under one master key,
            // new keys are required. https://www.rfc-editor.org/rfc/rfc3711#section-9.2
            return Err(Error::ExceededMaxPackets);
        }

        let dst = self.cipher.encrypt_rtp(plaintext, header, roc)?;

        self.get_srtp_ssrc_state(header.ssrc)
            .update_rollover_count(header.sequence_number, diff);

        Ok(dst)
    }

    /// Encrypts an RTP packet in full (header left in the clear, payload
    /// encrypted, auth tag appended).
    pub fn encrypt_rtp(&mut self, plaintext: &[u8]) -> Result<Bytes> {
        let header = RtpHeader::unmarshal(plaintext)?;
        self.encrypt_rtp_with_header(plaintext, &header)
    }
}
