use crate::context::Context;
use crate::error::Result;
use crate::option::ContextOption;
use crate::protection_profile::ProtectionProfile;

/// Master key material for one media direction, as handed over by the key
/// agreement. Wiped on drop.
#[derive(Default, Clone)]
pub struct StreamKeys {
    pub master_key: Vec<u8>,
    pub master_salt: Vec<u8>,
}

impl StreamKeys {
    pub fn new(master_key: Vec<u8>, master_salt: Vec<u8>) -> Self {
        StreamKeys {
            master_key,
            master_salt,
        }
    }
}

impl Drop for StreamKeys {
    fn drop(&mut self) {
        for b in self
            .master_key
            .iter_mut()
            .chain(self.master_salt.iter_mut())
        {
            *b = 0;
        }
    }
}

/// Both directions of a protected media session: the outbound context is
/// keyed with the local master key, the inbound context with the remote one.
pub struct SessionProtection {
    pub outbound: Context,
    pub inbound: Context,
}

impl SessionProtection {
    pub fn new(
        profile: ProtectionProfile,
        local: &StreamKeys,
        remote: &StreamKeys,
    ) -> Result<Self> {
        Self::with_options(profile, local, remote, None, None)
    }

    pub fn with_options(
        profile: ProtectionProfile,
        local: &StreamKeys,
        remote: &StreamKeys,
        srtp_opt: Option<ContextOption>,
        srtcp_opt: Option<ContextOption>,
    ) -> Result<Self> {
        let outbound = Context::new(
            &local.master_key,
            &local.master_salt,
            profile,
            // Outbound packets are numbered locally; no replay checks run.
            Some(crate::option::srtp_no_replay_protection()),
            Some(crate::option::srtcp_no_replay_protection()),
        )?;
        let inbound = Context::new(
            &remote.master_key,
            &remote.master_salt,
            profile,
            srtp_opt,
            srtcp_opt,
        )?;
        Ok(SessionProtection { outbound, inbound })
    }
}
