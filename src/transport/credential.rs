//! credentials handed to transports by the caller's callback

use std::fmt;
use std::ops::BitOr;
use std::path::PathBuf;

use crate::error::Result;

/// set of credential kinds a transport will accept
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CredentialType(u32);

impl CredentialType {
    pub const USERPASS_PLAINTEXT: CredentialType = CredentialType(1 << 0);
    pub const SSH_KEY: CredentialType = CredentialType(1 << 1);
    pub const SSH_CUSTOM: CredentialType = CredentialType(1 << 6);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: CredentialType) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for CredentialType {
    type Output = CredentialType;

    fn bitor(self, rhs: CredentialType) -> CredentialType {
        CredentialType(self.0 | rhs.0)
    }
}

/// signs a challenge with a key held outside the engine
pub type Signer = Box<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send>;

/// secrets are overwritten when a credential is dropped
pub enum Credential {
    UserPassPlaintext {
        username: String,
        password: String,
    },
    SshKey {
        username: String,
        public_key: Option<PathBuf>,
        private_key: PathBuf,
        passphrase: Option<String>,
    },
    SshCustom {
        username: String,
        public_key: Vec<u8>,
        signer: Signer,
    },
}

impl Credential {
    pub fn userpass(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::UserPassPlaintext {
            username: username.into(),
            password: password.into(),
        }
    }

    /// the single kind this credential is
    pub fn kind(&self) -> CredentialType {
        match self {
            Credential::UserPassPlaintext { .. } => CredentialType::USERPASS_PLAINTEXT,
            Credential::SshKey { .. } => CredentialType::SSH_KEY,
            Credential::SshCustom { .. } => CredentialType::SSH_CUSTOM,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Credential::UserPassPlaintext { username, .. }
            | Credential::SshKey { username, .. }
            | Credential::SshCustom { username, .. } => username,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::UserPassPlaintext { username, .. } => f
                .debug_struct("UserPassPlaintext")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credential::SshKey {
                username,
                public_key,
                private_key,
                ..
            } => f
                .debug_struct("SshKey")
                .field("username", username)
                .field("public_key", public_key)
                .field("private_key", private_key)
                .finish_non_exhaustive(),
            Credential::SshCustom { username, .. } => f
                .debug_struct("SshCustom")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        match self {
            Credential::UserPassPlaintext { password, .. } => scrub(password),
            Credential::SshKey {
                passphrase: Some(passphrase),
                ..
            } => scrub(passphrase),
            Credential::SshKey { .. } | Credential::SshCustom { .. } => {}
        }
    }
}

fn scrub(secret: &mut String) {
    let mut bytes = std::mem::take(secret).into_bytes();
    bytes.fill(0);
    std::hint::black_box(&bytes);
}

/// asks the caller for a credential: `(url, username from the url, allowed kinds)`
///
/// called again after every authentication failure until it returns an error.
pub type CredentialCallback = Box<dyn FnMut(&str, Option<&str>, CredentialType) -> Result<Credential> + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_type_bits() {
        let allowed = CredentialType::USERPASS_PLAINTEXT | CredentialType::SSH_KEY;
        assert!(allowed.contains(CredentialType::SSH_KEY));
        assert!(!allowed.contains(CredentialType::SSH_CUSTOM));
        assert!(CredentialType::default().is_empty());
    }

    #[test]
    fn test_kind_and_redacted_debug() {
        let cred = Credential::userpass("alice", "hunter2");
        assert_eq!(cred.kind(), CredentialType::USERPASS_PLAINTEXT);
        assert_eq!(cred.username(), "alice");
        let shown = format!("{:?}", cred);
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_custom_signer() {
        let cred = Credential::SshCustom {
            username: "git".into(),
            public_key: b"ssh-ed25519 AAAA".to_vec(),
            signer: Box::new(|challenge| Ok(challenge.iter().rev().copied().collect())),
        };
        let Credential::SshCustom { signer, .. } = &cred else {
            unreachable!()
        };
        assert_eq!(signer(b"abc").unwrap(), b"cba");
        assert_eq!(cred.kind(), CredentialType::SSH_CUSTOM);
    }
}
