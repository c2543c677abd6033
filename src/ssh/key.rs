//! SSH private key validation.
//!
//! Fleet runs are unattended, so a key that needs a passphrase can never be
//! used. Keys are checked here before any session is opened: the file must
//! be a PEM document, must not carry an encryption marker, and its payload
//! must parse as a supported private key format.

use pkcs8::ObjectIdentifier;
use sec1::EcParameters;
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::error::KeyError;

/// Magic prefix of the OpenSSH private key container.
const OPENSSH_MAGIC: &[u8] = b"openssh-key-v1\0";

const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const ID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

/// NIST P-256, P-384 and P-521.
const SUPPORTED_CURVES: [ObjectIdentifier; 3] = [
    ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7"),
    ObjectIdentifier::new_unwrap("1.3.132.0.34"),
    ObjectIdentifier::new_unwrap("1.3.132.0.35"),
];

/// Supported private key formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyKind {
    /// PKCS#1 RSA key (`RSA PRIVATE KEY`).
    Rsa,
    /// SEC1 elliptic curve key (`EC PRIVATE KEY`).
    Ec,
    /// Unencrypted PKCS#8 key (`PRIVATE KEY`).
    Pkcs8,
    /// OpenSSH container (`OPENSSH PRIVATE KEY`).
    OpenSsh {
        /// Key algorithm, e.g. `ssh-ed25519`.
        algorithm: String,
    },
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa => write!(f, "RSA (PKCS#1)"),
            Self::Ec => write!(f, "EC (SEC1)"),
            Self::Pkcs8 => write!(f, "PKCS#8"),
            Self::OpenSsh { algorithm } => write!(f, "OpenSSH {algorithm}"),
        }
    }
}

/// Validator for SSH private keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyValidator;

impl KeyValidator {
    /// Creates a new key validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates the private key stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Malformed`] if the file cannot be read or is not
    /// PEM, [`KeyError::EncryptedKeyRejected`] if it is passphrase protected,
    /// and [`KeyError::Unparseable`] if the payload is not a private key.
    pub fn validate_file(&self, path: &Path) -> Result<KeyKind, KeyError> {
        let source_name = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|e| KeyError::Malformed {
            source_name: source_name.clone(),
            message: format!("cannot read key file: {e}"),
        })?;
        self.validate_bytes(&bytes, &source_name)
    }

    /// Validates an in-memory private key.
    ///
    /// # Errors
    ///
    /// Same as [`KeyValidator::validate_file`].
    pub fn validate_bytes(&self, bytes: &[u8], source_name: &str) -> Result<KeyKind, KeyError> {
        let pem = pem::parse(bytes).map_err(|e| KeyError::Malformed {
            source_name: source_name.to_string(),
            message: e.to_string(),
        })?;

        if has_encryption_header(&pem) || is_encrypted_payload(pem.tag(), pem.contents()) {
            return Err(KeyError::EncryptedKeyRejected {
                source_name: source_name.to_string(),
            });
        }

        let kind = parse_payload(pem.tag(), pem.contents()).map_err(|message| KeyError::Unparseable {
            source_name: source_name.to_string(),
            message,
        })?;

        debug!("SSH key {source_name} is a usable {kind} key");
        Ok(kind)
    }

    /// Validates each distinct key path once, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first [`KeyError`] encountered.
    pub fn validate_all<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) -> Result<(), KeyError> {
        let mut seen = Vec::new();
        for path in paths {
            if seen.contains(&path) {
                continue;
            }
            self.validate_file(path)?;
            seen.push(path);
        }
        Ok(())
    }
}

/// Legacy OpenSSL encryption is announced by an RFC 1421 `Proc-Type` header.
fn has_encryption_header(pem: &pem::Pem) -> bool {
    pem.headers()
        .get("Proc-Type")
        .is_some_and(|value| value.contains("ENCRYPTED"))
}

/// Detects encryption markers carried inside the payload itself.
fn is_encrypted_payload(tag: &str, contents: &[u8]) -> bool {
    if tag == "ENCRYPTED PRIVATE KEY" {
        return true;
    }
    if tag == "OPENSSH PRIVATE KEY" {
        return openssh_cipher(contents).is_some_and(|cipher| cipher != b"none");
    }
    false
}

/// Reads the cipher name of an OpenSSH key container.
fn openssh_cipher(contents: &[u8]) -> Option<&[u8]> {
    let rest = contents.strip_prefix(OPENSSH_MAGIC)?;
    let len_bytes: [u8; 4] = rest.get(..4)?.try_into().ok()?;
    let len = usize::try_from(u32::from_be_bytes(len_bytes)).ok()?;
    rest.get(4..4 + len)
}

/// Parses the decoded key material according to its PEM label.
fn parse_payload(tag: &str, contents: &[u8]) -> Result<KeyKind, String> {
    match tag {
        "RSA PRIVATE KEY" => pkcs1::RsaPrivateKey::try_from(contents)
            .map(|_| KeyKind::Rsa)
            .map_err(|e| format!("invalid PKCS#1 RSA key: {e}")),
        "EC PRIVATE KEY" => {
            let key = sec1::EcPrivateKey::try_from(contents)
                .map_err(|e| format!("invalid SEC1 EC key: {e}"))?;
            check_curve(key.parameters.and_then(EcParameters::named_curve))?;
            Ok(KeyKind::Ec)
        }
        "PRIVATE KEY" => {
            let info = pkcs8::PrivateKeyInfo::try_from(contents)
                .map_err(|e| format!("invalid PKCS#8 key: {e}"))?;
            check_pkcs8_algorithm(&info)?;
            Ok(KeyKind::Pkcs8)
        }
        "OPENSSH PRIVATE KEY" => ssh_key::PrivateKey::from_bytes(contents)
            .map(|key| KeyKind::OpenSsh {
                algorithm: key.algorithm().as_str().to_string(),
            })
            .map_err(|e| format!("invalid OpenSSH key: {e}")),
        other => Err(format!("unsupported key type '{other}'")),
    }
}

/// Only RSA, Ed25519 and ECDSA on a NIST curve can authenticate a session.
fn check_pkcs8_algorithm(info: &pkcs8::PrivateKeyInfo<'_>) -> Result<(), String> {
    let oid = info.algorithm.oid;
    if oid == RSA_ENCRYPTION || oid == ID_ED25519 {
        return Ok(());
    }
    if oid != EC_PUBLIC_KEY {
        return Err(format!("unsupported PKCS#8 key algorithm {oid}"));
    }

    // The curve normally sits in the algorithm parameters, but may instead
    // be carried by the embedded SEC1 structure.
    let curve = info.algorithm.parameters_oid().ok().or_else(|| {
        sec1::EcPrivateKey::try_from(info.private_key)
            .ok()
            .and_then(|key| key.parameters)
            .and_then(EcParameters::named_curve)
    });
    check_curve(curve)
}

fn check_curve(curve: Option<ObjectIdentifier>) -> Result<(), String> {
    match curve {
        Some(oid) if SUPPORTED_CURVES.contains(&oid) => Ok(()),
        Some(oid) => Err(format!("unsupported elliptic curve {oid}")),
        None => Err(String::from("EC key does not name its curve")),
    }
}
