//! TLS and SASL support for broker connections.
//!
//! TLS is configured with rustls; certificates come from PEM text or a PEM
//! file, falling back to the webpki root set. SASL mechanisms plug in through
//! [`SaslAuthenticator`], which hands out one [`SaslSession`] per connection.
//! PLAIN and SCRAM-SHA-256/512 are built in.

use crate::{
    config::{SaslConfig, SaslMechanismKind, TlsConfig},
    error::{ClientError, Result},
    types::ScramMechanism,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use sha2::{Digest, Sha256, Sha512};
use std::sync::Arc;
use tracing::{debug, warn};

/// Salt length used for SCRAM credential upserts.
pub const SCRAM_SALT_LEN: usize = 64;

// ============================================================================
// TLS
// ============================================================================

/// Build a rustls client configuration from the TLS settings
pub fn build_tls_config(tls_config: &TlsConfig) -> Result<rustls::ClientConfig> {
    tls_config.validate()?;

    if tls_config.insecure_skip_verify {
        warn!("TLS certificate verification disabled - not recommended for production");
        let builder = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureVerifier));
        return with_client_auth(builder, tls_config);
    }

    let mut root_store = rustls::RootCertStore::empty();
    match tls_config.ca_pem()? {
        Some(ca_pem) => {
            let certs = parse_certificates(&ca_pem, "CA")?;
            debug!("Loaded {} CA certificate(s)", certs.len());
            for cert in certs {
                root_store
                    .add(cert)
                    .map_err(|e| ClientError::Tls(format!("Failed to add CA certificate: {}", e)))?;
            }
        }
        None => root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(root_store);
    with_client_auth(builder, tls_config)
}

fn with_client_auth(
    builder: rustls::ConfigBuilder<rustls::ClientConfig, rustls::client::WantsClientCert>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig> {
    if !tls_config.requires_client_cert() {
        return Ok(builder.with_no_client_auth());
    }

    let cert_pem = tls_config.client_cert.as_deref().ok_or_else(|| {
        ClientError::InvalidConfig("Client certificate required for mTLS".to_string())
    })?;
    let key_pem = tls_config.client_key.as_deref().ok_or_else(|| {
        ClientError::InvalidConfig("Client private key required for mTLS".to_string())
    })?;

    let chain = parse_certificates(cert_pem, "client")?;
    let key = parse_private_key(key_pem)?;

    builder
        .with_client_auth_cert(chain, key)
        .map_err(|e| ClientError::Tls(format!("Failed to configure client certificate: {}", e)))
}

fn parse_certificates(pem: &str, what: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(pem.as_bytes());
    let certs: std::result::Result<Vec<_>, _> = rustls_pemfile::certs(&mut reader).collect();
    let certs = certs
        .map_err(|e| ClientError::Tls(format!("Failed to parse {} certificate: {}", what, e)))?;
    if certs.is_empty() {
        return Err(ClientError::Tls(format!("No {} certificate found in PEM data", what)));
    }
    Ok(certs)
}

fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(pem.as_bytes());
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ClientError::Tls(format!("Failed to parse client private key: {}", e)))?
        .ok_or_else(|| ClientError::Tls("No private key found in PEM data".to_string()))
}

#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

// ============================================================================
// SASL
// ============================================================================

/// Next action of a SASL exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslStep {
    /// Send these bytes in a SaslAuthenticate request
    Respond(Vec<u8>),
    /// Authentication is complete
    Done,
}

/// One authentication exchange on one connection
pub trait SaslSession: Send {
    /// Advance the exchange. `challenge` is `None` on the first call and the
    /// broker's last `auth_bytes` afterwards.
    fn step(&mut self, challenge: Option<&[u8]>) -> Result<SaslStep>;
}

/// A SASL mechanism usable by the connection layer
pub trait SaslAuthenticator: Send + Sync + std::fmt::Debug {
    /// Mechanism name sent in the SaslHandshake request
    fn mechanism(&self) -> &str;

    /// Start a new exchange for a freshly opened connection
    fn session(&self) -> Box<dyn SaslSession>;
}

/// Build the authenticator for the configured credentials
pub fn authenticator_for(sasl: &SaslConfig) -> Arc<dyn SaslAuthenticator> {
    match sasl.mechanism {
        SaslMechanismKind::Plain => Arc::new(PlainAuthenticator {
            username: sasl.username.clone(),
            password: sasl.password.clone(),
        }),
        SaslMechanismKind::ScramSha256 => Arc::new(ScramAuthenticator {
            mechanism: ScramMechanism::Sha256,
            username: sasl.username.clone(),
            password: sasl.password.clone(),
        }),
        SaslMechanismKind::ScramSha512 => Arc::new(ScramAuthenticator {
            mechanism: ScramMechanism::Sha512,
            username: sasl.username.clone(),
            password: sasl.password.clone(),
        }),
    }
}

/// SASL/PLAIN
pub struct PlainAuthenticator {
    username: String,
    password: String,
}

impl std::fmt::Debug for PlainAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainAuthenticator")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl SaslAuthenticator for PlainAuthenticator {
    fn mechanism(&self) -> &str {
        "PLAIN"
    }

    fn session(&self) -> Box<dyn SaslSession> {
        let mut message = Vec::with_capacity(self.username.len() + self.password.len() + 2);
        message.push(0);
        message.extend_from_slice(self.username.as_bytes());
        message.push(0);
        message.extend_from_slice(self.password.as_bytes());
        Box::new(PlainSession {
            message: Some(message),
        })
    }
}

struct PlainSession {
    message: Option<Vec<u8>>,
}

impl SaslSession for PlainSession {
    fn step(&mut self, _challenge: Option<&[u8]>) -> Result<SaslStep> {
        Ok(match self.message.take() {
            Some(message) => SaslStep::Respond(message),
            None => SaslStep::Done,
        })
    }
}

/// SASL/SCRAM-SHA-256 and SASL/SCRAM-SHA-512 (RFC 5802 client)
pub struct ScramAuthenticator {
    mechanism: ScramMechanism,
    username: String,
    password: String,
}

impl std::fmt::Debug for ScramAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramAuthenticator")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl SaslAuthenticator for ScramAuthenticator {
    fn mechanism(&self) -> &str {
        self.mechanism.as_str()
    }

    fn session(&self) -> Box<dyn SaslSession> {
        let mut nonce = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut nonce);
        Box::new(ScramSession {
            mechanism: self.mechanism,
            username: self.username.clone(),
            password: self.password.clone(),
            client_nonce: BASE64.encode(nonce),
            state: ScramState::Initial,
        })
    }
}

enum ScramState {
    Initial,
    ClientFirstSent {
        client_first_bare: String,
    },
    ClientFinalSent {
        auth_message: String,
        salted_password: Vec<u8>,
    },
    Complete,
}

struct ScramSession {
    mechanism: ScramMechanism,
    username: String,
    password: String,
    client_nonce: String,
    state: ScramState,
}

impl SaslSession for ScramSession {
    fn step(&mut self, challenge: Option<&[u8]>) -> Result<SaslStep> {
        match std::mem::replace(&mut self.state, ScramState::Complete) {
            ScramState::Initial => {
                let client_first_bare =
                    format!("n={},r={}", escape_username(&self.username), self.client_nonce);
                let message = format!("n,,{}", client_first_bare);
                self.state = ScramState::ClientFirstSent { client_first_bare };
                Ok(SaslStep::Respond(message.into_bytes()))
            }
            ScramState::ClientFirstSent { client_first_bare } => {
                let server_first = challenge_text(challenge)?;
                let (nonce, salt_b64, iterations) = parse_server_first(&server_first)?;
                if !nonce.starts_with(&self.client_nonce) {
                    return Err(ClientError::Authentication("Server nonce mismatch".to_string()));
                }
                let salt = BASE64
                    .decode(salt_b64)
                    .map_err(|_| ClientError::Authentication("Invalid salt encoding".to_string()))?;

                let salted = salted_password(self.mechanism, &self.password, &salt, iterations);
                let client_key = hmac(self.mechanism, &salted, b"Client Key")?;
                let stored_key = hash(self.mechanism, &client_key);

                let without_proof = format!("c=biws,r={}", nonce);
                let auth_message = format!("{},{},{}", client_first_bare, server_first, without_proof);
                let signature = hmac(self.mechanism, &stored_key, auth_message.as_bytes())?;
                let proof: Vec<u8> = client_key
                    .iter()
                    .zip(signature.iter())
                    .map(|(k, s)| k ^ s)
                    .collect();

                let message = format!("{},p={}", without_proof, BASE64.encode(proof));
                self.state = ScramState::ClientFinalSent {
                    auth_message,
                    salted_password: salted,
                };
                Ok(SaslStep::Respond(message.into_bytes()))
            }
            ScramState::ClientFinalSent {
                auth_message,
                salted_password,
            } => {
                let server_final = challenge_text(challenge)?;
                if let Some(error) = server_final.strip_prefix("e=") {
                    return Err(ClientError::Authentication(error.to_string()));
                }
                let verifier = server_final.strip_prefix("v=").ok_or_else(|| {
                    ClientError::Authentication("Missing server signature".to_string())
                })?;
                let server_key = hmac(self.mechanism, &salted_password, b"Server Key")?;
                let expected = hmac(self.mechanism, &server_key, auth_message.as_bytes())?;
                if BASE64.encode(expected) != verifier {
                    return Err(ClientError::Authentication(
                        "Server verification failed".to_string(),
                    ));
                }
                Ok(SaslStep::Done)
            }
            ScramState::Complete => Ok(SaslStep::Done),
        }
    }
}

fn challenge_text(challenge: Option<&[u8]>) -> Result<String> {
    let bytes = challenge
        .ok_or_else(|| ClientError::Authentication("Missing server challenge".to_string()))?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ClientError::Authentication("Invalid challenge encoding".to_string()))
}

fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn parse_server_first(server_first: &str) -> Result<(String, String, u32)> {
    let mut nonce = None;
    let mut salt = None;
    let mut iterations = None;

    for attr in server_first.split(',') {
        if let Some(value) = attr.strip_prefix("r=") {
            nonce = Some(value.to_string());
        } else if let Some(value) = attr.strip_prefix("s=") {
            salt = Some(value.to_string());
        } else if let Some(value) = attr.strip_prefix("i=") {
            iterations = Some(value.parse::<u32>().map_err(|_| {
                ClientError::Authentication("Invalid iteration count".to_string())
            })?);
        }
    }

    let missing = |what: &str| ClientError::Authentication(format!("Missing {}", what));
    Ok((
        nonce.ok_or_else(|| missing("nonce"))?,
        salt.ok_or_else(|| missing("salt"))?,
        iterations.ok_or_else(|| missing("iterations"))?,
    ))
}

// ============================================================================
// SCRAM primitives
// ============================================================================

/// Fresh random salt for a credential upsert
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SCRAM_SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// PBKDF2-HMAC salted password (the `Hi()` function of RFC 5802)
pub fn salted_password(
    mechanism: ScramMechanism,
    password: &str,
    salt: &[u8],
    iterations: u32,
) -> Vec<u8> {
    match mechanism {
        ScramMechanism::Sha256 => {
            let mut out = vec![0u8; 32];
            pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
            out
        }
        ScramMechanism::Sha512 => {
            let mut out = vec![0u8; 64];
            pbkdf2::pbkdf2_hmac::<Sha512>(password.as_bytes(), salt, iterations, &mut out);
            out
        }
    }
}

fn hmac(mechanism: ScramMechanism, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let invalid = |_| ClientError::Internal("Invalid HMAC key length".to_string());
    Ok(match mechanism {
        ScramMechanism::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(invalid)?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        ScramMechanism::Sha512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(key).map_err(invalid)?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    })
}

fn hash(mechanism: ScramMechanism, data: &[u8]) -> Vec<u8> {
    match mechanism {
        ScramMechanism::Sha256 => Sha256::digest(data).to_vec(),
        ScramMechanism::Sha512 => Sha512::digest(data).to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Broker side of a SCRAM exchange, enough to drive the client session.
    fn server_final_for(
        mechanism: ScramMechanism,
        password: &str,
        salt: &[u8],
        iterations: u32,
        auth_message: &str,
    ) -> String {
        let salted = salted_password(mechanism, password, salt, iterations);
        let server_key = hmac(mechanism, &salted, b"Server Key").unwrap();
        let signature = hmac(mechanism, &server_key, auth_message.as_bytes()).unwrap();
        format!("v={}", BASE64.encode(signature))
    }

    #[test]
    fn test_plain_session_sends_one_message() {
        let auth = PlainAuthenticator {
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        let mut session = auth.session();
        assert_eq!(
            session.step(None).unwrap(),
            SaslStep::Respond(b"\0admin\0secret".to_vec())
        );
        assert_eq!(session.step(Some(b"")).unwrap(), SaslStep::Done);
        assert!(!format!("{:?}", auth).contains("secret"));
    }

    #[test]
    fn test_scram_exchange_verifies_server() {
        for mechanism in [ScramMechanism::Sha256, ScramMechanism::Sha512] {
            let auth = ScramAuthenticator {
                mechanism,
                username: "alice".to_string(),
                password: "pencil".to_string(),
            };
            let mut session = auth.session();

            let client_first = match session.step(None).unwrap() {
                SaslStep::Respond(bytes) => String::from_utf8(bytes).unwrap(),
                SaslStep::Done => panic!("expected client-first"),
            };
            let client_first_bare = client_first.strip_prefix("n,,").unwrap().to_string();
            let client_nonce = client_first_bare.split("r=").nth(1).unwrap().to_string();

            let salt = b"saltsaltsalt";
            let server_first = format!("r={}srv,s={},i=4096", client_nonce, BASE64.encode(salt));
            let client_final = match session.step(Some(server_first.as_bytes())).unwrap() {
                SaslStep::Respond(bytes) => String::from_utf8(bytes).unwrap(),
                SaslStep::Done => panic!("expected client-final"),
            };
            let without_proof = client_final.split(",p=").next().unwrap();
            let auth_message = format!("{},{},{}", client_first_bare, server_first, without_proof);

            let server_final = server_final_for(mechanism, "pencil", salt, 4096, &auth_message);
            assert_eq!(session.step(Some(server_final.as_bytes())).unwrap(), SaslStep::Done);
        }
    }

    #[test]
    fn test_scram_rejects_foreign_nonce() {
        let auth = ScramAuthenticator {
            mechanism: ScramMechanism::Sha256,
            username: "alice".to_string(),
            password: "pencil".to_string(),
        };
        let mut session = auth.session();
        session.step(None).unwrap();
        let result = session.step(Some(b"r=someone-else,s=c2FsdA==,i=4096"));
        assert!(matches!(result, Err(ClientError::Authentication(_))));
    }

    #[test]
    fn test_parse_server_first_requires_all_fields() {
        assert!(parse_server_first("r=abc,s=c2FsdA==,i=4096").is_ok());
        assert!(parse_server_first("r=abc,i=4096").is_err());
        assert!(parse_server_first("r=abc,s=c2FsdA==,i=many").is_err());
    }

    #[test]
    fn test_salt_is_fresh_and_sized() {
        let a = generate_salt();
        let b = generate_salt();
        assert_eq!(a.len(), SCRAM_SALT_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn test_salted_password_length_follows_mechanism() {
        assert_eq!(salted_password(ScramMechanism::Sha256, "pw", b"salt", 4096).len(), 32);
        assert_eq!(salted_password(ScramMechanism::Sha512, "pw", b"salt", 4096).len(), 64);
    }

    #[test]
    fn test_tls_config_without_ca_uses_web_roots() {
        let config = build_tls_config(&TlsConfig::default());
        assert!(config.is_ok());
    }

    #[test]
    fn test_tls_config_rejects_garbage_ca() {
        let tls = TlsConfig {
            ca_cert: Some("not a certificate".to_string()),
            ..Default::default()
        };
        assert!(matches!(build_tls_config(&tls), Err(ClientError::Tls(_))));
    }
}
