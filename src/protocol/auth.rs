//! Client authentication
//!
//! Drives the startup authentication exchange: trust, cleartext password
//! (optionally bridged to a token service), MD5, and a full RFC 5802
//! SCRAM-SHA-256 implementation with `tls-server-end-point` channel binding
//! when the transport is TLS. Credentials come from a pluggable
//! [`CredentialStore`]; the overall 5-second budget is enforced by the
//! session, which owns the socket.

use crate::error::{AdapterError, Result};
use crate::protocol::message::{AuthenticationRequest, BackendMessage};
use crate::protocol::parser::Reader;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use log::{debug, warn};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// End-to-end authentication budget, also applied per round trip.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

const SCRAM_ITERATIONS: u32 = 4096;

/// Authentication method the server demands at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication (development only)
    Trust,

    /// Cleartext password
    Password,

    /// Salted double-MD5
    Md5,

    /// SCRAM-SHA-256 (SASL)
    ScramSha256,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Trust => write!(f, "trust"),
            AuthMethod::Password => write!(f, "password"),
            AuthMethod::Md5 => write!(f, "md5"),
            AuthMethod::ScramSha256 => write!(f, "scram-sha-256"),
        }
    }
}

impl From<&str> for AuthMethod {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "trust" => AuthMethod::Trust,
            "password" => AuthMethod::Password,
            "md5" => AuthMethod::Md5,
            "scram-sha-256" => AuthMethod::ScramSha256,
            other => {
                warn!("unknown auth method \"{}\", defaulting to scram-sha-256", other);
                AuthMethod::ScramSha256
            }
        }
    }
}

/// A credential as the store holds it.
#[derive(Debug, Clone)]
pub enum StoredCredential {
    /// Cleartext password; SCRAM verifiers are derived per session
    Plain(String),

    /// Pre-derived SCRAM verifier
    ScramVerifier {
        /// Salt used at derivation
        salt: Vec<u8>,
        /// PBKDF2 iteration count
        iterations: u32,
        /// H(ClientKey)
        stored_key: Vec<u8>,
        /// HMAC(SaltedPassword, "Server Key")
        server_key: Vec<u8>,
    },
}

/// Where user credentials come from. The engine does not care which.
pub trait CredentialStore: Send + Sync {
    /// Credential for `user`, or None when the user is unknown.
    fn lookup(&self, user: &str) -> Option<StoredCredential>;
}

/// In-memory user/password table, loaded from configuration.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: HashMap<String, String>,
}

impl MemoryCredentialStore {
    /// Store over a user → password map.
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn lookup(&self, user: &str) -> Option<StoredCredential> {
        self.users
            .get(user)
            .map(|password| StoredCredential::Plain(password.clone()))
    }
}

/// Single-user store fed by `PGWIRE_USER` / `PGWIRE_PASSWORD`.
#[derive(Debug, Default)]
pub struct EnvCredentialStore;

impl CredentialStore for EnvCredentialStore {
    fn lookup(&self, user: &str) -> Option<StoredCredential> {
        let env_user = std::env::var("PGWIRE_USER").ok()?;
        if env_user != user {
            return None;
        }
        std::env::var("PGWIRE_PASSWORD")
            .ok()
            .map(StoredCredential::Plain)
    }
}

/// Optional bridge exchanging a password for a backend token. The token is
/// stored on the session and handed to the executor factory; it is never
/// echoed to the client.
pub trait TokenExchanger: Send + Sync {
    /// Exchange credentials for a token.
    fn exchange_password_for_token(&self, user: &str, password: &str) -> Result<String>;
}

/// Builds one [`AuthExchange`] per connection.
pub struct Authenticator {
    method: AuthMethod,
    store: Arc<dyn CredentialStore>,
    exchanger: Option<Arc<dyn TokenExchanger>>,
}

impl Authenticator {
    /// Authenticator with the given method and credential store.
    pub fn new(method: AuthMethod, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            method,
            store,
            exchanger: None,
        }
    }

    /// Attach the OAuth bridge.
    pub fn with_token_exchanger(mut self, exchanger: Arc<dyn TokenExchanger>) -> Self {
        self.exchanger = Some(exchanger);
        self
    }

    /// Configured method.
    pub fn method(&self) -> AuthMethod {
        self.method
    }

    /// Start the exchange for a connection. `cert_hash` is the TLS
    /// certificate digest when the transport is TLS, enabling
    /// SCRAM-SHA-256-PLUS channel binding.
    pub fn begin(&self, user: &str, cert_hash: Option<Vec<u8>>) -> (AuthExchange, Vec<BackendMessage>) {
        let mut exchange = AuthExchange {
            method: self.method,
            user: user.to_string(),
            store: Arc::clone(&self.store),
            exchanger: self.exchanger.clone(),
            cert_hash,
            md5_salt: [0u8; 4],
            scram: None,
            complete: false,
            token: None,
        };

        let messages = match self.method {
            AuthMethod::Trust => {
                exchange.complete = true;
                vec![BackendMessage::Authentication(AuthenticationRequest::Ok)]
            }
            AuthMethod::Password => {
                vec![BackendMessage::Authentication(
                    AuthenticationRequest::CleartextPassword,
                )]
            }
            AuthMethod::Md5 => {
                thread_rng().fill(&mut exchange.md5_salt);
                vec![BackendMessage::Authentication(
                    AuthenticationRequest::Md5Password {
                        salt: exchange.md5_salt,
                    },
                )]
            }
            AuthMethod::ScramSha256 => {
                let mut mechanisms = Vec::new();
                if exchange.cert_hash.is_some() {
                    mechanisms.push("SCRAM-SHA-256-PLUS".to_string());
                }
                mechanisms.push("SCRAM-SHA-256".to_string());
                vec![BackendMessage::Authentication(AuthenticationRequest::Sasl {
                    mechanisms,
                })]
            }
        };

        (exchange, messages)
    }
}

/// One message of server output.
pub struct AuthStep {
    /// Messages to send
    pub messages: Vec<BackendMessage>,
    /// Whether authentication finished successfully
    pub complete: bool,
}

/// Per-connection authentication state machine. Fed the payload of each
/// incoming 'p' frame; produces the server's next messages.
pub struct AuthExchange {
    method: AuthMethod,
    user: String,
    store: Arc<dyn CredentialStore>,
    exchanger: Option<Arc<dyn TokenExchanger>>,
    cert_hash: Option<Vec<u8>>,
    md5_salt: [u8; 4],
    scram: Option<ScramServer>,
    complete: bool,
    /// Token obtained through the OAuth bridge, if any
    pub token: Option<String>,
}

impl AuthExchange {
    /// Whether the exchange finished (trust finishes immediately).
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Process one 'p' frame payload.
    pub fn respond(&mut self, payload: &Bytes) -> Result<AuthStep> {
        if self.complete {
            return Err(AdapterError::Protocol(
                "unexpected message after authentication".to_string(),
            ));
        }

        match self.method {
            AuthMethod::Trust => Err(AdapterError::Protocol(
                "unexpected authentication response".to_string(),
            )),
            AuthMethod::Password => {
                let password = read_password(payload)?;
                self.check_password(&password)?;
                self.complete = true;
                Ok(AuthStep {
                    messages: vec![BackendMessage::Authentication(AuthenticationRequest::Ok)],
                    complete: true,
                })
            }
            AuthMethod::Md5 => {
                let received = read_password(payload)?;
                let expected = match self.lookup()? {
                    StoredCredential::Plain(password) => {
                        md5_response(&self.user, &password, &self.md5_salt)
                    }
                    StoredCredential::ScramVerifier { .. } => {
                        return Err(AdapterError::Auth(format!(
                            "password authentication failed for user \"{}\"",
                            self.user
                        )))
                    }
                };
                let ok: bool = received.as_bytes().ct_eq(expected.as_bytes()).into();
                if !ok {
                    return Err(AdapterError::Auth(format!(
                        "password authentication failed for user \"{}\"",
                        self.user
                    )));
                }
                self.complete = true;
                Ok(AuthStep {
                    messages: vec![BackendMessage::Authentication(AuthenticationRequest::Ok)],
                    complete: true,
                })
            }
            AuthMethod::ScramSha256 => self.respond_sasl(payload),
        }
    }

    fn respond_sasl(&mut self, payload: &Bytes) -> Result<AuthStep> {
        match self.scram.take() {
            None => {
                // SASLInitialResponse: mechanism name + length-prefixed
                // client-first-message
                let mut reader = Reader::new(payload);
                let mechanism = reader.cstring()?;
                let initial = match reader.nullable_bytes()? {
                    Some(bytes) => bytes,
                    None => Bytes::new(),
                };

                let plus = match mechanism.as_str() {
                    "SCRAM-SHA-256" => false,
                    "SCRAM-SHA-256-PLUS" if self.cert_hash.is_some() => true,
                    other => {
                        return Err(AdapterError::Auth(format!(
                            "unsupported SASL mechanism \"{}\"",
                            other
                        )))
                    }
                };

                let client_first = std::str::from_utf8(&initial)
                    .map_err(|_| AdapterError::Auth("malformed SASL message".to_string()))?;
                let credential = self.scram_credential()?;
                let mut server = ScramServer::new(plus, self.cert_hash.clone(), credential);
                let server_first = server.handle_client_first(client_first)?;
                self.scram = Some(server);

                Ok(AuthStep {
                    messages: vec![BackendMessage::Authentication(
                        AuthenticationRequest::SaslContinue {
                            data: Bytes::from(server_first),
                        },
                    )],
                    complete: false,
                })
            }
            Some(mut server) => {
                let client_final = std::str::from_utf8(payload)
                    .map_err(|_| AdapterError::Auth("malformed SASL message".to_string()))?;
                let server_final = server.handle_client_final(client_final)?;
                self.complete = true;
                Ok(AuthStep {
                    messages: vec![
                        BackendMessage::Authentication(AuthenticationRequest::SaslFinal {
                            data: Bytes::from(server_final),
                        }),
                        BackendMessage::Authentication(AuthenticationRequest::Ok),
                    ],
                    complete: true,
                })
            }
        }
    }

    fn lookup(&self) -> Result<StoredCredential> {
        self.store.lookup(&self.user).ok_or_else(|| {
            AdapterError::Auth(format!(
                "password authentication failed for user \"{}\"",
                self.user
            ))
        })
    }

    /// Validate a cleartext password, going through the OAuth bridge first
    /// when one is configured. A failed exchange falls back to direct
    /// validation against the store.
    fn check_password(&mut self, password: &str) -> Result<()> {
        if let Some(exchanger) = &self.exchanger {
            match exchanger.exchange_password_for_token(&self.user, password) {
                Ok(token) => {
                    debug!("token exchange succeeded for user {}", self.user);
                    self.token = Some(token);
                    return Ok(());
                }
                Err(err) => {
                    debug!("token exchange failed for user {}: {}", self.user, err);
                }
            }
        }

        let ok = match self.lookup()? {
            StoredCredential::Plain(expected) => {
                password.as_bytes().ct_eq(expected.as_bytes()).into()
            }
            StoredCredential::ScramVerifier {
                salt,
                iterations,
                stored_key,
                ..
            } => {
                let salted = hi(password.as_bytes(), &salt, iterations);
                let client_key = hmac(&salted, b"Client Key");
                let derived = Sha256::digest(client_key);
                derived.as_slice().ct_eq(&stored_key).into()
            }
        };
        if ok {
            Ok(())
        } else {
            Err(AdapterError::Auth(format!(
                "password authentication failed for user \"{}\"",
                self.user
            )))
        }
    }

    fn scram_credential(&self) -> Result<ScramCredential> {
        match self.lookup()? {
            StoredCredential::Plain(password) => {
                let mut salt = vec![0u8; 16];
                thread_rng().fill(salt.as_mut_slice());
                Ok(ScramCredential::derive(
                    password.as_bytes(),
                    salt,
                    SCRAM_ITERATIONS,
                ))
            }
            StoredCredential::ScramVerifier {
                salt,
                iterations,
                stored_key,
                server_key,
            } => Ok(ScramCredential {
                salt,
                iterations,
                stored_key,
                server_key,
            }),
        }
    }
}

fn read_password(payload: &Bytes) -> Result<String> {
    let mut reader = Reader::new(payload);
    reader.cstring()
}

/// `md5` + hex(md5(hex(md5(password || user)) || salt)), the PasswordMessage
/// body an MD5-authenticating client sends.
fn md5_response(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let inner = md5_hex(password.as_bytes(), user.as_bytes());
    format!("md5{}", md5_hex(inner.as_bytes(), salt))
}

fn md5_hex(data: &[u8], salt: &[u8]) -> String {
    let mut context = md5::Context::new();
    context.consume(data);
    context.consume(salt);
    hex::encode(context.compute().0)
}

#[derive(Debug, Clone)]
struct ScramCredential {
    salt: Vec<u8>,
    iterations: u32,
    stored_key: Vec<u8>,
    server_key: Vec<u8>,
}

impl ScramCredential {
    fn derive(password: &[u8], salt: Vec<u8>, iterations: u32) -> Self {
        let salted = hi(password, &salt, iterations);
        let client_key = hmac(&salted, b"Client Key");
        let stored_key = Sha256::digest(client_key).to_vec();
        let server_key = hmac(&salted, b"Server Key").to_vec();
        Self {
            salt,
            iterations,
            stored_key,
            server_key,
        }
    }
}

/// Server side of one SCRAM-SHA-256 exchange (RFC 5802).
struct ScramServer {
    plus: bool,
    cert_hash: Option<Vec<u8>>,
    credential: ScramCredential,
    gs2_header: String,
    client_first_bare: String,
    full_nonce: String,
    server_first: String,
}

impl ScramServer {
    fn new(plus: bool, cert_hash: Option<Vec<u8>>, credential: ScramCredential) -> Self {
        Self {
            plus,
            cert_hash,
            credential,
            gs2_header: String::new(),
            client_first_bare: String::new(),
            full_nonce: String::new(),
            server_first: String::new(),
        }
    }

    /// client-first-message → server-first-message.
    fn handle_client_first(&mut self, message: &str) -> Result<String> {
        // gs2-cbind-flag "," [authzid] "," client-first-message-bare
        let mut parts = message.splitn(3, ',');
        let cbind_flag = parts
            .next()
            .ok_or_else(|| AdapterError::Auth("malformed client-first message".to_string()))?;
        let authzid = parts
            .next()
            .ok_or_else(|| AdapterError::Auth("malformed client-first message".to_string()))?;
        let bare = parts
            .next()
            .ok_or_else(|| AdapterError::Auth("malformed client-first message".to_string()))?;

        match cbind_flag {
            "n" | "y" => {
                if self.plus {
                    return Err(AdapterError::Auth(
                        "channel binding required for SCRAM-SHA-256-PLUS".to_string(),
                    ));
                }
            }
            flag if flag.starts_with("p=") => {
                if !self.plus || self.cert_hash.is_none() {
                    return Err(AdapterError::Auth(
                        "channel binding not supported on this connection".to_string(),
                    ));
                }
                if flag != "p=tls-server-end-point" {
                    return Err(AdapterError::Auth(format!(
                        "unsupported channel binding \"{}\"",
                        &flag[2..]
                    )));
                }
            }
            other => {
                return Err(AdapterError::Auth(format!(
                    "malformed gs2 flag \"{}\"",
                    other
                )))
            }
        }
        self.gs2_header = format!("{},{},", cbind_flag, authzid);

        let client_nonce = scram_attr(bare, 'r')
            .ok_or_else(|| AdapterError::Auth("client nonce missing".to_string()))?;
        self.client_first_bare = bare.to_string();

        let server_nonce: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(18)
            .map(char::from)
            .collect();
        self.full_nonce = format!("{}{}", client_nonce, server_nonce);

        self.server_first = format!(
            "r={},s={},i={}",
            self.full_nonce,
            BASE64.encode(&self.credential.salt),
            self.credential.iterations
        );
        Ok(self.server_first.clone())
    }

    /// client-final-message → server-final-message.
    fn handle_client_final(&mut self, message: &str) -> Result<String> {
        let proof_b64 = scram_attr(message, 'p')
            .ok_or_else(|| AdapterError::Auth("client proof missing".to_string()))?;
        let nonce = scram_attr(message, 'r')
            .ok_or_else(|| AdapterError::Auth("nonce missing".to_string()))?;
        let channel_binding = scram_attr(message, 'c')
            .ok_or_else(|| AdapterError::Auth("channel binding missing".to_string()))?;

        if nonce != self.full_nonce {
            return Err(AdapterError::Auth("nonce mismatch".to_string()));
        }

        // c= carries base64(gs2-header ++ cbind-data)
        let mut expected_cbind = self.gs2_header.as_bytes().to_vec();
        if self.plus {
            if let Some(hash) = &self.cert_hash {
                expected_cbind.extend_from_slice(hash);
            }
        }
        let received_cbind = BASE64
            .decode(&channel_binding)
            .map_err(|_| AdapterError::Auth("malformed channel binding".to_string()))?;
        let cbind_ok: bool = received_cbind.ct_eq(&expected_cbind).into();
        if !cbind_ok {
            return Err(AdapterError::Auth("channel binding mismatch".to_string()));
        }

        let without_proof = message
            .rsplit_once(",p=")
            .map(|(head, _)| head)
            .ok_or_else(|| AdapterError::Auth("client proof missing".to_string()))?;
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, self.server_first, without_proof
        );

        let client_signature = hmac(&self.credential.stored_key, auth_message.as_bytes());
        let proof = BASE64
            .decode(&proof_b64)
            .map_err(|_| AdapterError::Auth("malformed client proof".to_string()))?;
        if proof.len() != client_signature.len() {
            return Err(AdapterError::Auth("malformed client proof".to_string()));
        }
        let client_key: Vec<u8> = proof
            .iter()
            .zip(client_signature.iter())
            .map(|(p, s)| p ^ s)
            .collect();
        let derived_stored = Sha256::digest(&client_key);
        let ok: bool = derived_stored
            .as_slice()
            .ct_eq(&self.credential.stored_key)
            .into();
        if !ok {
            return Err(AdapterError::Auth(
                "password authentication failed".to_string(),
            ));
        }

        let server_signature = hmac(&self.credential.server_key, auth_message.as_bytes());
        Ok(format!("v={}", BASE64.encode(server_signature)))
    }
}

fn scram_attr(message: &str, attr: char) -> Option<String> {
    message.split(',').find_map(|part| {
        let mut chars = part.chars();
        if chars.next() == Some(attr) && chars.next() == Some('=') {
            Some(part[2..].to_string())
        } else {
            None
        }
    })
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// PBKDF2-HMAC-SHA256, the `Hi` function of RFC 5802.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(password).expect("hmac accepts any key length");
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    let mut u = [0u8; 32];
    u.copy_from_slice(&mac.finalize().into_bytes());

    let mut result = u;
    for _ in 1..iterations {
        let mut mac = HmacSha256::new_from_slice(password).expect("hmac accepts any key length");
        mac.update(&u);
        u.copy_from_slice(&mac.finalize().into_bytes());
        for (r, b) in result.iter_mut().zip(u.iter()) {
            *r ^= b;
        }
    }
    result
}
