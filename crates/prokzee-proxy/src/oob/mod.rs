//! OOB Listener Client: registers an RSA keypair with an Interactsh-style
//! out-of-band interaction server and decrypts polled interaction
//! payloads.
//!
//! Registration publishes the public key and a correlation id derived
//! from it; polling returns a list of AES session keys (each itself
//! RSA-OAEP/SHA-256 encrypted under our public key) and AES-CFB
//! encrypted interaction payloads, each payload prefixed by its 16-byte
//! IV.

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::events::{EventBus, Topic};

type Aes256CfbDec = cfb_mode::Decryptor<aes::Aes256>;

const KEY_BITS: usize = 2048;
const CLIENT_USER_AGENT: &str = "Interact.sh Client";
const CORRELATION_ID_LEN: usize = 20;

/// A fresh, random correlation id for one registration: 20 lowercase
/// alphanumeric characters, the xid-style shape the server expects as the
/// stable half of the OOB hostname. Generated per session rather than
/// derived from the keypair, so two sessions never collide even if they
/// happen to draw the same RSA key.
fn generate_correlation_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..CORRELATION_ID_LEN)
        .map(|_| {
            if rng.gen_bool(0.5) {
                rng.sample(rand::distributions::Uniform::new_inclusive('a', 'z'))
            } else {
                rng.sample(rand::distributions::Uniform::new_inclusive('0', '9'))
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub protocol: String,
    #[serde(rename = "unique-id")]
    pub unique_id: String,
    #[serde(rename = "full-id")]
    pub full_id: Option<String>,
    #[serde(rename = "remote-address")]
    pub remote_address: Option<String>,
    pub timestamp: Option<String>,
    #[serde(rename = "raw-request")]
    pub raw_request: Option<String>,
    #[serde(rename = "raw-response")]
    pub raw_response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    data: Option<Vec<String>>,
    #[serde(rename = "aes_key")]
    aes_key: Option<String>,
}

/// Holds the RSA keypair and derived correlation id for one OOB session.
pub struct OobClient {
    server: String,
    correlation_id: String,
    secret: String,
    private_key: RsaPrivateKey,
    public_key_b64: String,
    http: reqwest::Client,
}

impl OobClient {
    /// Generate a fresh keypair and a fresh correlation id for the
    /// server-visible subdomain, `{correlation_id}.{server_host}`.
    pub fn new(server: &str) -> Result<Self, String> {
        let mut rng = OsRng;
        let private_key =
            RsaPrivateKey::new(&mut rng, KEY_BITS).map_err(|e| format!("RSA key generation failed: {e}"))?;
        let public_key = RsaPublicKey::from(&private_key);
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| format!("failed to encode public key: {e}"))?;
        let public_key_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, public_key_pem.as_bytes());

        let correlation_id = generate_correlation_id();
        let secret = uuid::Uuid::new_v4().to_string();

        let http = reqwest::Client::builder()
            .user_agent(CLIENT_USER_AGENT)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;

        Ok(Self {
            server: server.trim_end_matches('/').to_string(),
            correlation_id,
            secret,
            private_key,
            public_key_b64,
            http,
        })
    }

    /// The fully-qualified OOB hostname an operator should embed in a
    /// request to trigger a later interaction. The correlation id is
    /// padded with random lowercase letters to 33 characters so the
    /// resulting label matches what the server's DNS/HTTP listeners
    /// expect to see.
    pub fn payload_host(&self) -> String {
        let server_host = self.server.trim_start_matches("https://").trim_start_matches("http://");
        format!("{}.{}", Self::pad_correlation_id(&self.correlation_id), server_host)
    }

    fn pad_correlation_id(correlation_id: &str) -> String {
        use rand::Rng;
        const TARGET_LEN: usize = 33;
        let mut id = correlation_id.to_string();
        let mut rng = rand::thread_rng();
        while id.len() < TARGET_LEN {
            id.push(rng.sample(rand::distributions::Uniform::new_inclusive('a', 'z')));
        }
        id
    }

    pub async fn register(&self) -> Result<(), String> {
        #[derive(Serialize)]
        struct RegisterRequest<'a> {
            #[serde(rename = "public-key")]
            public_key: &'a str,
            #[serde(rename = "secret-key")]
            secret_key: &'a str,
            #[serde(rename = "correlation-id")]
            correlation_id: &'a str,
        }

        let body = RegisterRequest {
            public_key: &self.public_key_b64,
            secret_key: &self.secret,
            correlation_id: &self.correlation_id,
        };

        let resp = self
            .http
            .post(format!("{}/register", self.server))
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("registration request failed: {e}"))?;

        if !resp.status().is_success() {
            return Err(format!("registration rejected with status {}", resp.status()));
        }
        Ok(())
    }

    /// Poll once for new interactions and publish each as an `oob:interaction`
    /// event.
    pub async fn poll_once(&self, bus: &EventBus) -> Result<usize, String> {
        let url = format!(
            "{}/poll?id={}&secret={}",
            self.server, self.correlation_id, self.secret
        );
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| format!("poll request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("poll rejected with status {}", resp.status()));
        }
        let parsed: PollResponse = resp.json().await.map_err(|e| format!("invalid poll response: {e}"))?;

        let (Some(data), Some(aes_key_b64)) = (parsed.data, parsed.aes_key) else {
            return Ok(0);
        };

        let session_key = self.decrypt_session_key(&aes_key_b64)?;
        let mut count = 0;
        for entry in data {
            match self.decrypt_interaction(&entry, &session_key) {
                Ok(interaction) => {
                    bus.publish(Topic::NewInteraction, &interaction);
                    count += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decrypt OOB interaction payload");
                }
            }
        }
        Ok(count)
    }

    fn decrypt_session_key(&self, aes_key_b64: &str) -> Result<Vec<u8>, String> {
        let encrypted =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, aes_key_b64)
                .map_err(|e| format!("invalid base64 aes_key: {e}"))?;
        let padding = Oaep::new::<Sha256>();
        self.private_key
            .decrypt(padding, &encrypted)
            .map_err(|e| format!("failed to decrypt session key: {e}"))
    }

    fn decrypt_interaction(&self, entry_b64: &str, session_key: &[u8]) -> Result<Interaction, String> {
        let raw = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, entry_b64)
            .map_err(|e| format!("invalid base64 interaction: {e}"))?;
        if raw.len() < 16 {
            return Err("interaction payload shorter than IV".to_string());
        }
        let (iv, ciphertext) = raw.split_at(16);
        let mut buf = ciphertext.to_vec();
        Aes256CfbDec::new(session_key.into(), iv.into()).decrypt(&mut buf);

        serde_json::from_slice(&buf).map_err(|e| format!("interaction payload is not valid JSON: {e}"))
    }

    pub async fn deregister(&self) -> Result<(), String> {
        #[derive(Serialize)]
        struct DeregisterRequest<'a> {
            #[serde(rename = "correlation-id")]
            correlation_id: &'a str,
            #[serde(rename = "secret-key")]
            secret_key: &'a str,
        }

        let resp = self
            .http
            .post(format!("{}/deregister", self.server))
            .json(&DeregisterRequest { correlation_id: &self.correlation_id, secret_key: &self.secret })
            .send()
            .await
            .map_err(|e| format!("deregistration request failed: {e}"))?;

        if !resp.status().is_success() {
            return Err(format!("deregistration rejected with status {}", resp.status()));
        }
        Ok(())
    }
}

/// Owns the lifetime of one OOB session: registration, a background poll
/// loop (every 5 seconds), and the `regenerate`/
/// `update_host_and_port` lifecycle operations the admin API exposes.
pub struct OobManager {
    bus: std::sync::Arc<EventBus>,
    inner: parking_lot::Mutex<Option<Running>>,
}

struct Running {
    client: std::sync::Arc<OobClient>,
    stop: std::sync::Arc<std::sync::atomic::AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl OobManager {
    pub fn new(bus: std::sync::Arc<EventBus>) -> Self {
        Self { bus, inner: parking_lot::Mutex::new(None) }
    }

    /// Start (or restart) a session against `server`: generate a keypair,
    /// register, and spawn the 5-second poll loop. Publishes
    /// `backend:registrationStatus`/`backend:domain` on success or
    /// `backend:registrationError` on failure.
    pub async fn start(&self, server: &str) -> Result<String, String> {
        self.stop_internal();

        let client = match OobClient::new(server) {
            Ok(c) => std::sync::Arc::new(c),
            Err(e) => {
                self.bus.publish(Topic::RegistrationError, serde_json::json!({"error": e}));
                return Err(e);
            }
        };
        if let Err(e) = client.register().await {
            self.bus.publish(Topic::RegistrationError, serde_json::json!({"error": e}));
            return Err(e);
        }

        let domain = client.payload_host();
        self.bus.publish(Topic::RegistrationStatus, serde_json::json!({"registered": true}));
        self.bus.publish(Topic::Domain, serde_json::json!({"domain": domain}));

        let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let task = spawn_poll_loop(client.clone(), self.bus.clone(), stop.clone());
        *self.inner.lock() = Some(Running { client, stop, task });
        Ok(domain)
    }

    /// Deregister, generate a fresh keypair, and re-register against the
    /// same server.
    pub async fn regenerate(&self) -> Result<String, String> {
        let server = {
            let guard = self.inner.lock();
            match guard.as_ref() {
                Some(running) => running.client.server.clone(),
                None => return Err("no active OOB session to regenerate".to_string()),
            }
        };
        if let Some(running) = self.inner.lock().as_ref() {
            let _ = running.client.deregister().await;
        }
        self.start(&server).await
    }

    /// Stop the listener, deregister, and clear all state.
    pub async fn update_host_and_port(&self, new_server: &str) -> Result<String, String> {
        if let Some(running) = self.inner.lock().as_ref() {
            let _ = running.client.deregister().await;
        }
        self.stop_internal();
        self.start(new_server).await
    }

    pub fn stop(&self) {
        self.stop_internal();
        self.bus.publish(Topic::RegistrationStatus, serde_json::json!({"registered": false}));
    }

    fn stop_internal(&self) {
        if let Some(running) = self.inner.lock().take() {
            running.stop.store(true, std::sync::atomic::Ordering::Relaxed);
            running.task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().is_some()
    }
}

fn spawn_poll_loop(
    client: std::sync::Arc<OobClient>,
    bus: std::sync::Arc<EventBus>,
    stop: std::sync::Arc<std::sync::atomic::AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            interval.tick().await;
            if stop.load(std::sync::atomic::Ordering::Relaxed) {
                break;
            }
            if let Err(e) = client.poll_once(&bus).await {
                tracing::warn!(error = %e, "OOB poll failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_is_fresh_per_client_not_derived_from_the_key() {
        let a = OobClient::new("https://oast.example.com").unwrap();
        let b = OobClient::new("https://oast.example.com").unwrap();
        assert_ne!(a.correlation_id, b.correlation_id);
        assert_eq!(a.correlation_id.len(), CORRELATION_ID_LEN);
        assert!(a.correlation_id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn public_key_is_sent_as_pem() {
        let client = OobClient::new("https://oast.example.com").unwrap();
        let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &client.public_key_b64).unwrap();
        let pem = String::from_utf8(decoded).unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
    }

    #[test]
    fn payload_host_embeds_correlation_id() {
        let client = OobClient::new("https://oast.example.com").unwrap();
        let host = client.payload_host();
        assert!(host.ends_with("oast.example.com"));
        assert!(host.starts_with(&client.correlation_id));
    }

    #[test]
    fn session_key_round_trips_through_rsa_oaep() {
        let client = OobClient::new("https://oast.example.com").unwrap();
        let session_key = vec![7u8; 32];
        let public_key = RsaPublicKey::from(&client.private_key);
        let padding = Oaep::new::<Sha256>();
        let encrypted = public_key
            .encrypt(&mut OsRng, padding, &session_key)
            .unwrap();
        let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &encrypted);

        let decrypted = client.decrypt_session_key(&b64).unwrap();
        assert_eq!(decrypted, session_key);
    }

    #[test]
    fn interaction_round_trips_through_aes_cfb() {
        let client = OobClient::new("https://oast.example.com").unwrap();
        let session_key = vec![9u8; 32];
        let iv = vec![1u8; 16];

        let interaction = Interaction {
            protocol: "dns".into(),
            unique_id: "abc".into(),
            full_id: Some("abc.oast.example.com".into()),
            remote_address: Some("203.0.113.5".into()),
            timestamp: Some("2024-01-01T00:00:00Z".into()),
            raw_request: None,
            raw_response: None,
        };
        let plaintext = serde_json::to_vec(&interaction).unwrap();

        let mut buf = plaintext.clone();
        cfb_mode::Encryptor::<aes::Aes256>::new(session_key.as_slice().into(), iv.as_slice().into())
            .encrypt(&mut buf);

        let mut entry = iv.clone();
        entry.extend_from_slice(&buf);
        let entry_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &entry);

        let decrypted = client.decrypt_interaction(&entry_b64, &session_key).unwrap();
        assert_eq!(decrypted.unique_id, "abc");
    }
}
