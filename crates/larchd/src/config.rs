use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

/// Larch router daemon configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Ed25519 private key as hex string (128 hex chars = 64 bytes).
    #[serde(default)]
    pub private_key: String,

    /// Public encryption key advertised in our router contact (64 hex chars).
    #[serde(default)]
    pub encryption_key: String,

    /// Optional node nickname (at most 32 bytes are kept).
    #[serde(default)]
    pub nickname: String,

    /// Where the signed router contact is persisted.
    #[serde(default = "default_rc_file")]
    pub rc_file: String,

    /// Soft target for concurrently established paths.
    #[serde(default = "default_num_paths")]
    pub num_paths: usize,

    /// Advertised listen address, e.g. `"::1"`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Advertised listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Link dialect advertised for the address, e.g. `"utp"`.
    #[serde(default = "default_dialect")]
    pub dialect: String,

    /// If true, advertise this node as an exit.
    #[serde(default)]
    pub exit_enabled: bool,
}

fn default_rc_file() -> String {
    "self.signed".to_string()
}

fn default_num_paths() -> usize {
    4
}

fn default_bind_address() -> String {
    "::1".to_string()
}

fn default_port() -> u16 {
    1090
}

fn default_dialect() -> String {
    "utp".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            private_key: String::new(),
            encryption_key: String::new(),
            nickname: String::new(),
            rc_file: default_rc_file(),
            num_paths: default_num_paths(),
            bind_address: default_bind_address(),
            port: default_port(),
            dialect: default_dialect(),
            exit_enabled: false,
        }
    }
}

const CONFIG_TEMPLATE: &str = include_str!("config_template.toml");

impl Config {
    /// Generate a new config with fresh random keys.
    pub fn generate() -> Self {
        let text = Self::generate_config_text();
        toml::from_str(&text).expect("config template must be valid TOML")
    }

    /// Generate a commented config file as a TOML string with fresh keys.
    pub fn generate_config_text() -> String {
        use rand::rngs::OsRng;
        use rand::RngCore;

        let signing_key = SigningKey::generate(&mut OsRng);
        let key_hex = hex::encode(signing_key.to_keypair_bytes());
        let mut enc = [0u8; 32];
        OsRng.fill_bytes(&mut enc);
        CONFIG_TEMPLATE
            .replace("{{PRIVATE_KEY}}", &key_hex)
            .replace("{{ENCRYPTION_KEY}}", &hex::encode(enc))
    }

    /// Parse the private key from hex.
    pub fn signing_key(&self) -> Result<SigningKey, String> {
        if self.private_key.is_empty() {
            return Err("no private key configured".to_string());
        }
        let bytes = hex::decode(&self.private_key)
            .map_err(|e| format!("invalid private key hex: {}", e))?;
        if bytes.len() != 64 {
            return Err(format!(
                "private key should be 64 bytes, got {}",
                bytes.len()
            ));
        }
        let key_bytes: [u8; 64] = bytes.try_into().expect("length checked above");
        SigningKey::from_keypair_bytes(&key_bytes)
            .map_err(|e| format!("invalid ed25519 key: {}", e))
    }

    /// Parse the advertised encryption key from hex.
    pub fn enc_key(&self) -> Result<[u8; 32], String> {
        let bytes = hex::decode(&self.encryption_key)
            .map_err(|e| format!("invalid encryption key hex: {}", e))?;
        if bytes.len() != 32 {
            return Err(format!(
                "encryption key should be 32 bytes, got {}",
                bytes.len()
            ));
        }
        Ok(bytes.try_into().expect("length checked above"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_config_has_usable_keys() {
        let config = Config::generate();
        assert!(config.signing_key().is_ok());
        assert!(config.enc_key().is_ok());
    }

    #[test]
    fn generated_configs_differ() {
        let a = Config::generate();
        let b = Config::generate();
        assert_ne!(a.private_key, b.private_key);
    }

    #[test]
    fn missing_key_is_an_error() {
        let config = Config::default();
        assert!(config.signing_key().is_err());
    }
}
