// Types, key agreement, cipher and wire formats shared by server and client.

pub mod api;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod protocol;
pub mod types;

pub use crypto::{decrypt, decrypt_or_placeholder, encrypt, EncryptedPayload};
pub use error::{CryptoError, ProtocolError};
pub use keys::{derive_shared_secret, generate_key_pair, KeyAgreementScheme, KeyPair};
pub use protocol::{ChatMessage, RelayEvent};
pub use types::{DeviceKind, UserId};
