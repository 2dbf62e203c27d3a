pub mod field_cipher;
pub mod object_store;

pub use field_cipher::{AesGcmCipher, EncryptionKey};
pub use object_store::SignedUrlObjectStore;
