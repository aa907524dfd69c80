/// Cryptographic building blocks for label tables.
///
/// - `kdf`: keyed BLAKE2b label derivation
/// - `aead`: XChaCha20-Poly1305 sealing of one label under another
/// - `sensitive`: zeroizing secret and label types
pub mod aead;
pub mod kdf;
pub mod sensitive;
