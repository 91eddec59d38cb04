//! The `import` statement's external collaborators: fetches a module by
//! URL, verifies its contents against the supplied hash.
//!
//! Shaped as a pair of small traits so an embedder supplies the transport
//! (HTTP fetch) and the verifier (content hash) without the evaluator
//! depending on a concrete HTTP client beyond what `sandbox.rs` already
//! uses for the `http` permission category.

use sha2::{Digest, Sha256};

use crate::error::{Error, RuntimeErrorKind};

/// Fetches a module's source bytes from a URL. The embedder's transport of
/// choice; `sandbox.rs`'s `ureq`-backed HTTP client is the natural default
/// but is not wired in here to keep this crate's core free of a mandatory
/// network dependency for embedders that load modules from elsewhere
/// (bundled strings, a local cache).
pub trait ModuleFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, Error>;
}

/// Verifies fetched bytes against the hash literal the import statement
/// names.
pub trait HashVerifier: Send + Sync {
    fn verify(&self, bytes: &[u8], expected_hash: &str) -> Result<(), Error>;
}

/// The default verifier: SHA-256, hex-encoded, matching the hash literal
/// case-insensitively.
pub struct Sha256HexVerifier;

impl HashVerifier for Sha256HexVerifier {
    fn verify(&self, bytes: &[u8], expected_hash: &str) -> Result<(), Error> {
        let digest = sha256_hex(bytes);
        if digest.eq_ignore_ascii_case(expected_hash) {
            Ok(())
        } else {
            Err(Error::runtime(
                None,
                RuntimeErrorKind::HashMismatch(expected_hash.to_string()),
            ))
        }
    }
}

/// A fetcher that always fails; the safe default when an embedder hasn't
/// wired one in — import transport is an external collaborator, not
/// something the core may assume exists.
pub struct UnconfiguredFetcher;

impl ModuleFetcher for UnconfiguredFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, Error> {
        Err(Error::runtime(
            None,
            RuntimeErrorKind::ImportFailed(format!("no module fetcher configured for {url}")),
        ))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_string_matches_known_digest() {
        let digest = sha256_hex(b"");
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn verifier_is_case_insensitive() {
        let verifier = Sha256HexVerifier;
        let digest = sha256_hex(b"hello");
        assert!(verifier.verify(b"hello", &digest.to_uppercase()).is_ok());
    }

    #[test]
    fn verifier_rejects_mismatched_hash() {
        let verifier = Sha256HexVerifier;
        assert!(verifier.verify(b"hello", "0000").is_err());
    }

    #[test]
    fn unconfigured_fetcher_always_fails() {
        assert!(UnconfiguredFetcher.fetch("https://example.com/mod.ps").is_err());
    }
}
