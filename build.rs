#[cfg(feature = "validate")]
use std::env;

fn main() {
    // RSA-PSS verification relies on the OpenSSL 3 EVP interface.
    #[cfg(feature = "validate")]
    if let Ok(raw) = env::var("DEP_OPENSSL_VERSION_NUMBER") {
        let version = u64::from_str_radix(&raw, 16).unwrap_or_default();

        assert!(
            version >= 0x3000_0000,
            "dcc-decode needs OpenSSL >= 3 for PS256 verification (found {raw})"
        );
    }
}
