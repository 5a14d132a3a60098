use std::fmt;

use zeroize::Zeroize;

/// This type contains a private key by value.
///
/// The private key must be DER-encoded PKCS#8.
#[derive(Clone, Eq, PartialEq)]
pub struct PrivateKey(pub Vec<u8>);

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// This type contains a single certificate by value.
///
/// The engine never looks inside these bytes: interpreting them is the
/// job of the certificate verifier.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Certificate(pub Vec<u8>);

impl AsRef<[u8]> for Certificate {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Certificate(")?;
        crate::msgs::base::hex(f, &self.0)?;
        write!(f, ")")
    }
}

/// A DER-encoded X.509 SubjectPublicKeyInfo, as produced by a certificate verifier.
#[derive(Clone, Eq, PartialEq)]
pub struct SubjectPublicKeyInfo(pub Vec<u8>);

impl fmt::Debug for SubjectPublicKeyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubjectPublicKeyInfo(")?;
        crate::msgs::base::hex(f, &self.0)?;
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_debug() {
        assert_eq!(
            "Certificate(6162)",
            format!("{:?}", Certificate(b"ab".to_vec()))
        );
    }

    #[test]
    fn private_key_debug_hides_contents() {
        assert_eq!(
            format!("{:?}", PrivateKey(vec![1, 2, 3])),
            "PrivateKey(..)"
        );
    }
}
