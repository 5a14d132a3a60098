use std::fmt::Debug;

use crate::client::ServerName;
use crate::crypto::SignatureVerifier;
use crate::enums::SignatureScheme;
use crate::error::{CertificateError, Error, PeerMisbehaved};
use crate::key::{Certificate, SubjectPublicKeyInfo};
use crate::msgs::handshake::{DigitallySignedStruct, DistinguishedName};

// Marker types.  These are used to bind the fact some verification
// (certificate chain or handshake signature) has taken place into
// protocol states.  We use this to have the compiler check that there
// are no 'goto fail'-style elisions of important checks before we
// reach the traffic stage.
//
// The certificate markers also carry the public key the verifier
// extracted, which is all the engine needs from a certificate.

/// Zero-sized marker type representing verification of a signature.
#[derive(Debug)]
pub(crate) struct HandshakeSignatureValid(());

impl HandshakeSignatureValid {
    pub(crate) fn assertion() -> Self {
        Self(())
    }
}

#[derive(Debug)]
pub(crate) struct FinishedMessageVerified(());

impl FinishedMessageVerified {
    pub(crate) fn assertion() -> Self {
        Self(())
    }
}

/// Evidence that a server's certificate chain was accepted.
#[derive(Debug)]
pub struct ServerCertVerified(SubjectPublicKeyInfo);

impl ServerCertVerified {
    /// Make a `ServerCertVerified` carrying the end-entity certificate's
    /// public key.
    pub fn assertion(public_key: SubjectPublicKeyInfo) -> Self {
        Self(public_key)
    }

    /// The public key that handshake signatures must verify under.
    pub fn public_key(&self) -> &SubjectPublicKeyInfo {
        &self.0
    }
}

/// Evidence that a client's certificate chain was accepted.
#[derive(Debug)]
pub struct ClientCertVerified(SubjectPublicKeyInfo);

impl ClientCertVerified {
    /// Make a `ClientCertVerified` carrying the end-entity certificate's
    /// public key.
    pub fn assertion(public_key: SubjectPublicKeyInfo) -> Self {
        Self(public_key)
    }

    /// The public key that the client's CertificateVerify must verify under.
    pub fn public_key(&self) -> &SubjectPublicKeyInfo {
        &self.0
    }
}

/// Something that can verify a server certificate chain.
///
/// The engine never parses certificates itself: a verifier decides whether
/// the chain is acceptable for `server_name` and hands back the end-entity
/// public key, which the engine then uses to check handshake signatures.
pub trait ServerCertVerifier: Debug + Send + Sync {
    /// Verify the end-entity certificate `end_entity` is valid for
    /// `server_name` and chains to something trusted.
    ///
    /// `intermediates` contains all certificates other than `end_entity` that
    /// were sent as part of the server's Certificate message, in the
    /// order the server sent them.  `ocsp_response` is empty if no OCSP
    /// response was received.
    ///
    /// Certificates that cannot be decoded should be reported as
    /// [`CertificateError::BadEncoding`].
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        server_name: &ServerName,
        ocsp_response: &[u8],
    ) -> Result<ServerCertVerified, Error>;
}

/// Something that can verify a client certificate chain.
pub trait ClientCertVerifier: Debug + Send + Sync {
    /// Returns `true` to enable the server to request a client certificate and
    /// `false` to skip requesting a client certificate.  Defaults to `true`.
    fn offer_client_auth(&self) -> bool {
        true
    }

    /// Return `true` to require a client certificate and `false` to make
    /// client authentication optional.  Defaults to `self.offer_client_auth()`.
    fn client_auth_mandatory(&self) -> bool {
        self.offer_client_auth()
    }

    /// Returns the subject names of the client authentication trust anchors
    /// to share with the client when requesting client authentication.
    fn root_hint_subjects(&self) -> &[DistinguishedName];

    /// Verify the end-entity certificate `end_entity` is valid, acceptable,
    /// and chains to at least one of the trust anchors trusted by
    /// this verifier.
    ///
    /// `intermediates` contains the intermediate certificates the
    /// client sent along with the end-entity certificate; it is in the same
    /// order that the peer sent them and may be empty.
    fn verify_client_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
    ) -> Result<ClientCertVerified, Error>;
}

/// Turns off client authentication.
#[derive(Debug)]
pub struct NoClientAuth;

impl ClientCertVerifier for NoClientAuth {
    fn offer_client_auth(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
    ) -> Result<ClientCertVerified, Error> {
        Err(Error::General("client authentication not offered".into()))
    }
}

/// A verifier that accepts exactly the end-entity certificates it was
/// given, ignoring names and intermediates.
///
/// This works for either side: as a [`ServerCertVerifier`] it pins the
/// server's certificate, as a [`ClientCertVerifier`] it pins the client's.
#[derive(Debug, Clone)]
pub struct PinnedCertVerifier {
    pinned: Vec<(Certificate, SubjectPublicKeyInfo)>,
    mandatory: bool,
    subjects: Vec<DistinguishedName>,
}

impl PinnedCertVerifier {
    /// Trust `cert`, whose public key is `public_key`.
    pub fn new(cert: Certificate, public_key: SubjectPublicKeyInfo) -> Self {
        Self {
            pinned: vec![(cert, public_key)],
            mandatory: true,
            subjects: Vec::new(),
        }
    }

    /// Also trust `cert`.
    pub fn with(mut self, cert: Certificate, public_key: SubjectPublicKeyInfo) -> Self {
        self.pinned.push((cert, public_key));
        self
    }

    /// When used for client authentication, let clients without a
    /// certificate proceed unauthenticated.
    pub fn allow_unauthenticated(mut self) -> Self {
        self.mandatory = false;
        self
    }

    /// The DER subject names to send in a CertificateRequest.
    pub fn with_root_hint_subjects(mut self, subjects: Vec<Vec<u8>>) -> Self {
        self.subjects = subjects
            .into_iter()
            .map(DistinguishedName::from)
            .collect();
        self
    }

    fn find(&self, end_entity: &Certificate) -> Result<SubjectPublicKeyInfo, Error> {
        self.pinned
            .iter()
            .find(|(cert, _)| cert == end_entity)
            .map(|(_, spki)| spki.clone())
            .ok_or(Error::InvalidCertificate(CertificateError::UnknownIssuer))
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _ocsp_response: &[u8],
    ) -> Result<ServerCertVerified, Error> {
        self.find(end_entity)
            .map(ServerCertVerified::assertion)
    }
}

impl ClientCertVerifier for PinnedCertVerifier {
    fn client_auth_mandatory(&self) -> bool {
        self.mandatory
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &self.subjects
    }

    fn verify_client_cert(
        &self,
        end_entity: &Certificate,
        _intermediates: &[Certificate],
    ) -> Result<ClientCertVerified, Error> {
        self.find(end_entity)
            .map(ClientCertVerified::assertion)
    }
}

/// Check a TLS1.2 ServerKeyExchange or CertificateVerify signature.
///
/// The peer may only use a scheme we advertised.
pub(crate) fn verify_tls12_signature(
    verifier: &dyn SignatureVerifier,
    advertised: &[SignatureScheme],
    public_key: &SubjectPublicKeyInfo,
    message: &[u8],
    dss: &DigitallySignedStruct,
) -> Result<HandshakeSignatureValid, Error> {
    if !advertised.contains(&dss.scheme) {
        return Err(PeerMisbehaved::SignedHandshakeWithUnadvertisedSigScheme.into());
    }

    verifier.verify(public_key, dss.scheme, message, dss.signature())?;
    Ok(HandshakeSignatureValid::assertion())
}

/// Check a TLS1.3 CertificateVerify signature.
///
/// As well as being advertised, the scheme must be one TLS1.3 allows:
/// no PKCS#1 v1.5 and no SHA-1.
pub(crate) fn verify_tls13_signature(
    verifier: &dyn SignatureVerifier,
    advertised: &[SignatureScheme],
    public_key: &SubjectPublicKeyInfo,
    message: &[u8],
    dss: &DigitallySignedStruct,
) -> Result<HandshakeSignatureValid, Error> {
    if !dss.scheme.supported_in_tls13() {
        return Err(PeerMisbehaved::SignedHandshakeWithUnadvertisedSigScheme.into());
    }

    verify_tls12_signature(verifier, advertised, public_key, message, dss)
}
