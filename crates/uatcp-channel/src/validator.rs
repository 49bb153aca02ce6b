//! Certificate validation seam.
//!
//! Certificate trust decisions belong to the application, not the channel
//! core. The handshake controller decodes the server's DER chain out of the
//! asymmetric security header and hands it to a [`CertificateValidator`];
//! any rejection aborts the handshake.

use crate::error::ChannelError;

/// Validates the server certificate chain during the handshake.
pub trait CertificateValidator: Send + Sync + 'static {
    /// Validate a single DER-encoded certificate.
    ///
    /// # Errors
    ///
    /// Implementations reject with [`ChannelError::CertificateRejected`].
    fn validate(&self, certificate: &[u8]) -> Result<(), ChannelError>;

    /// Verify the trust chain, leaf first.
    ///
    /// # Errors
    ///
    /// Implementations reject with [`ChannelError::CertificateRejected`].
    fn verify_trust_chain(&self, chain: &[Vec<u8>]) -> Result<(), ChannelError>;
}

/// A validator that accepts every certificate.
///
/// Useful for tests and for policy `None` deployments where no certificates
/// are exchanged at all. Do not use against untrusted networks.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsecureValidator;

impl CertificateValidator for InsecureValidator {
    fn validate(&self, _certificate: &[u8]) -> Result<(), ChannelError> {
        Ok(())
    }

    fn verify_trust_chain(&self, _chain: &[Vec<u8>]) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Split a concatenation of DER certificates into individual certificates.
///
/// The sender certificate field of the asymmetric security header carries the
/// whole chain as back-to-back DER SEQUENCEs; this walks the outer TLV
/// structure without interpreting the certificate contents.
///
/// # Errors
///
/// Returns [`ChannelError::CertificateRejected`] if the bytes are not a valid
/// sequence of DER TLVs.
pub fn split_certificate_chain(bytes: &[u8]) -> Result<Vec<Vec<u8>>, ChannelError> {
    let mut chain = Vec::new();
    let mut rest = bytes;

    while !rest.is_empty() {
        let total = der_tlv_len(rest)?;
        chain.push(rest[..total].to_vec());
        rest = &rest[total..];
    }

    if chain.is_empty() {
        return Err(ChannelError::CertificateRejected {
            reason: "empty certificate chain".to_string(),
        });
    }

    Ok(chain)
}

/// Total length (tag + length bytes + content) of the DER TLV at the start of
/// `bytes`. The tag must be SEQUENCE (0x30), as every X.509 certificate is.
fn der_tlv_len(bytes: &[u8]) -> Result<usize, ChannelError> {
    let reject = |reason: &str| ChannelError::CertificateRejected { reason: reason.to_string() };

    if bytes.len() < 2 {
        return Err(reject("truncated DER header"));
    }
    if bytes[0] != 0x30 {
        return Err(reject("certificate does not start with a DER SEQUENCE"));
    }

    let first = bytes[1];
    let (header_len, content_len) = if first & 0x80 == 0 {
        (2, first as usize)
    } else {
        let num_len_bytes = (first & 0x7F) as usize;
        if num_len_bytes == 0 || num_len_bytes > 4 {
            return Err(reject("unsupported DER length encoding"));
        }
        if bytes.len() < 2 + num_len_bytes {
            return Err(reject("truncated DER length"));
        }
        let mut len = 0usize;
        for &b in &bytes[2..2 + num_len_bytes] {
            len = (len << 8) | b as usize;
        }
        (2 + num_len_bytes, len)
    };

    let total = header_len
        .checked_add(content_len)
        .ok_or_else(|| reject("DER length overflow"))?;
    if bytes.len() < total {
        return Err(reject("truncated DER content"));
    }

    Ok(total)
}
