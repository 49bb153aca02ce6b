//! Wire-format stability tests.
//!
//! The chunk prefix and the `ERR` payload are bit-exact contracts with
//! standard OPC UA peers. These tests pin the exact byte sequences so any
//! accidental format change fails loudly.

use uatcp_proto::{
    builtin, header, AsymmetricSecurityHeader, ChunkHeader, ChunkType, ErrorMessage, MessageType,
    SequenceHeader, StatusCode, SymmetricSecurityHeader,
};

fn hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

#[test]
fn symmetric_chunk_prefix_layout() {
    // MSG + 'F' + size 24 + channel id 42 + token id 100 + sequence 1/7
    let mut buf = Vec::new();
    buf.extend_from_slice(&ChunkHeader::new(MessageType::SecureMessage, ChunkType::Final, 24).to_bytes());
    buf.extend_from_slice(&42u32.to_le_bytes());
    SymmetricSecurityHeader { token_id: 100 }.encode(&mut buf);
    SequenceHeader { sequence_number: 1, request_id: 7 }.encode(&mut buf);

    assert_eq!(buf.len(), ChunkHeader::SYMMETRIC_PREFIX + SequenceHeader::SIZE);
    assert_eq!(
        hex(&buf),
        concat!(
            "4d534746",         // "MSG" 'F'
            "18000000",         // size 24 LE
            "2a000000",         // channel id 42 LE
            "64000000",         // token id 100 LE
            "01000000",         // sequence number 1 LE
            "07000000",         // request id 7 LE
        )
    );

    assert_eq!(header::secure_channel_id(&buf).unwrap(), 42);
    assert_eq!(header::token_id(&buf).unwrap(), 100);
}

#[test]
fn open_chunk_prefix_layout() {
    let mut buf = Vec::new();
    buf.extend_from_slice(
        &ChunkHeader::new(MessageType::OpenSecureChannel, ChunkType::Final, 12).to_bytes(),
    );
    buf.extend_from_slice(&0u32.to_le_bytes());

    assert_eq!(hex(&buf), concat!("4f504e46", "0c000000", "00000000"));
}

#[test]
fn asymmetric_header_policy_none_layout() {
    let header = AsymmetricSecurityHeader {
        security_policy_uri: Some("http://opcfoundation.org/UA/SecurityPolicy#None".to_string()),
        sender_certificate: None,
        receiver_certificate_thumbprint: None,
    };

    let mut buf = Vec::new();
    header.encode(&mut buf);

    // 4-byte length (47) + URI bytes + two null byte strings (-1).
    assert_eq!(buf.len(), 4 + 47 + 4 + 4);
    assert_eq!(&buf[0..4], &47i32.to_le_bytes());
    assert_eq!(&buf[4..51], b"http://opcfoundation.org/UA/SecurityPolicy#None");
    assert_eq!(&buf[51..55], &(-1i32).to_le_bytes());
    assert_eq!(&buf[55..59], &(-1i32).to_le_bytes());
}

#[test]
fn error_payload_layout() {
    let message = ErrorMessage {
        error: StatusCode::BAD_SECURITY_CHECKS_FAILED,
        reason: Some("nope".to_string()),
    };

    let mut buf = Vec::new();
    message.encode(&mut buf);

    assert_eq!(hex(&buf), concat!("00001380", "04000000", "6e6f7065"));
}

#[test]
fn string_null_empty_and_value() {
    let mut buf = Vec::new();
    builtin::write_string(&mut buf, None);
    builtin::write_string(&mut buf, Some(""));
    builtin::write_string(&mut buf, Some("ab"));

    assert_eq!(hex(&buf), concat!("ffffffff", "00000000", "02000000", "6162"));
}
