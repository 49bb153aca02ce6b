//! Driver integration test over an in-memory duplex transport.
//!
//! A scripted policy-None server runs on the other end of the pipe, built
//! from the same proto/chunk components, and the full client path is
//! exercised: handshake, request/response, clean close.

use std::sync::Arc;

use tokio::{
    io::{AsyncReadExt, DuplexStream},
    sync::oneshot,
};
use uatcp_channel::{
    channel::SecureChannel,
    chunks::{ChunkDecoder, ChunkEncoder, DecodeOutcome},
    crypto::SecurityPolicy,
    framing::FramingReader,
    handler::ChannelHandler,
    validator::InsecureValidator,
    ChannelConfig, ChannelContext, ChannelDriver, ChannelParameters, SystemEnv,
};
use uatcp_proto::{
    CborMessageCodec, ChannelSecurityToken, ChunkHeader, MessageSecurityMode, MessageType,
    OpenSecureChannelResponse, RequestHeader, RequestMessage, ResponseHeader, ResponseMessage,
    ServiceRequest, ServiceResponse, StatusCode,
};

const CHANNEL_ID: u32 = 42;
const TOKEN_ID: u32 = 100;

/// Minimal scripted server: answer the OPN, echo service requests, stop on
/// CLO or EOF.
async fn run_server(mut io: DuplexStream) {
    use tokio::io::AsyncWriteExt;

    let codec = CborMessageCodec;
    let encoder = ChunkEncoder::new(ChannelParameters::default());
    let decoder = ChunkDecoder::new();
    let mut framing = FramingReader::new(65_535);

    let mut channel = SecureChannel::new(SecurityPolicy::None, MessageSecurityMode::None);

    loop {
        let read = io.read_buf(framing.buffer_mut()).await.expect("server read");
        if read == 0 {
            return;
        }

        while let Some(chunk) = framing.next_chunk().expect("server framing") {
            let header = ChunkHeader::from_bytes(&chunk).expect("server header");
            match header.message_type().expect("validated") {
                MessageType::OpenSecureChannel => {
                    let DecodeOutcome::Message { .. } = decoder
                        .decode_asymmetric(&channel, vec![chunk])
                        .expect("server open decode")
                    else {
                        panic!("unexpected abort");
                    };

                    channel.install_security_token(
                        ChannelSecurityToken {
                            channel_id: CHANNEL_ID,
                            token_id: TOKEN_ID,
                            created_at: 0,
                            revised_lifetime: 600_000,
                        },
                        None,
                    );

                    let response = ResponseMessage::OpenSecureChannel(OpenSecureChannelResponse {
                        response_header: ResponseHeader {
                            timestamp: 0,
                            request_handle: 0,
                            service_result: StatusCode::GOOD,
                        },
                        server_protocol_version: 0,
                        security_token: ChannelSecurityToken {
                            channel_id: CHANNEL_ID,
                            token_id: TOKEN_ID,
                            created_at: 0,
                            revised_lifetime: 600_000,
                        },
                        server_nonce: vec![],
                    });
                    let mut body = Vec::new();
                    codec.encode_response(&response, &mut body).unwrap();
                    let chunks = encoder
                        .encode_asymmetric(&mut channel, 1, &body, MessageType::OpenSecureChannel)
                        .unwrap();
                    for chunk in chunks {
                        io.write_all(&chunk).await.expect("server write");
                    }
                    io.flush().await.expect("server flush");
                },
                MessageType::SecureMessage => {
                    let DecodeOutcome::Message { request_id, body } = decoder
                        .decode_symmetric(&channel, vec![chunk])
                        .expect("server msg decode")
                    else {
                        panic!("unexpected abort");
                    };

                    let RequestMessage::Service(request) =
                        codec.decode_request(&body).expect("server request decode")
                    else {
                        panic!("expected service request");
                    };

                    let response = ResponseMessage::Service(ServiceResponse {
                        response_header: ResponseHeader {
                            timestamp: 0,
                            request_handle: request.request_header.request_handle,
                            service_result: StatusCode::GOOD,
                        },
                        type_id: request.type_id,
                        body: request.body,
                    });
                    let mut body = Vec::new();
                    codec.encode_response(&response, &mut body).unwrap();
                    let chunks = encoder
                        .encode_symmetric(&mut channel, request_id, &body, MessageType::SecureMessage)
                        .unwrap();
                    for chunk in chunks {
                        io.write_all(&chunk).await.expect("server write");
                    }
                    io.flush().await.expect("server flush");
                },
                MessageType::CloseSecureChannel => return,
                MessageType::Error => panic!("client sent an error chunk"),
            }
        }
    }
}

#[tokio::test]
async fn handshake_request_and_close_over_duplex() {
    let (client_io, server_io) = tokio::io::duplex(256 * 1024);
    let server = tokio::spawn(run_server(server_io));

    let context = Arc::new(ChannelContext::new());
    let (handshake_tx, handshake_rx) = oneshot::channel();
    let handler = ChannelHandler::new(
        SystemEnv,
        CborMessageCodec,
        ChannelConfig::default(),
        Arc::clone(&context),
        Arc::new(InsecureValidator),
        SecureChannel::new(SecurityPolicy::None, MessageSecurityMode::None),
        handshake_tx,
    );

    let (handle, driver) = ChannelDriver::new(client_io, SystemEnv, handler, 65_535);
    let driver_task = tokio::spawn(driver.run());

    handshake_rx.await.expect("driver alive").expect("handshake must succeed");

    let request = RequestMessage::Service(ServiceRequest {
        request_header: RequestHeader { request_handle: 7, ..RequestHeader::new(0) },
        type_id: 99,
        body: vec![1, 2, 3],
    });
    let response = handle.send_request(request).await.expect("request must succeed");

    let ResponseMessage::Service(response) = response else { panic!("expected echo") };
    assert_eq!(response.response_header.request_handle, 7);
    assert_eq!(response.type_id, 99);
    assert_eq!(response.body, vec![1, 2, 3]);
    assert!(context.pending.is_empty());

    handle.close().await;
    driver_task.await.expect("driver task").expect("clean close");
    server.await.expect("server task");
}

#[tokio::test]
async fn dropping_every_handle_closes_the_channel() {
    let (client_io, server_io) = tokio::io::duplex(256 * 1024);
    let server = tokio::spawn(run_server(server_io));

    let context = Arc::new(ChannelContext::new());
    let (handshake_tx, handshake_rx) = oneshot::channel();
    let handler = ChannelHandler::new(
        SystemEnv,
        CborMessageCodec,
        ChannelConfig::default(),
        context,
        Arc::new(InsecureValidator),
        SecureChannel::new(SecurityPolicy::None, MessageSecurityMode::None),
        handshake_tx,
    );

    let (handle, driver) = ChannelDriver::new(client_io, SystemEnv, handler, 65_535);
    let driver_task = tokio::spawn(driver.run());

    handshake_rx.await.expect("driver alive").expect("handshake must succeed");
    drop(handle);

    driver_task.await.expect("driver task").expect("clean close");
    server.await.expect("server task");
}
