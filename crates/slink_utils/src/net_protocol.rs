//! Simple read/write protocol for slink messages across networks.
//! The first 4 bytes of any message is the size of the message (in big-endian order).
//! The rest of the message are the contents, which are serde-serialized json.

use std::io;

use serde_derive::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub mod auth;
pub mod invoke;

/// Largest message body a peer may announce. Anything bigger is treated as a protocol violation
/// rather than allocated.
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024;

/// Messages sent from a connecting service to a slink server.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello(auth::Hello),
    Proof(auth::ProofMessage),
    Invoke(invoke::Invocation),
}

/// Messages sent from a slink server to a connected service.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Challenge(auth::Challenge),
    AuthResult(auth::AuthResult),
    InvokeResult(invoke::InvokeResult),
}

/// Reads a message from a stream communicating with slink.
///
/// **Not** cancel-safe: a partially-read frame is lost if the future is dropped.
pub async fn async_read<R, T>(reader: &mut R) -> Result<T, io::Error>
where
    R: AsyncReadExt + Unpin,
    T: serde::de::DeserializeOwned,
{
    let mut msg_size_buf = [0; 4];
    reader.read_exact(&mut msg_size_buf).await?;
    let msg_size = u32::from_be_bytes(msg_size_buf);
    if msg_size > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message of {msg_size} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit"),
        ));
    }

    let mut msg_buf = vec![0; msg_size as usize];
    reader.read_exact(&mut msg_buf).await?;

    let msg = serde_json::from_slice(&msg_buf)?;
    Ok(msg)
}

/// Writes a message to a stream communicating with slink.
pub async fn async_write<W, T>(writer: &mut W, msg: &T) -> Result<(), io::Error>
where
    W: AsyncWriteExt + Unpin,
    T: serde::Serialize,
{
    let msg_json = serde_json::to_vec(msg)?;

    let msg_size = msg_json.len();
    if msg_size > MAX_MESSAGE_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("message of {msg_size} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit"),
        ));
    }
    let msg_size_buf = u32::to_be_bytes(msg_size as u32);

    let mut msg_buf = Vec::with_capacity(4 + msg_size);
    msg_buf.extend_from_slice(&msg_size_buf);
    msg_buf.extend_from_slice(&msg_json);
    writer.write_all(&msg_buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::io;

    use super::{
        async_read, async_write,
        auth::{AuthResult, Challenge, Hello, ProofMessage, RejectReason},
        ClientMessage, ServerMessage, MAX_MESSAGE_SIZE,
    };
    use crate::auth::{Nonce, Proof, NONCE_LEN, PROOF_LEN};

    #[tokio::test]
    async fn read_what_was_written() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let hello = ClientMessage::Hello(Hello {
            client_id: "svc-42".to_string(),
            requested_group: "slink".to_string(),
        });
        async_write(&mut client, &hello).await.unwrap();

        let read: ClientMessage = async_read(&mut server).await.unwrap();
        assert_eq!(read, hello);
    }

    #[tokio::test]
    async fn reject_oversized_frame() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        tokio::io::AsyncWriteExt::write_all(&mut client, &(MAX_MESSAGE_SIZE + 1).to_be_bytes())
            .await
            .unwrap();

        let result: io::Result<ClientMessage> = async_read(&mut server).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn reject_truncated_frame() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        tokio::io::AsyncWriteExt::write_all(&mut client, &10u32.to_be_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, b"{}")
            .await
            .unwrap();
        drop(client);

        let result: io::Result<ClientMessage> = async_read(&mut server).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn wire_format_is_stable() {
        insta::assert_json_snapshot!(
            ClientMessage::Hello(Hello {
                client_id: "svc-42".to_string(),
                requested_group: "slink".to_string(),
            }),
            @r###"
        {
          "type": "hello",
          "client_id": "svc-42",
          "requested_group": "slink"
        }
        "###
        );

        insta::assert_json_snapshot!(
            ServerMessage::AuthResult(AuthResult::Accepted),
            @r###"
        {
          "type": "auth_result",
          "outcome": "accepted"
        }
        "###
        );

        insta::assert_json_snapshot!(
            ServerMessage::AuthResult(AuthResult::Rejected {
                reason: RejectReason::GroupNotFound
            }),
            @r###"
        {
          "type": "auth_result",
          "outcome": "rejected",
          "reason": "group_not_found"
        }
        "###
        );
    }

    #[test]
    fn hello_missing_fields_decodes_as_empty() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"hello"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Hello(Hello {
                client_id: String::new(),
                requested_group: String::new(),
            })
        );
    }

    #[test]
    fn challenge_and_proof_carry_raw_bytes() {
        let challenge = ServerMessage::Challenge(Challenge {
            nonce: Nonce::from_bytes([1; NONCE_LEN]),
        });
        let json = serde_json::to_value(&challenge).unwrap();
        assert_eq!(json["nonce"].as_array().unwrap().len(), NONCE_LEN);

        let proof = ClientMessage::Proof(ProofMessage {
            proof: Proof::from_bytes([2; PROOF_LEN]),
        });
        let json = serde_json::to_value(&proof).unwrap();
        assert_eq!(json["proof"].as_array().unwrap().len(), PROOF_LEN);
    }
}
