//! Wire framing (§4.8): `u32 length ‖ u8 opcode ‖ body`, where `body` is a
//! bincode-encoded [`Envelope`]. `length` is little-endian and counts the
//! opcode byte and the body together. The opcode is written alongside the
//! bincode-tagged enum
//! so a receiver can dispatch on it without decoding the full body first;
//! bincode still carries its own variant discriminant inside `body`; this
//! is one byte of redundancy in exchange for cheap prefix dispatch.

use std::io;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use vault_api_types::protocol::{Envelope, Opcode, RpcRequest, RpcResponse};

/// Largest frame body this codec will allocate for on read. Generous enough
/// for a `put_chunk` carrying one max-size sealed chunk plus overhead.
pub const MAX_FRAME_LEN: u32 = 8 * 1024 * 1024;

pub async fn write_request<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    envelope: &Envelope<RpcRequest>,
) -> io::Result<()> {
    write_frame(writer, envelope.body.opcode() as u8, envelope).await
}

pub async fn write_response<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    opcode: u8,
    envelope: &Envelope<RpcResponse>,
) -> io::Result<()> {
    write_frame(writer, opcode, envelope).await
}

async fn write_frame<W, T>(writer: &mut W, opcode: u8, body: &T) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let encoded = bincode::serialize(body)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    let len = 1u32 + encoded.len() as u32;
    writer.write_u32_le(len).await?;
    writer.write_u8(opcode).await?;
    writer.write_all(&encoded).await?;
    writer.flush().await
}

/// Read one frame, returning the opcode byte and the decoded body. Callers
/// pick the concrete type to decode into (`Envelope<RpcRequest>` on the
/// server side, `Envelope<RpcResponse>` on the client side).
pub async fn read_frame<R, T>(reader: &mut R) -> io::Result<Option<(u8, T)>>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32_le().await {
        Ok(len) => len,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    };
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} out of bounds"),
        ));
    }
    let opcode = reader.read_u8().await?;
    let mut body_buf = vec![0u8; (len - 1) as usize];
    reader.read_exact(&mut body_buf).await?;
    let body = bincode::deserialize(&body_buf)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    Ok(Some((opcode, body)))
}

/// Sanity check that an on-wire opcode byte matches what the decoded
/// envelope's request would itself report, guarding against the two tags
/// drifting apart.
pub fn opcode_matches(opcode: u8, request: &RpcRequest) -> bool {
    Opcode::from_u8(opcode).map(|op| op as u8) == Some(request.opcode() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_api_types::protocol::ProbeRequest;
    use vault_api_types::ChunkHash;

    #[tokio::test]
    async fn request_round_trips_through_the_wire_format() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let envelope = Envelope {
            request_id: 42,
            body: RpcRequest::Probe(ProbeRequest {
                hashes: vec![ChunkHash::new([1u8; 32])],
            }),
        };
        write_request(&mut client, &envelope).await.unwrap();

        let (opcode, decoded): (u8, Envelope<RpcRequest>) = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(opcode, Opcode::Probe as u8);
        assert_eq!(decoded.request_id, 42);
        assert!(opcode_matches(opcode, &decoded.body));
    }

    #[tokio::test]
    async fn eof_before_any_frame_returns_none() {
        let (client, mut server) = tokio::io::duplex(4096);
        drop(client);
        let result: Option<(u8, Envelope<RpcRequest>)> = read_frame(&mut server).await.unwrap();
        assert!(result.is_none());
    }
}
