use crate::shared::protocol::messages::{
    ChunkPayload, ClientRequest, QueryLanguage, read_frame, write_frame,
};

#[tokio::test]
async fn test_frame_roundtrip() {
    let msg = ClientRequest::PrepareQuery {
        query_string: "scan(A)".to_string(),
        language: QueryLanguage::Afl,
    };
    let mut buf = Vec::new();
    write_frame(&mut buf, &msg).await.unwrap();

    let mut reader = std::io::Cursor::new(buf);
    let back: ClientRequest = read_frame(&mut reader).await.unwrap().unwrap();
    match back {
        ClientRequest::PrepareQuery { query_string, .. } => {
            assert_eq!(query_string, "scan(A)");
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[tokio::test]
async fn test_read_frame_clean_eof() {
    let mut reader = std::io::Cursor::new(Vec::<u8>::new());
    let got: Option<ClientRequest> = read_frame(&mut reader).await.unwrap();
    assert!(got.is_none());
}

#[tokio::test]
async fn test_read_frame_rejects_oversized() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&u32::MAX.to_le_bytes());
    let mut reader = std::io::Cursor::new(buf);
    let got: std::io::Result<Option<ClientRequest>> = read_frame(&mut reader).await;
    assert!(got.is_err());
}

#[test]
fn test_chunk_payload_checksum() {
    let payload = vec![1u8, 2, 3, 4];
    let chunk = ChunkPayload {
        array_id: 7,
        attribute_id: 0,
        coordinates: vec![0],
        compression_method: 0,
        decompressed_size: 4,
        checksum: crc32fast::hash(&payload),
        payload,
        eof: false,
        warnings: Vec::new(),
    };
    assert!(chunk.verify_checksum());

    let mut corrupted = chunk.clone();
    corrupted.payload[0] ^= 0xFF;
    assert!(!corrupted.verify_checksum());

    // EOF markers carry no payload and always verify
    assert!(ChunkPayload::eof_marker(7).verify_checksum());
}
