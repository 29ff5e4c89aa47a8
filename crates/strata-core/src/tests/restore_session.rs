use crate::error::StrataError;
use crate::session::SessionResources;
use crate::testutil::{test_file_name, test_resources};
use crate::tests::helpers::{
    collect_restored_chunks, recv_msg, send_msg, spawn_chunk_download, spawn_recipe_download,
    upload_file,
};
use strata_protocol::{MessageKind, RecipeHead, MESSAGE_HEADER_SIZE, RECIPE_ENTRY_SIZE};
use strata_types::Fingerprint;

/// Fetch a file's plain recipe entries the way a restoring client would.
fn fetch_plain_recipe(resources: &SessionResources, client_id: u32, name: &str) -> Vec<u8> {
    let (mut client, handle) = spawn_recipe_download(resources, client_id, name);
    let mut buf = Vec::new();
    let response = recv_msg(&mut client, &mut buf);
    assert_eq!(response.kind, MessageKind::LoginResponse);
    let head = RecipeHead::decode(&buf[MESSAGE_HEADER_SIZE..]).unwrap();

    send_msg(&mut client, MessageKind::ClientReady, client_id, 0, &[]);
    let mut plain = Vec::new();
    loop {
        let header = recv_msg(&mut client, &mut buf);
        match header.kind {
            MessageKind::PlainRecipeStream => {
                plain.extend_from_slice(&buf[MESSAGE_HEADER_SIZE..]);
            }
            MessageKind::SecureRecipeStream | MessageKind::KeyRecipeStream => {}
            MessageKind::RecipeStreamEnd => break,
            other => panic!("unexpected message {other:?}"),
        }
        send_msg(&mut client, MessageKind::ClientReady, client_id, 0, &[]);
    }
    drop(client);
    handle.join().unwrap().unwrap();

    assert_eq!(plain.len() as u64, head.total_chunk_num * RECIPE_ENTRY_SIZE as u64);
    plain
}

#[test]
fn full_upload_then_restore_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let resources = test_resources(dir.path());
    let name = test_file_name(0x42);
    let chunk_a = vec![0x5Au8; 400];
    let chunk_b = vec![0x5Bu8; 222];
    let chunk_c = vec![0x5Cu8; 97];
    // Chunk three repeats chunk one, so the file has four logical chunks
    // over three unique ones.
    let logical: Vec<&[u8]> = vec![&chunk_a, &chunk_b, &chunk_a, &chunk_c];
    upload_file(&resources, 9, &name, &logical);

    let plain = fetch_plain_recipe(&resources, 9, &name);

    let (mut client, handle) = spawn_chunk_download(&resources, 9);
    let mut buf = Vec::new();
    assert_eq!(
        recv_msg(&mut client, &mut buf).kind,
        MessageKind::LoginResponse
    );
    send_msg(&mut client, MessageKind::ClientReady, 9, 0, &[]);
    send_msg(&mut client, MessageKind::ChunkRequest, 9, 4, &plain);
    let restored = collect_restored_chunks(&mut client);
    drop(client);
    handle.join().unwrap().unwrap();

    assert_eq!(restored, vec![chunk_a.clone(), chunk_b, chunk_a, chunk_c]);
}

#[test]
fn unknown_fingerprint_in_request_fails_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let resources = test_resources(dir.path());
    let ghost = Fingerprint::compute(b"nothing was ever uploaded");

    let (mut client, handle) = spawn_chunk_download(&resources, 10);
    let mut buf = Vec::new();
    assert_eq!(
        recv_msg(&mut client, &mut buf).kind,
        MessageKind::LoginResponse
    );
    send_msg(&mut client, MessageKind::ClientReady, 10, 0, &[]);
    send_msg(
        &mut client,
        MessageKind::ChunkRequest,
        10,
        1,
        ghost.as_bytes(),
    );

    let err = handle.join().unwrap().unwrap_err();
    assert!(matches!(err, StrataError::ChunkNotIndexed(f) if f == ghost));
}

#[test]
fn non_request_message_is_a_violation() {
    let dir = tempfile::tempdir().unwrap();
    let resources = test_resources(dir.path());

    let (mut client, handle) = spawn_chunk_download(&resources, 11);
    let mut buf = Vec::new();
    assert_eq!(
        recv_msg(&mut client, &mut buf).kind,
        MessageKind::LoginResponse
    );
    send_msg(&mut client, MessageKind::ClientReady, 11, 0, &[]);
    send_msg(&mut client, MessageKind::PlainRecipeBatch, 11, 1, &[0u8; 32]);

    let err = handle.join().unwrap().unwrap_err();
    assert!(matches!(err, StrataError::Protocol(_)));
}
