use crate::engine::auth::manager::{AuthManager, answer_prompt, hash_password};

#[test]
fn test_digest_is_sha512_base64() {
    let digest = hash_password("geheim");
    // SHA-512 is 64 bytes; base64 of that is 88 characters
    assert_eq!(digest.len(), 88);
    assert_eq!(digest, hash_password("geheim"));
    assert_ne!(digest, hash_password("anders"));
}

#[test]
fn test_verify_known_user() {
    let mgr = AuthManager::for_tests(&[("ada", "pass1"), ("bob", "pass2")]);
    assert!(mgr.verify("ada", &hash_password("pass1")));
    assert!(!mgr.verify("ada", &hash_password("pass2")));
    assert!(!mgr.verify("eve", &hash_password("pass1")));
}

#[test]
fn test_client_prompt_answers() {
    assert_eq!(answer_prompt("login:", "ada", "pw"), "ada");
    assert_eq!(answer_prompt("password:", "ada", "pw"), hash_password("pw"));
    assert_eq!(answer_prompt("favorite color:", "ada", "pw"), "Unknown request");
}

#[tokio::test]
async fn test_challenge_sequence_over_a_duplex_stream() {
    use crate::shared::protocol::messages::{
        ClientRequest, ServerResponse, read_frame, write_frame,
    };

    let (mut client, mut server) = tokio::io::duplex(4096);
    let mgr = AuthManager::for_tests(&[("ada", "pw")]);

    let server_task = tokio::spawn(async move { mgr.authenticate(&mut server).await });

    // the client answers whatever prompts arrive
    loop {
        match read_frame::<_, ServerResponse>(&mut client).await.unwrap() {
            Some(ServerResponse::SecurityMessage { prompt, .. }) => {
                let response = answer_prompt(&prompt, "ada", "pw");
                write_frame(
                    &mut client,
                    &ClientRequest::SecurityMessageResponse { response },
                )
                .await
                .unwrap();
            }
            Some(ServerResponse::NewClientComplete { authenticated }) => {
                assert!(authenticated);
                break;
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
    assert!(server_task.await.unwrap().unwrap());
}

#[tokio::test]
async fn test_wrong_password_fails_exchange() {
    use crate::shared::protocol::messages::{
        ClientRequest, ServerResponse, read_frame, write_frame,
    };

    let (mut client, mut server) = tokio::io::duplex(4096);
    let mgr = AuthManager::for_tests(&[("ada", "pw")]);
    let server_task = tokio::spawn(async move { mgr.authenticate(&mut server).await });

    loop {
        match read_frame::<_, ServerResponse>(&mut client).await.unwrap() {
            Some(ServerResponse::SecurityMessage { prompt, .. }) => {
                let response = answer_prompt(&prompt, "ada", "fout");
                write_frame(
                    &mut client,
                    &ClientRequest::SecurityMessageResponse { response },
                )
                .await
                .unwrap();
            }
            Some(ServerResponse::NewClientComplete { authenticated }) => {
                assert!(!authenticated);
                break;
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
    assert!(!server_task.await.unwrap().unwrap());
}
