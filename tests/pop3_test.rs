//! End-to-end POP3 tests against a real server on ephemeral ports.

mod common;

use common::ServerBuilder;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn greeting_auth_and_stat() {
    let server = ServerBuilder::new()
        .user("alice", "secret")
        .mail("alice", "m1", &[b'x'; 10])
        .mail("alice", "m2", &[b'y'; 20])
        .start()
        .await;

    let mut client = server.pop_client().await;
    assert_eq!(client.line().await, "+OK POP3 server ready");
    client.expect("USER alice", "+OK").await;
    client.expect("PASS secret", "+OK Logged in").await;
    client.expect("STAT", "+OK 2 30").await;
    client.expect("QUIT", "+OK Bye!").await;
    assert!(client.closed().await);
}

#[tokio::test]
async fn dele_then_rset_then_quit_removes_nothing() {
    let server = ServerBuilder::new()
        .user("alice", "secret")
        .mail("alice", "m1", &[b'x'; 10])
        .mail("alice", "m2", &[b'y'; 20])
        .start()
        .await;

    let mut client = server.pop_client().await;
    client.line().await;
    client.expect("USER alice", "+OK").await;
    client.expect("PASS secret", "+OK Logged in").await;

    client.send("DELE 1").await;
    assert!(client.line().await.starts_with("+OK"));
    client.expect("STAT", "+OK 1 20").await;
    client.expect("RSET", "+OK Reversed deletes").await;
    client.expect("STAT", "+OK 2 30").await;
    client.expect("QUIT", "+OK Bye!").await;
    assert!(client.closed().await);

    assert!(server.cur_path("alice", "m1:2,S").exists());
    assert!(server.cur_path("alice", "m2:2,S").exists());
}

#[tokio::test]
async fn quit_commits_pending_deletes() {
    let server = ServerBuilder::new()
        .user("alice", "secret")
        .mail("alice", "m1", b"one")
        .mail("alice", "m2", b"two")
        .start()
        .await;

    let mut client = server.pop_client().await;
    client.line().await;
    client.expect("USER alice", "+OK").await;
    client.expect("PASS secret", "+OK Logged in").await;
    client.send("DELE 2").await;
    assert!(client.line().await.starts_with("+OK"));
    client.expect("QUIT", "+OK Bye!").await;
    assert!(client.closed().await);

    assert!(server.cur_path("alice", "m1:2,S").exists());
    assert!(!server.cur_path("alice", "m2:2,S").exists());
}

#[tokio::test]
async fn dropped_connection_reverts_deletes_and_releases_lock() {
    let server = ServerBuilder::new()
        .user("alice", "secret")
        .mail("alice", "m1", b"one")
        .start()
        .await;

    let mut client = server.pop_client().await;
    client.line().await;
    client.expect("USER alice", "+OK").await;
    client.expect("PASS secret", "+OK Logged in").await;
    client.send("DELE 1").await;
    assert!(client.line().await.starts_with("+OK"));
    drop(client);

    // The server notices the disconnect asynchronously.
    let mut retries = 0;
    loop {
        let mut probe = server.pop_client().await;
        probe.line().await;
        probe.expect("USER alice", "+OK").await;
        probe.send("PASS secret").await;
        let response = probe.line().await;
        if response == "+OK Logged in" {
            break;
        }
        assert_eq!(response, "-ERR User mailbox in use");
        retries += 1;
        assert!(retries < 50, "lock never released");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // No UPDATE ran, so the delete was reverted.
    assert!(server.cur_path("alice", "m1:2,S").exists());
}

#[tokio::test]
async fn second_session_is_locked_out() {
    let server = ServerBuilder::new().user("alice", "secret").start().await;

    let mut first = server.pop_client().await;
    first.line().await;
    first.expect("USER alice", "+OK").await;
    first.expect("PASS secret", "+OK Logged in").await;

    let mut second = server.pop_client().await;
    second.line().await;
    second.expect("USER alice", "+OK").await;
    second
        .expect("PASS secret", "-ERR User mailbox in use")
        .await;

    // The refused session can still quit cleanly.
    second.expect("QUIT", "+OK Bye!").await;
}

#[tokio::test]
async fn list_and_uidl_listings() {
    let server = ServerBuilder::new()
        .user("alice", "secret")
        .mail("alice", "aaa", &[b'x'; 5])
        .mail("alice", "bbb", &[b'y'; 7])
        .start()
        .await;

    let mut client = server.pop_client().await;
    client.line().await;
    client.expect("USER alice", "+OK").await;
    client.expect("PASS secret", "+OK Logged in").await;

    client.send("LIST").await;
    assert_eq!(client.line().await, "+OK 2 messages (12 octets)");
    assert_eq!(client.read_until_dot().await, vec!["1 5", "2 7"]);

    client.expect("LIST 2", "+OK 2 7").await;

    client.send("UIDL").await;
    assert_eq!(client.line().await, "+OK");
    assert_eq!(client.read_until_dot().await, vec!["1 aaa", "2 bbb"]);

    client.expect("UIDL 1", "+OK 1 aaa").await;
}

#[tokio::test]
async fn retr_streams_dot_stuffed_body() {
    let server = ServerBuilder::new()
        .user("alice", "secret")
        .mail("alice", "m1", b".leading dot\nplain line\n")
        .start()
        .await;

    let mut client = server.pop_client().await;
    client.line().await;
    client.expect("USER alice", "+OK").await;
    client.expect("PASS secret", "+OK Logged in").await;

    client.send("RETR 1").await;
    assert_eq!(client.line().await, "+OK");
    let body = client.read_body().await;
    assert_eq!(body, b"..leading dot\r\nplain line\r\n");

    // The session is still usable after streaming.
    client.expect("NOOP", "+OK Waiting for something to happen...").await;
}

#[tokio::test]
async fn retr_does_not_block_other_clients() {
    // A transformer that sleeps before producing the body keeps the
    // first client's RETR in flight while the second client talks.
    let scripts = tempfile::tempdir().unwrap();
    let script = scripts.path().join("slowcat");
    std::fs::write(&script, "#!/bin/sh\nsleep 1\nexec cat\n").unwrap();
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let server = ServerBuilder::new()
        .user("alice", "secret")
        .user("bob", "hunter2")
        .mail("alice", "big", &[b'x'; 2000])
        .transformer(script.to_str().unwrap())
        .start()
        .await;

    let mut retriever = server.pop_client().await;
    retriever.line().await;
    retriever.expect("USER alice", "+OK").await;
    retriever.expect("PASS secret", "+OK Logged in").await;
    retriever.send("RETR 1").await;

    // While the body is held up, a second client gets served fast.
    let mut other = server.pop_client().await;
    other.line().await;
    other.expect("USER bob", "+OK").await;
    other.expect("PASS hunter2", "+OK Logged in").await;
    for _ in 0..3 {
        other.send("NOOP").await;
        let reply = timeout(Duration::from_millis(500), other.line())
            .await
            .expect("NOOP reply delayed by concurrent RETR");
        assert_eq!(reply, "+OK Waiting for something to happen...");
    }

    assert_eq!(retriever.line().await, "+OK");
    let body = retriever.read_body().await;
    assert_eq!(body.len(), 2000, "body intact with exactly one terminator");
    assert!(body.iter().all(|&b| b == b'x'));
}

#[tokio::test]
async fn oversized_command_line_drops_the_connection() {
    let server = ServerBuilder::new().user("alice", "secret").start().await;

    let mut client = server.pop_client().await;
    client.line().await;
    client.send_raw(&[b'a'; 2048]).await;
    assert!(client.closed().await, "expected error close");
}

#[tokio::test]
async fn pipelined_commands_answer_in_order() {
    let server = ServerBuilder::new()
        .user("alice", "secret")
        .mail("alice", "m1", b"x")
        .start()
        .await;

    let mut client = server.pop_client().await;
    client.line().await;
    client
        .send_raw(b"USER alice\r\nPASS secret\r\nSTAT\r\n")
        .await;
    assert_eq!(client.line().await, "+OK");
    assert_eq!(client.line().await, "+OK Logged in");
    assert_eq!(client.line().await, "+OK 1 1");
}

#[tokio::test]
async fn input_after_quit_is_ignored() {
    let server = ServerBuilder::new().user("alice", "secret").start().await;

    let mut client = server.pop_client().await;
    client.line().await;
    client.send_raw(b"QUIT\r\nNOOP\r\n").await;
    assert_eq!(client.line().await, "+OK Bye!");
    assert!(client.closed().await);
}

#[tokio::test]
async fn auth_failures_keep_the_connection_open() {
    let server = ServerBuilder::new().user("alice", "secret").start().await;

    let mut client = server.pop_client().await;
    client.line().await;
    client.expect("STAT", "-ERR Invalid command").await;
    client.expect("USER alice", "+OK").await;
    client.expect("NOOP", "-ERR Expected PASS command").await;
    client.expect("PASS wrong", "-ERR Invalid credentials").await;
    client.expect("USER alice", "+OK").await;
    client.expect("PASS secret", "+OK Logged in").await;
}

#[tokio::test]
async fn statistics_track_connections_and_bytes() {
    let server = ServerBuilder::new().user("alice", "secret").start().await;

    let mut client = server.pop_client().await;
    client.line().await;
    client.expect("QUIT", "+OK Bye!").await;
    assert!(client.closed().await);

    // Disconnect bookkeeping runs in the connection task; wait for it.
    let mut retries = 0;
    loop {
        let counters = popd::lock_state(&server.state).stats.snapshot();
        if counters.current_connections == 0 {
            assert_eq!(counters.historic_connections, 1);
            assert!(counters.transferred_bytes > 0);
            break;
        }
        retries += 1;
        assert!(retries < 100, "disconnect never recorded");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
