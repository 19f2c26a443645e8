//! End-to-end scenarios against a mock server.
//!
//! Each test drives a fresh client against a [`MockTransport`] playing the
//! server side: it asserts on the exact frames the client puts on the wire
//! and feeds back the server's replies, including connection drops.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use worksync_client::{
    ClientConfig, ClientError, ConnectionState, FileSystemClient, MockTransport, StateSubscription,
};
use worksync_types::{Command, FileEvent, Handle};

const URL: &str = "ws://localhost:8080/ws";

fn new_client() -> (Arc<FileSystemClient<MockTransport>>, MockTransport) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let transport = MockTransport::new();
    let client = Arc::new(FileSystemClient::new(
        ClientConfig::new(URL),
        transport.clone(),
    ));
    (client, transport)
}

/// Records every state-listener invocation and lets tests await transitions.
struct StateProbe {
    seen: Arc<Mutex<Vec<ConnectionState>>>,
    rx: mpsc::UnboundedReceiver<ConnectionState>,
    _subscription: StateSubscription,
}

impl StateProbe {
    fn attach(client: &FileSystemClient<MockTransport>) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = {
            let seen = Arc::clone(&seen);
            client.on_state_change(move |state| {
                seen.lock().unwrap().push(state);
                let _ = tx.send(state);
            })
        };
        Self {
            seen,
            rx,
            _subscription: subscription,
        }
    }

    async fn wait_for(&mut self, target: ConnectionState) {
        while let Some(state) = self.rx.recv().await {
            if state == target {
                return;
            }
        }
        panic!("state stream ended before reaching {target}");
    }

    fn history(&self) -> Vec<ConnectionState> {
        self.seen.lock().unwrap().clone()
    }
}

fn parse_command(frame: &str) -> Command {
    Command::from_text(frame).expect("client sent an undecodable frame")
}

// S1: a commit round-trip over a fresh connection.
#[tokio::test]
async fn commit_round_trip() {
    let (client, transport) = new_client();

    let (result, _) = tokio::join!(client.commit("Test commit message"), async {
        transport.wait_for_frames(1).await;
        transport.queue_event(r#"{"type":"committed"}"#);
    });
    result.unwrap();

    assert_eq!(
        parse_command(&transport.sent_frames()[0]),
        Command::Commit {
            message: "Test commit message".into()
        }
    );
    assert_eq!(client.state(), ConnectionState::Connected);
}

// S2: commands hit the wire in program order and pair with responses FIFO.
#[tokio::test]
async fn open_write_commit_are_strictly_ordered() {
    let (client, transport) = new_client();

    let file = client.open_file("file1.txt");
    let mut events = file.events().unwrap();

    transport.wait_for_frames(1).await;
    transport.queue_event(r#"{"type":"file_opened","path":"file1.txt","handle":"1","content":"content1"}"#);
    let first = events.next().await.unwrap().unwrap();
    assert_eq!(
        first,
        FileEvent::Opened {
            handle: Handle::new(1),
            content: "content1".into()
        }
    );

    let ((written, committed), _) = tokio::join!(
        async { tokio::join!(file.write("content1", "new1"), client.commit("some changes")) },
        async {
            transport.wait_for_frames(3).await;
            transport.queue_event(r#"{"type":"file_written","handle":"1","content":"new1"}"#);
            transport.queue_event(r#"{"type":"committed"}"#);
        }
    );

    assert_eq!(written.unwrap(), "new1");
    committed.unwrap();

    let frames: Vec<Command> = transport.sent_frames().iter().map(|f| parse_command(f)).collect();
    assert_eq!(
        frames,
        vec![
            Command::OpenFile {
                path: "file1.txt".into(),
                handle: Handle::new(1)
            },
            Command::WriteFile {
                handle: Handle::new(1),
                last_content: "content1".into(),
                new_content: "new1".into()
            },
            Command::Commit {
                message: "some changes".into()
            },
        ]
    );

    // The write echo also lands on the event stream.
    let echo = events.next().await.unwrap().unwrap();
    assert_eq!(
        echo,
        FileEvent::Written {
            handle: Handle::new(1),
            content: "new1".into()
        }
    );
}

// S3: an unsolicited update mid-command reaches the stream without touching
// the pending commit.
#[tokio::test]
async fn unsolicited_update_bypasses_the_command_queue() {
    let (client, transport) = new_client();

    let file = client.open_file("file1.txt");
    let mut events = file.events().unwrap();
    transport.wait_for_frames(1).await;
    transport.queue_event(r#"{"type":"file_opened","path":"file1.txt","handle":"1","content":"c"}"#);
    events.next().await.unwrap().unwrap();

    let commit_task = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.commit("x").await })
    };
    transport.wait_for_frames(2).await;

    transport.queue_event(r#"{"type":"file_updated","handle":"1","content":"updated"}"#);
    let update = events.next().await.unwrap().unwrap();
    assert_eq!(
        update,
        FileEvent::Updated {
            handle: Handle::new(1),
            content: "updated".into()
        }
    );
    assert!(!commit_task.is_finished());

    transport.queue_event(r#"{"type":"committed"}"#);
    commit_task.await.unwrap().unwrap();
}

// S4: reconnect reissues open_file with the same handle and suppresses the
// re-open when the content did not change.
#[tokio::test(start_paused = true)]
async fn reconnect_preserves_handle_and_suppresses_unchanged_content() {
    let (client, transport) = new_client();
    let mut probe = StateProbe::attach(&client);

    let file = client.open_file("TASKS.md");
    let mut events = file.events().unwrap();
    transport.wait_for_frames(1).await;
    transport.queue_event(r#"{"type":"file_opened","path":"TASKS.md","handle":"1","content":"v1"}"#);
    events.next().await.unwrap().unwrap();

    transport.close_from_server();
    probe.wait_for(ConnectionState::ReconnectWait).await;

    // The backoff timer fires (paused clock), the client redials and
    // re-establishes the handle.
    transport.wait_for_frames(2).await;
    assert_eq!(transport.connect_count(), 2);
    assert_eq!(
        parse_command(&transport.sent_frames()[1]),
        Command::OpenFile {
            path: "TASKS.md".into(),
            handle: Handle::new(1)
        }
    );

    transport.queue_event(r#"{"type":"file_opened","path":"TASKS.md","handle":"1","content":"v1"}"#);
    // Unchanged content: nothing observable on the stream.
    assert!(timeout(Duration::from_secs(60), events.next()).await.is_err());

    transport.queue_event(r#"{"type":"file_updated","handle":"1","content":"actually changed"}"#);
    let update = events.next().await.unwrap().unwrap();
    assert_eq!(
        update,
        FileEvent::Updated {
            handle: Handle::new(1),
            content: "actually changed".into()
        }
    );
}

// S5: a reconnect that reveals changed content surfaces exactly one update,
// never a second opened event.
#[tokio::test(start_paused = true)]
async fn reconnect_surfaces_changed_content_as_an_update() {
    let (client, transport) = new_client();
    let mut probe = StateProbe::attach(&client);

    let file = client.open_file("TASKS.md");
    let mut events = file.events().unwrap();
    transport.wait_for_frames(1).await;
    transport.queue_event(r#"{"type":"file_opened","path":"TASKS.md","handle":"1","content":"v1"}"#);
    events.next().await.unwrap().unwrap();

    transport.close_from_server();
    probe.wait_for(ConnectionState::ReconnectWait).await;
    transport.wait_for_frames(2).await;

    transport.queue_event(r#"{"type":"file_opened","path":"TASKS.md","handle":"1","content":"v2"}"#);
    let event = events.next().await.unwrap().unwrap();
    assert_eq!(
        event,
        FileEvent::Updated {
            handle: Handle::new(1),
            content: "v2".into()
        }
    );

    // Exactly one event: nothing else is buffered.
    assert!(timeout(Duration::from_secs(60), events.next()).await.is_err());
}

// S6: a client with no open files does not reconnect.
#[tokio::test(start_paused = true)]
async fn idle_client_stays_disconnected_after_a_drop() {
    let (client, transport) = new_client();
    let mut probe = StateProbe::attach(&client);

    let (result, _) = tokio::join!(client.commit("x"), async {
        transport.wait_for_frames(1).await;
        transport.queue_event(r#"{"type":"committed"}"#);
    });
    result.unwrap();

    transport.close_from_server();
    probe.wait_for(ConnectionState::Disconnected).await;

    // Give any (wrongly) armed timer every chance to fire.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.connect_attempts(), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(
        probe.history(),
        vec![
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_between_failed_attempts() {
    let (client, transport) = new_client();

    let file = client.open_file("TASKS.md");
    let mut events = file.events().unwrap();
    transport.wait_for_frames(1).await;
    transport.queue_event(r#"{"type":"file_opened","path":"TASKS.md","handle":"1","content":"v1"}"#);
    events.next().await.unwrap().unwrap();

    let start = Instant::now();
    transport.fail_next_connect("still down");
    transport.fail_next_connect("still down");
    transport.close_from_server();

    // 5s to the first retry, 10s more to the second, 20s more to the third.
    transport.wait_for_attempts(2).await;
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    transport.wait_for_attempts(3).await;
    assert_eq!(start.elapsed(), Duration::from_secs(15));
    transport.wait_for_attempts(4).await;
    assert_eq!(start.elapsed(), Duration::from_secs(35));

    // The third retry succeeds and re-establishes the handle.
    transport.wait_for_connects(2).await;
    transport.wait_for_frames(2).await;
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn connect_now_bypasses_the_backoff_timer() {
    let (client, transport) = new_client();
    let mut probe = StateProbe::attach(&client);

    let file = client.open_file("TASKS.md");
    let mut events = file.events().unwrap();
    transport.wait_for_frames(1).await;
    transport.queue_event(r#"{"type":"file_opened","path":"TASKS.md","handle":"1","content":"v1"}"#);
    events.next().await.unwrap().unwrap();

    transport.close_from_server();
    probe.wait_for(ConnectionState::ReconnectWait).await;

    let start = Instant::now();
    client.connect_now().await.unwrap();

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(transport.connect_attempts(), 2);
}

#[tokio::test]
async fn listener_history_is_the_transition_history() {
    let (client, transport) = new_client();
    let mut probe = StateProbe::attach(&client);

    let (result, _) = tokio::join!(client.commit("x"), async {
        transport.wait_for_frames(1).await;
        transport.queue_event(r#"{"type":"committed"}"#);
    });
    result.unwrap();

    let file = client.open_file("TASKS.md");
    let mut events = file.events().unwrap();
    transport.wait_for_frames(2).await;
    transport.queue_event(r#"{"type":"file_opened","path":"TASKS.md","handle":"1","content":"v1"}"#);
    events.next().await.unwrap().unwrap();

    transport.close_from_server();
    probe.wait_for(ConnectionState::ReconnectWait).await;

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    assert_eq!(
        probe.history(),
        vec![
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::ReconnectWait,
            ConnectionState::Disconnected,
        ]
    );

    // No further invocations after disconnect().
    tokio::task::yield_now().await;
    assert_eq!(probe.history().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn open_failure_surfaces_on_the_stream() {
    let (client, transport) = new_client();
    transport.fail_next_connect("refused");

    let file = client.open_file("TASKS.md");
    let mut events = file.events().unwrap();

    match events.next().await.unwrap() {
        Err(ClientError::ConnectFailed(reason)) => assert!(reason.contains("refused")),
        other => panic!("expected a connect failure on the stream, got {other:?}"),
    }
    // The stream ends; the handle is gone.
    assert!(events.next().await.is_none());
}

#[tokio::test]
async fn server_error_on_open_rejects_the_stream_and_later_writes() {
    let (client, transport) = new_client();

    let file = client.open_file("nonexistent.md");
    let mut events = file.events().unwrap();
    transport.wait_for_frames(1).await;
    transport.queue_event(
        r#"{"type":"error","path":"nonexistent.md","message":"File not found: nonexistent.md"}"#,
    );

    match events.next().await.unwrap() {
        Err(ClientError::Remote { message, path }) => {
            assert_eq!(message, "File not found: nonexistent.md");
            assert_eq!(path.as_deref(), Some("nonexistent.md"));
        }
        other => panic!("expected the server error, got {other:?}"),
    }
    assert!(events.next().await.is_none());

    // The opening phase failed, so writes are refused locally.
    assert!(file.write("a", "b").await.is_err());
}

#[tokio::test]
async fn close_is_idempotent_and_sends_close_file_after_open() {
    let (client, transport) = new_client();

    let file = client.open_file("TASKS.md");
    let mut events = file.events().unwrap();
    transport.wait_for_frames(1).await;
    transport.queue_event(r#"{"type":"file_opened","path":"TASKS.md","handle":"1","content":"v1"}"#);
    events.next().await.unwrap().unwrap();

    file.close();
    file.close();

    transport.wait_for_frames(2).await;
    assert_eq!(
        parse_command(&transport.sent_frames()[1]),
        Command::CloseFile {
            handle: Handle::new(1)
        }
    );
    transport.queue_event(r#"{"type":"file_closed","handle":"1"}"#);

    // Exactly one close_file went out despite the double close.
    assert_eq!(
        transport
            .sent_frames()
            .iter()
            .filter(|f| f.contains("close_file"))
            .count(),
        1
    );

    // The stream ends once closed.
    assert!(events.next().await.is_none());

    // Updates for the forgotten handle are dropped silently; the connection
    // keeps working.
    transport.queue_event(r#"{"type":"file_updated","handle":"1","content":"ghost"}"#);
    let (result, _) = tokio::join!(client.commit("still alive"), async {
        transport.wait_for_frames(3).await;
        transport.queue_event(r#"{"type":"committed"}"#);
    });
    result.unwrap();
}

#[tokio::test]
async fn write_through_a_sibling_handle_updates_both_streams() {
    let (client, transport) = new_client();

    // Two handles on the same path: the writer sees file_written, the
    // sibling sees file_updated, each on its own stream.
    let writer = client.open_file("shared.md");
    let mut writer_events = writer.events().unwrap();
    transport.wait_for_frames(1).await;
    transport.queue_event(r#"{"type":"file_opened","path":"shared.md","handle":"1","content":"base"}"#);
    writer_events.next().await.unwrap().unwrap();

    let sibling = client.open_file("shared.md");
    let mut sibling_events = sibling.events().unwrap();
    transport.wait_for_frames(2).await;
    transport.queue_event(r#"{"type":"file_opened","path":"shared.md","handle":"2","content":"base"}"#);
    sibling_events.next().await.unwrap().unwrap();

    let (written, _) = tokio::join!(writer.write("base", "edited"), async {
        transport.wait_for_frames(3).await;
        transport.queue_event(r#"{"type":"file_written","handle":"1","content":"edited"}"#);
        transport.queue_event(r#"{"type":"file_updated","handle":"2","content":"edited"}"#);
    });
    assert_eq!(written.unwrap(), "edited");

    assert_eq!(
        writer_events.next().await.unwrap().unwrap(),
        FileEvent::Written {
            handle: Handle::new(1),
            content: "edited".into()
        }
    );
    assert_eq!(
        sibling_events.next().await.unwrap().unwrap(),
        FileEvent::Updated {
            handle: Handle::new(2),
            content: "edited".into()
        }
    );
}
