use futures::future::join_all;
use microrpc::{
    DispatchServer, DispatchTable, Locator, Registry, Result, RpcError, Service, ServiceName,
    Type, Value,
};
use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task, time,
};

#[derive(Default)]
struct Echo {
    heard: Vec<String>,
}

impl Service for Echo {
    const NAME: &'static str = "Echo";

    fn dispatch_table() -> Result<DispatchTable<Self>> {
        let mut table = DispatchTable::new();
        table
            .method("reply", |_: &mut Echo, (text,): (String,)| Ok(text))?
            .method("remember", |echo: &mut Echo, (text,): (String,)| {
                echo.heard.push(text);
                Ok(echo.heard.len() as i32)
            })?
            .method("heard", |echo: &mut Echo, (): ()| Ok(echo.heard.join(",")))?
            .method("forget", |echo: &mut Echo, (): ()| {
                echo.heard.clear();
                Ok(())
            })?
            .method("repeat", |_: &mut Echo, (text, times): (String, i32)| {
                anyhow::ensure!(times >= 0, "cannot repeat {times} times");
                Ok(text.repeat(times as usize))
            })?
            .method("name_of", |_: &mut Echo, (target,): (ServiceName,)| {
                Ok(target.to_string())
            })?
            .private("rewind")?;
        Ok(table)
    }
}

microrpc::interface! {
    trait EchoApi for Echo {
        fn reply(text: String) -> String;
        fn remember(text: String) -> i32;
        fn heard() -> String;
        fn forget() -> ();
    }
}

/// Serves `Echo` on an ephemeral loopback port and returns a locator for a separate caller
/// sharing the same registry.
async fn serve_echo() -> Locator {
    let registry = Arc::new(Registry::new());
    registry.register_service::<Echo>("127.0.0.1", 0);

    let server = DispatchServer::new(Locator::new(Arc::clone(&registry)), Echo::default())
        .unwrap()
        .bind()
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();
    registry.register_service::<Echo>("127.0.0.1", port);
    task::spawn(server.serve());

    Locator::new(registry)
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn reply_round_trips_text() {
    let locator = serve_echo().await;
    let echo = locator.get::<Echo>().unwrap();
    assert!(!echo.is_local());

    assert_eq!(echo.reply("hi".into()).await.unwrap(), "hi");
    assert_eq!(echo.reply("".into()).await.unwrap(), "");
    assert_eq!(
        echo.call::<_, String>("repeat", ("ab".to_owned(), 3)).await.unwrap(),
        "ababab"
    );
}

#[tokio::test]
async fn sequential_calls_see_cumulative_state() {
    let locator = serve_echo().await;
    let echo = locator.get::<Echo>().unwrap();

    assert_eq!(echo.remember("a".into()).await.unwrap(), 1);
    assert_eq!(echo.remember("b".into()).await.unwrap(), 2);
    assert_eq!(echo.heard().await.unwrap(), "a,b");

    echo.forget().await.unwrap();
    assert_eq!(echo.heard().await.unwrap(), "");
}

#[tokio::test]
async fn concurrent_callers_are_served_one_at_a_time() {
    let locator = serve_echo().await;
    let echo = locator.get::<Echo>().unwrap();

    let calls = (0..20).map(|i| {
        let echo = echo.clone();
        async move { echo.remember(i.to_string()).await }
    });
    let mut counts: Vec<i32> = join_all(calls)
        .await
        .into_iter()
        .collect::<Result<_>>()
        .unwrap();
    counts.sort_unstable();

    assert_eq!(counts, (1..=20).collect::<Vec<_>>());
}

#[tokio::test]
async fn void_return_discards_the_response() {
    let locator = serve_echo().await;
    let retval = locator
        .invoke("Echo", "reply", vec!["ignored".into()], &Type::Void)
        .await
        .unwrap();
    assert_eq!(retval, Value::Void);
}

#[tokio::test]
async fn type_reference_arguments_travel_by_name() {
    let locator = serve_echo().await;
    let echo = locator.get::<Echo>().unwrap();

    let name: String = echo
        .call("name_of", (ServiceName::from("Echo"),))
        .await
        .unwrap();
    assert_eq!(name, "Echo");

    // The server cannot resolve a service nobody registered, so it drops the call.
    let err = echo
        .call::<_, String>("name_of", (ServiceName::from("Ghost"),))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::ResponseAborted { .. }), "{err}");
}

#[tokio::test]
async fn rejected_calls_abort_the_connection_but_not_the_server() {
    let locator = serve_echo().await;
    let echo = locator.get::<Echo>().unwrap();

    for (method, args) in [
        ("missing", vec![]),
        ("rewind", vec![]),
        ("reply", vec![]),
        ("repeat", vec![Value::from("x"), Value::from("many")]),
        ("repeat", vec![Value::from("x"), Value::from(-1)]),
    ] {
        let err = locator
            .invoke("Echo", method, args, &Type::String)
            .await
            .unwrap_err();
        assert!(
            matches!(err, RpcError::ResponseAborted { .. }),
            "{method}: {err}"
        );
    }

    assert_eq!(echo.reply("still here".into()).await.unwrap(), "still here");
}

#[tokio::test]
async fn unconvertible_response_is_invalid() {
    let locator = serve_echo().await;
    let err = locator
        .invoke("Echo", "reply", vec!["forty-two".into()], &Type::Int)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::InvalidResponse { .. }), "{err}");
}

#[tokio::test]
async fn unsupported_return_type_fails_before_connecting() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let registry = Arc::new(Registry::new());
    registry.register_service::<Echo>("127.0.0.1", listener.local_addr().unwrap().port());
    let locator = Locator::new(registry);

    let err = locator
        .invoke(
            "Echo",
            "reply",
            vec!["hi".into()],
            &Type::Other("Vec<String>".into()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::UnsupportedReturnType { .. }), "{err}");

    let accepted = time::timeout(Duration::from_millis(100), listener.accept()).await;
    assert!(accepted.is_err(), "no connection should have been opened");
}

#[tokio::test]
async fn unreachable_service() {
    let port = closed_port().await;
    let registry = Arc::new(Registry::new());
    registry.register_service::<Echo>("127.0.0.1", port);
    let locator = Locator::new(registry);

    let err = locator
        .get::<Echo>()
        .unwrap()
        .reply("hi".into())
        .await
        .unwrap_err();
    match err {
        RpcError::ServiceUnreachable { service, port: p, .. } => {
            assert_eq!(service.as_str(), "Echo");
            assert_eq!(p, port);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn raw_wire_format() {
    let locator = serve_echo().await;
    let port = locator.registry().lookup_descriptor("Echo").unwrap().port;

    let mut sock = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    sock.write_all(b"repeat\r\nxy\r\n2\r\n$\r\n").await.unwrap();
    let mut response = String::new();
    sock.read_to_string(&mut response).await.unwrap();
    assert_eq!(response, "xyxy");

    // No sentinel before the caller stops writing: nothing comes back.
    let mut sock = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    sock.write_all(b"reply\nhi\n").await.unwrap();
    sock.shutdown().await.unwrap();
    let mut response = Vec::new();
    let _ = sock.read_to_end(&mut response).await;
    assert!(response.is_empty());
}
