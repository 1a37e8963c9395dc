//! Tests for bidirectional channels over the mock transport.

use std::sync::Arc;

use anyhow::Result;
use fluxcodec::TypeDesc;
use fluxcodec::Value;
use fluxmeta::CompositeMetadata;
use futures::StreamExt;
use futures::stream;
use rand::Rng;

use fluxrpc::Args;
use fluxrpc::Error;
use fluxrpc::InteractionPattern;
use fluxrpc::InterfaceDescriptor;
use fluxrpc::MethodDescriptor;
use fluxrpc::Proxy;
use fluxrpc::ProxyBuilder;
use fluxrpc::mock_transport::MockTransport;

fn chat_service() -> InterfaceDescriptor {
    InterfaceDescriptor::builder("com.example.ChatService")
        .method(MethodDescriptor::new("echo").stream_param(TypeDesc::Any).returns_stream(TypeDesc::Any))
        .method(
            MethodDescriptor::new("join")
                .param(TypeDesc::String)
                .stream_param(TypeDesc::Int)
                .returns_stream(TypeDesc::Int),
        )
        .build()
        .expect("valid interface")
}

fn proxy_over(mock: &Arc<MockTransport>) -> Proxy {
    ProxyBuilder::new(chat_service()).transport(mock.clone()).build().expect("valid proxy")
}

#[tokio::test]
async fn test_channel_echoes_three_elements_in_order() -> Result<()> {
    let mock = Arc::new(MockTransport::new());
    let proxy = proxy_over(&mock);
    assert_eq!(proxy.method_metadata("echo")?.pattern, InteractionPattern::RequestChannel);

    let outbound = stream::iter(vec![Value::from("a"), Value::from("b"), Value::from("c")]);
    let inbound: Vec<Value> = proxy
        .invoke("echo", Args::new().stream(outbound))?
        .into_stream()?
        .map(|item| item.expect("echoed item"))
        .collect()
        .await;
    assert_eq!(inbound, vec![Value::from("a"), Value::from("b"), Value::from("c")]);

    // Routing message first, with an empty body, then one message per element.
    let received = mock.received();
    assert_eq!(received.len(), 4);
    assert!(received[0].data.is_empty());
    let route = CompositeMetadata::parse(&received[0].metadata)?.route()?.expect("route");
    assert_eq!(route.method, "echo");
    assert!(received.iter().all(|p| p.metadata == received[0].metadata));
    Ok(())
}

#[tokio::test]
async fn test_channel_header_value_rides_the_routing_message() -> Result<()> {
    let mock = Arc::new(MockTransport::new());
    let proxy = proxy_over(&mock);

    let inbound: Vec<fluxrpc::Result<Value>> = proxy
        .invoke("join", Args::new().value("general").stream(stream::iter(vec![Value::from(1), Value::from(2)])))?
        .into_stream()?
        .collect()
        .await;
    assert_eq!(inbound.len(), 2);

    let received = mock.received();
    assert_eq!(&received[0].data[..], b"\"general\"");
    assert_eq!(&received[1].data[..], b"1");
    Ok(())
}

#[tokio::test]
async fn test_channel_preserves_order_of_many_elements() -> Result<()> {
    let mut rng = rand::thread_rng();
    let sent: Vec<Value> = (0..64).map(|_| Value::from(rng.gen_range(-1000i64..1000))).collect();

    let mock = Arc::new(MockTransport::new());
    let proxy = proxy_over(&mock);
    let inbound: Vec<Value> = proxy
        .invoke("join", Args::new().value("bulk").stream(stream::iter(sent.clone())))?
        .into_stream()?
        .map(|item| item.expect("echoed item"))
        .collect()
        .await;
    assert_eq!(inbound, sent);
    Ok(())
}

#[tokio::test]
async fn test_channel_reports_unencodable_items_after_inbound() -> Result<()> {
    let mock = Arc::new(MockTransport::new());
    let proxy = proxy_over(&mock);

    let outbound = stream::iter(vec![Value::from(1), Value::from("two"), Value::from(3)]);
    let inbound: Vec<fluxrpc::Result<Value>> =
        proxy.invoke("join", Args::new().value("typed").stream(outbound))?.into_stream()?.collect().await;

    assert_eq!(inbound.len(), 2);
    assert_eq!(inbound[0].as_ref().ok(), Some(&Value::from(1)));
    assert!(matches!(inbound[1], Err(Error::BadArguments { ref method, .. }) if method == "join"));
    Ok(())
}

#[tokio::test]
async fn test_dropping_the_reply_stops_the_channel() -> Result<()> {
    let mock = Arc::new(MockTransport::new());
    let proxy = proxy_over(&mock);

    let outbound = stream::iter(0i64..).map(Value::from);
    let mut inbound = proxy.invoke("join", Args::new().value("endless").stream(outbound))?.into_stream()?;
    let first = inbound.next().await.expect("one item")?;
    assert_eq!(first, Value::from(0));
    drop(inbound);

    // The echo task ends once its reply channel is gone.
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
    let seen = mock.received().len();
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
    assert_eq!(mock.received().len(), seen);
    Ok(())
}
