//! Tests d'intégration du relais SSDP
//!
//! Les tests de réécriture utilisent un `PacketSink` qui enregistre les envois ;
//! les tests de bout en bout passent par de vrais sockets UDP en loopback.

use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bbrssdp::{
    PacketSink, RelayConfig, RelayError, RelayHandler, RelayReport, RewriteMode, SsdpMessage,
    SsdpRelay, TokenKind, TokenStream, Tokenizer,
};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time::timeout;

const NOTIFY: &str = "NOTIFY * HTTP/1.1\r\n\
                      HOST: 239.255.255.250:1900\r\n\
                      DevName.bambu.com: Printer1\r\n\
                      \r\n";

/// Sink qui enregistre chaque envoi ; les hôtes listés dans `failing` échouent
#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(String, u16, String)>>,
    failing: Vec<String>,
}

impl RecordingSink {
    fn failing_on(hosts: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: hosts.iter().map(|h| h.to_string()).collect(),
        }
    }

    fn sent(&self) -> Vec<(String, u16, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn field_values(&self, field: &str) -> Vec<(String, String)> {
        self.sent()
            .into_iter()
            .map(|(host, _, payload)| {
                let msg = SsdpMessage::parse(&payload, &bbrssdp::SsdpLexer).unwrap();
                (host, msg.get(field).unwrap().to_string())
            })
            .collect()
    }
}

#[async_trait]
impl PacketSink for RecordingSink {
    async fn send_packet(&self, payload: &[u8], host: &str, port: u16) -> io::Result<usize> {
        if self.failing.iter().any(|h| h == host) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        self.sent.lock().unwrap().push((
            host.to_string(),
            port,
            String::from_utf8(payload.to_vec()).unwrap(),
        ));
        Ok(payload.len())
    }
}

fn from() -> SocketAddr {
    "192.168.1.20:1900".parse().unwrap()
}

fn handler(targets: &[&str]) -> RelayHandler {
    RelayHandler::new(RelayConfig::new(targets.iter().copied()).unwrap())
}

#[tokio::test]
async fn test_single_target_example() {
    let sink = RecordingSink::default();
    let report = handler(&["10.0.0.5"])
        .relay_datagram(&sink, NOTIFY.as_bytes(), from())
        .await
        .unwrap();

    assert_eq!(report, RelayReport { sent: 1, failed: 0 });
    assert_eq!(
        sink.sent(),
        vec![(
            "10.0.0.5".to_string(),
            2021,
            "NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nDevName.bambu.com: VPN-Printer1\r\n\r\n"
                .to_string()
        )]
    );
}

#[tokio::test]
async fn test_cumulative_prefix_across_targets() {
    let sink = RecordingSink::default();
    handler(&["10.0.0.5", "10.0.0.6", "10.0.0.7"])
        .relay_datagram(&sink, NOTIFY.as_bytes(), from())
        .await
        .unwrap();

    assert_eq!(
        sink.field_values("DevName.bambu.com"),
        vec![
            ("10.0.0.5".to_string(), "VPN-Printer1".to_string()),
            ("10.0.0.6".to_string(), "VPN-VPN-Printer1".to_string()),
            ("10.0.0.7".to_string(), "VPN-VPN-VPN-Printer1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_per_target_prefix() {
    let config = RelayConfig::new(["10.0.0.5", "10.0.0.6"])
        .unwrap()
        .with_rewrite_mode(RewriteMode::PerTarget);
    let sink = RecordingSink::default();
    RelayHandler::new(config)
        .relay_datagram(&sink, NOTIFY.as_bytes(), from())
        .await
        .unwrap();

    assert_eq!(
        sink.field_values("DevName.bambu.com"),
        vec![
            ("10.0.0.5".to_string(), "VPN-Printer1".to_string()),
            ("10.0.0.6".to_string(), "VPN-Printer1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_missing_field_sends_nothing() {
    let sink = RecordingSink::default();
    let packet = "NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nNT: upnp:rootdevice\r\n\r\n";
    let err = handler(&["10.0.0.5", "10.0.0.6"])
        .relay_datagram(&sink, packet.as_bytes(), from())
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::MissingField(ref f) if f == "DevName.bambu.com"));
    assert!(sink.sent().is_empty());
}

#[tokio::test]
async fn test_invalid_utf8_is_decode_error() {
    let sink = RecordingSink::default();
    let err = handler(&["10.0.0.5"])
        .relay_datagram(&sink, &[0x4e, 0xff, 0xfe, 0x0d, 0x0a], from())
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Decode(_)));
    assert!(sink.sent().is_empty());
}

#[tokio::test]
async fn test_noise_is_malformed() {
    let sink = RecordingSink::default();
    let err = handler(&["10.0.0.5"])
        .relay_datagram(&sink, b"hello there\r\nno headers here\r\n", from())
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::MalformedPacket(_)));
    assert!(sink.sent().is_empty());
}

#[tokio::test]
async fn test_send_failure_does_not_abort_other_targets() {
    let sink = RecordingSink::failing_on(&["10.0.0.6"]);
    let report = handler(&["10.0.0.5", "10.0.0.6", "10.0.0.7"])
        .relay_datagram(&sink, NOTIFY.as_bytes(), from())
        .await
        .unwrap();

    assert_eq!(report, RelayReport { sent: 2, failed: 1 });
    // Le message a tout de même été réécrit pour la cible en échec
    assert_eq!(
        sink.field_values("DevName.bambu.com"),
        vec![
            ("10.0.0.5".to_string(), "VPN-Printer1".to_string()),
            ("10.0.0.7".to_string(), "VPN-VPN-VPN-Printer1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_custom_field_and_prefix() {
    let config = RelayConfig::new(["10.0.0.5"])
        .unwrap()
        .with_field("USN")
        .with_prefix("relay:")
        .with_target_port(Some(1900));
    let sink = RecordingSink::default();
    let packet = "NOTIFY * HTTP/1.1\r\nUSN: uuid:abc\r\n\r\n";
    RelayHandler::new(config)
        .relay_datagram(&sink, packet.as_bytes(), from())
        .await
        .unwrap();

    let sent = sink.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, 1900);
    assert_eq!(sent[0].2, "NOTIFY * HTTP/1.1\r\nUSN: relay:uuid:abc\r\n\r\n");
}

/// Grammaire minimale `nom=valeur;` pour vérifier l'injection du tokenizer
struct SemicolonTokenizer;

impl Tokenizer for SemicolonTokenizer {
    fn tokenize<'a>(&self, text: &'a str) -> TokenStream<'a> {
        let mut parts = text.split(';');
        let start = parts.next().unwrap_or_default();
        let fields = parts.flat_map(|part| match part.split_once('=') {
            Some((name, value)) => vec![
                bbrssdp::Token::new(TokenKind::FieldName, name),
                bbrssdp::Token::new(TokenKind::FieldValue, value),
            ],
            None => vec![bbrssdp::Token::new(TokenKind::Other, part)],
        });
        Box::new(std::iter::once(bbrssdp::Token::new(TokenKind::StartLineText, start)).chain(fields))
    }
}

#[tokio::test]
async fn test_injected_tokenizer() {
    let config = RelayConfig::new(["10.0.0.5"]).unwrap();
    let relay = RelayHandler::with_tokenizer(config, Box::new(SemicolonTokenizer));
    let sink = RecordingSink::default();

    relay
        .relay_datagram(
            &sink,
            b"NOTIFY * HTTP/1.1;HOST=x;DevName.bambu.com=P1S",
            from(),
        )
        .await
        .unwrap();

    assert_eq!(
        sink.sent()[0].2,
        "NOTIFY * HTTP/1.1\r\nHOST: x\r\nDevName.bambu.com: VPN-P1S\r\n\r\n"
    );
}

async fn recv_text(socket: &UdpSocket) -> String {
    let mut buf = vec![0u8; 65535];
    let (n, _) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for relayed packet")
        .unwrap();
    String::from_utf8(buf[..n].to_vec()).unwrap()
}

#[tokio::test]
async fn test_end_to_end_over_udp() {
    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let receiver_port = receiver.local_addr().unwrap().port();

    let config = RelayConfig::new(["127.0.0.1"])
        .unwrap()
        .with_bind_addr("127.0.0.1".parse().unwrap())
        .with_port(0)
        .with_target_port(Some(receiver_port));
    let relay = SsdpRelay::bind(config).await.unwrap();
    let relay_addr = relay.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(relay.run_until(async {
        let _ = shutdown_rx.await;
    }));

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // Des datagrammes invalides ne doivent pas arrêter le service
    client.send_to(&[0xff, 0xfe, 0xfd], relay_addr).await.unwrap();
    client.send_to(b"garbage only", relay_addr).await.unwrap();
    client
        .send_to(b"NOTIFY * HTTP/1.1\r\nNT: upnp:rootdevice\r\n\r\n", relay_addr)
        .await
        .unwrap();
    client.send_to(NOTIFY.as_bytes(), relay_addr).await.unwrap();

    assert_eq!(
        recv_text(&receiver).await,
        "NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nDevName.bambu.com: VPN-Printer1\r\n\r\n"
    );

    shutdown_tx.send(()).unwrap();
    let stats = timeout(Duration::from_secs(5), task)
        .await
        .expect("relay did not stop")
        .unwrap();

    assert_eq!(stats.received, 4);
    assert_eq!(stats.dropped, 3);
    assert_eq!(stats.relayed, 1);
    assert_eq!(stats.packets_sent, 1);
    assert_eq!(stats.send_failures, 0);
}

#[tokio::test]
async fn test_large_datagram_is_relayed_whole() {
    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let receiver_port = receiver.local_addr().unwrap().port();

    let config = RelayConfig::new(["127.0.0.1"])
        .unwrap()
        .with_bind_addr("127.0.0.1".parse().unwrap())
        .with_port(0)
        .with_target_port(Some(receiver_port));
    let relay = SsdpRelay::bind(config).await.unwrap();
    let relay_addr = relay.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(relay.run_until(async {
        let _ = shutdown_rx.await;
    }));

    // Le champ réécrit se trouve au-delà des 8 premiers Kio
    let padding = "x".repeat(9000);
    let packet = format!(
        "NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nX-PAD: {}\r\nDevName.bambu.com: Printer1\r\n\r\n",
        padding
    );
    assert!(packet.len() > 9000);

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(packet.as_bytes(), relay_addr).await.unwrap();

    assert_eq!(
        recv_text(&receiver).await,
        format!(
            "NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nX-PAD: {}\r\nDevName.bambu.com: VPN-Printer1\r\n\r\n",
            padding
        )
    );

    shutdown_tx.send(()).unwrap();
    let stats = timeout(Duration::from_secs(5), task)
        .await
        .expect("relay did not stop")
        .unwrap();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.relayed, 1);
    assert_eq!(stats.dropped, 0);
}

#[tokio::test]
async fn test_socket_is_released_after_shutdown() {
    let config = RelayConfig::new(["127.0.0.1"])
        .unwrap()
        .with_bind_addr("127.0.0.1".parse().unwrap())
        .with_port(0);
    let relay = SsdpRelay::bind(config).await.unwrap();
    let addr = relay.local_addr().unwrap();

    let stats = relay.run_until(async {}).await;
    assert_eq!(stats.received, 0);

    // Le port est de nouveau disponible
    let rebound = std::net::UdpSocket::bind(addr);
    assert!(rebound.is_ok());
}
