//! End-to-end tests driving a client and a server session over an in-memory
//! stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use weatherpush::client::{run_client, ClientEvent, ClientSession, ConfirmedSampleSource, MemorySampleSource};
use weatherpush::config::{ClientConfig, ServerConfig};
use weatherpush::diff::CompressionAlgorithm;
use weatherpush::error::{Error, Result, SessionError};
use weatherpush::fields::FieldValues;
use weatherpush::protocol::{Packet, PacketCodec, StationInfoPacket};
use weatherpush::server::{serve_connection, MemoryDatabase, ServerSession, StationRegistration};
use weatherpush::types::{HardwareType, SampleData, Station, StationId};

const AUTH_CODE: u32 = 0x00C0_FFEE;

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    client: Arc<ClientSession>,
    events: broadcast::Receiver<ClientEvent>,
    database: Arc<MemoryDatabase>,
    client_task: JoinHandle<Result<()>>,
    server_task: JoinHandle<Result<ServerSession>>,
}

fn database() -> Arc<MemoryDatabase> {
    let db = Arc::new(MemoryDatabase::new());
    db.add_station(
        AUTH_CODE,
        StationRegistration::new("rua", HardwareType::Davis, 31, StationId(1)),
    );
    db
}

fn start(database: Arc<MemoryDatabase>, samples: Arc<dyn ConfirmedSampleSource>) -> Harness {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);

    let server_db = Arc::clone(&database);
    let server_task = tokio::spawn(async move {
        let mut session = ServerSession::new(ServerConfig::default(), server_db);
        serve_connection(server_io, &mut session).await?;
        Ok(session)
    });

    let config = ClientConfig {
        authorisation_code: AUTH_CODE,
        ..Default::default()
    };
    let (client, outgoing) = ClientSession::new(config, samples);
    let client = Arc::new(client);
    let events = client.subscribe();

    let driver = Arc::clone(&client);
    let client_task = tokio::spawn(async move { run_client(client_io, &driver, outgoing).await });

    Harness {
        client,
        events,
        database,
        client_task,
        server_task,
    }
}

async fn next_event(events: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("event channel closed")
}

async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn live(temperature: f64, humidity: i64) -> FieldValues {
    FieldValues::live(HardwareType::Davis)
        .value("temperature", temperature)
        .value("humidity", humidity)
        .value("pressure", 1009.8)
        .value("wind_direction", 270)
        .build()
        .unwrap()
}

fn sample_time(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2016, 3, 1, 10, minute, 0).unwrap()
}

fn sample(minute: u32, temperature: f64, rainfall: f64) -> SampleData {
    let values = FieldValues::sample(HardwareType::Davis)
        .value("temperature", temperature)
        .value("humidity", 80)
        .value("rainfall", rainfall)
        .value("record_time", NaiveTime::from_hms_opt(10, minute, 0).unwrap())
        .value("record_date", NaiveDate::from_ymd_opt(2016, 3, 1).unwrap())
        .value("evapotranspiration", 0.0)
        .build()
        .unwrap();
    SampleData::new(sample_time(minute), sample_time(minute), values)
}

// ============================================================================
// Live records
// ============================================================================

#[tokio::test]
async fn test_live_diff_round_trip() {
    let mut h = start(database(), Arc::new(MemorySampleSource::new()));
    assert_eq!(next_event(&mut h.events).await, ClientEvent::Ready(vec!["rua".into()]));

    h.client.send_live("rua", live(20.5, 55)).await.unwrap();
    h.client.send_live("rua", live(21.0, 55)).await.unwrap();

    let db = Arc::clone(&h.database);
    eventually(|| db.live_data("rua").len() == 2).await;

    let stored = h.database.live_data("rua");
    assert_eq!(stored[0].values.get_f64("temperature"), Some(20.5));
    assert_eq!(stored[1].values.get_f64("temperature"), Some(21.0));
    assert_eq!(stored[1].values.get_i64("humidity"), Some(55));
    assert_eq!(stored[1].values.get_f64("pressure"), Some(1009.8));
    assert_eq!(stored[1].values.get_i64("wind_direction"), Some(270));

    let stats = h.client.statistics();
    assert_eq!(stats.today().live_with(CompressionAlgorithm::None).count, 1);
    assert_eq!(stats.today().live_with(CompressionAlgorithm::LiveDiff).count, 1);

    h.client_task.abort();
}

#[tokio::test]
async fn test_unchanged_live_not_sent() {
    let mut h = start(database(), Arc::new(MemorySampleSource::new()));
    next_event(&mut h.events).await;

    h.client.send_live("rua", live(18.0, 60)).await.unwrap();
    h.client.send_live("rua", live(18.0, 60)).await.unwrap();
    h.client.send_live("rua", live(18.5, 60)).await.unwrap();

    let db = Arc::clone(&h.database);
    eventually(|| db.live_data("rua").len() == 2).await;

    let sequences: Vec<_> = h.database.live_data("rua").iter().map(|l| l.sequence_id.get()).collect();
    assert_eq!(sequences, vec![1, 2]);

    h.client_task.abort();
}

/// Confirmed sample lookups that finish in reverse order of the calls.
struct ReversingSource {
    calls: AtomicU64,
}

#[async_trait]
impl ConfirmedSampleSource for ReversingSource {
    async fn confirmed_sample(&self, _station_code: &str) -> Result<Option<SampleData>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60 - 20 * call.min(2))).await;
        Ok(None)
    }
}

#[tokio::test]
async fn test_transmission_follows_sequence_order() {
    let source = Arc::new(ReversingSource {
        calls: AtomicU64::new(0),
    });
    let mut h = start(database(), source);
    next_event(&mut h.events).await;

    let client = Arc::clone(&h.client);
    let (a, b, c) = tokio::join!(
        client.send_live("rua", live(10.0, 50)),
        client.send_live("rua", live(11.0, 50)),
        client.send_live("rua", live(12.0, 50)),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    let db = Arc::clone(&h.database);
    eventually(|| db.live_data("rua").len() == 3).await;

    let stored = h.database.live_data("rua");
    let sequences: Vec<_> = stored.iter().map(|l| l.sequence_id.get()).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(stored[2].values.get_f64("temperature"), Some(12.0));

    h.client_task.abort();
}

// ============================================================================
// Samples
// ============================================================================

#[tokio::test]
async fn test_sample_acknowledged_then_used_as_base() {
    let source = Arc::new(MemorySampleSource::new());
    let mut h = start(database(), source.clone());
    next_event(&mut h.events).await;

    let first = sample(0, 12.0, 0.2);
    h.client.send_sample("rua", first.clone()).unwrap();
    h.client.flush_samples("rua").await.unwrap();

    assert_eq!(
        next_event(&mut h.events).await,
        ClientEvent::ReceiptConfirmation {
            station_code: "rua".into(),
            timestamp: sample_time(0),
        }
    );
    source.confirm("rua", first);

    h.client.send_sample("rua", sample(5, 12.5, 0.2)).unwrap();
    h.client.send_live("rua", live(12.5, 80)).await.unwrap();

    assert_eq!(
        next_event(&mut h.events).await,
        ClientEvent::ReceiptConfirmation {
            station_code: "rua".into(),
            timestamp: sample_time(5),
        }
    );

    let stored = h.database.samples("rua");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].values.get_f64("temperature"), Some(12.5));
    assert_eq!(stored[1].values.get_f64("rainfall"), Some(0.2));
    assert_eq!(stored[1].values.get_i64("humidity"), Some(80));

    let stats = h.client.statistics();
    assert_eq!(stats.today().samples_with(CompressionAlgorithm::None).count, 1);
    assert_eq!(stats.today().samples_with(CompressionAlgorithm::SampleDiff).count, 1);

    h.client_task.abort();
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_authentication_rejected() {
    let mut h = start(Arc::new(MemoryDatabase::new()), Arc::new(MemorySampleSource::new()));

    assert_eq!(next_event(&mut h.events).await, ClientEvent::AuthenticationFailed);

    let result = tokio::time::timeout(Duration::from_secs(5), h.client_task)
        .await
        .expect("client did not stop")
        .unwrap();
    assert!(matches!(result, Err(Error::Session(SessionError::AuthenticationFailed))));

    let server = h.server_task.await.unwrap().unwrap();
    assert!(!server.is_authenticated());
}

#[tokio::test]
async fn test_server_session_outlives_client() {
    let mut h = start(database(), Arc::new(MemorySampleSource::new()));
    next_event(&mut h.events).await;

    h.client.send_live("rua", live(5.0, 90)).await.unwrap();
    let db = Arc::clone(&h.database);
    eventually(|| db.live_data("rua").len() == 1).await;

    h.client_task.abort();
    let server = tokio::time::timeout(Duration::from_secs(5), h.server_task)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();

    assert!(server.is_authenticated());
    assert_eq!(server.stations().count(), 1);
    assert_eq!(server.lost_live_estimate(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_authenticate_resent_until_answered() {
    let (client_io, server_io): (DuplexStream, DuplexStream) = tokio::io::duplex(4096);
    let mut server = Framed::new(server_io, PacketCodec::new());

    let config = ClientConfig {
        authorisation_code: 7,
        authenticate_timeout: Duration::from_secs(10),
        ..Default::default()
    };
    let (client, outgoing) = ClientSession::new(config, Arc::new(MemorySampleSource::new()));
    let client = Arc::new(client);
    let mut events = client.subscribe();
    let driver = Arc::clone(&client);
    let task = tokio::spawn(async move { run_client(client_io, &driver, outgoing).await });

    for _ in 0..2 {
        let packet = server.next().await.unwrap().unwrap();
        assert!(matches!(packet, Packet::Authenticate(p) if p.authorisation_code == 7));
    }

    let mut info = StationInfoPacket::new();
    info.add_station(Station::new("rua", HardwareType::Davis, StationId(1))).unwrap();
    server.send(info.into()).await.unwrap();

    assert_eq!(events.recv().await.unwrap(), ClientEvent::Ready(vec!["rua".into()]));

    // No further resends once answered
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(tokio::time::timeout(Duration::from_millis(10), server.next()).await.is_err());

    task.abort();
}
