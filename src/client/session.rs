//! Client session: compresses records and keeps per-station send state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::transmit::{Ticket, TransmitQueue};
use crate::config::ClientConfig;
use crate::diff::{self, CompressionAlgorithm, DiffBase};
use crate::error::{Result, SessionError};
use crate::fields::{calculate_encoded_size, FieldTable, FieldValues};
use crate::protocol::{
    AuthenticatePacket, LiveDataRecord, Packet, SampleAcknowledgementPacket, SampleDataRecord,
    StationInfoPacket, WeatherDataPacket,
};
use crate::stats::{ClientStatistics, PeriodStatistics};
use crate::types::{HardwareType, RecordKind, SampleData, SequenceId, StationId};

/// Capacity of the event channel.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Notifications for the application driving the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The server accepted the client for these stations. Sent once.
    Ready(Vec<String>),
    /// The server stored a sample.
    ReceiptConfirmation {
        station_code: String,
        timestamp: DateTime<Utc>,
    },
    /// The server rejected the authorisation code.
    AuthenticationFailed,
}

/// Source of the most recent sample the server has confirmed for a station.
///
/// Samples are only ever diffed against a confirmed sample, so this must only
/// return samples the server has acknowledged.
#[async_trait]
pub trait ConfirmedSampleSource: Send + Sync {
    async fn confirmed_sample(&self, station_code: &str) -> Result<Option<SampleData>>;
}

/// [`ConfirmedSampleSource`] backed by memory.
#[derive(Debug, Default)]
pub struct MemorySampleSource {
    samples: RwLock<HashMap<String, SampleData>>,
}

impl MemorySampleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample as confirmed. Older samples are ignored.
    pub fn confirm(&self, station_code: &str, sample: SampleData) {
        let mut samples = self.samples.write();
        match samples.get(station_code) {
            Some(current) if current.timestamp >= sample.timestamp => {}
            _ => {
                samples.insert(station_code.to_string(), sample);
            }
        }
    }
}

#[async_trait]
impl ConfirmedSampleSource for MemorySampleSource {
    async fn confirmed_sample(&self, station_code: &str) -> Result<Option<SampleData>> {
        Ok(self.samples.read().get(station_code).cloned())
    }
}

/// The last live record sent for a station.
#[derive(Debug, Clone)]
struct PreviousLive {
    values: FieldValues,
    sequence: SequenceId,
    ticket: Ticket,
}

/// Send state of one station.
#[derive(Debug)]
struct StationState {
    id: StationId,
    hardware_type: HardwareType,
    last_sequence: SequenceId,
    outgoing_samples: VecDeque<SampleData>,
    previous_live: Option<PreviousLive>,
    /// Compressed live records left before a full one is forced.
    compressed_live_remaining: u32,
    force_full: bool,
    transmit: TransmitQueue<Packet>,
}

impl StationState {
    fn new(id: StationId, hardware_type: HardwareType, max_compressed: u32) -> Self {
        Self {
            id,
            hardware_type,
            last_sequence: SequenceId::ZERO,
            outgoing_samples: VecDeque::new(),
            previous_live: None,
            compressed_live_remaining: max_compressed,
            force_full: false,
            transmit: TransmitQueue::new(),
        }
    }

    /// Take queued samples until their full-size total passes `budget`.
    ///
    /// The sample that crosses the budget is included.
    fn take_sample_batch(&mut self, budget: usize) -> Vec<SampleData> {
        let table = FieldTable::sample(self.hardware_type);
        let record_size = SampleDataRecord::HEADER_SIZE + calculate_encoded_size(table, table.data_ids()) + 1;

        let mut batch = Vec::new();
        let mut size = 0;
        while size <= budget {
            let Some(sample) = self.outgoing_samples.pop_front() else {
                break;
            };
            size += record_size;
            batch.push(sample);
        }
        batch
    }

    /// Give back a sequence id that was reserved but not sent, unless a
    /// later record has already taken the next one.
    fn release_sequence(&mut self, sequence: SequenceId) {
        if self.last_sequence == sequence {
            self.last_sequence = sequence.previous();
        }
    }

    fn record_compression(&mut self, algorithm: CompressionAlgorithm, max_compressed: u32) {
        if algorithm == CompressionAlgorithm::None {
            self.compressed_live_remaining = max_compressed;
            self.force_full = false;
            return;
        }

        self.compressed_live_remaining = self.compressed_live_remaining.saturating_sub(1);
        if self.compressed_live_remaining == 0 {
            self.force_full = true;
            self.compressed_live_remaining = max_compressed;
        }
    }
}

/// Work reserved under the lock before the confirmed sample is fetched.
struct Reservation {
    station_id: StationId,
    ticket: Ticket,
    sequence: SequenceId,
    samples: Vec<SampleData>,
    previous_live: Option<PreviousLive>,
    force_full: bool,
}

#[derive(Debug)]
struct ClientState {
    stations: HashMap<String, StationState>,
    station_codes: HashMap<StationId, String>,
    authenticated: bool,
    ready_sent: bool,
    statistics: PeriodStatistics<ClientStatistics>,
}

/// Client side of the push protocol.
///
/// Methods take `&self` and may be called from several tasks at once; the
/// session is usually shared in an [`Arc`]. Packets ready to transmit are
/// delivered, in order, on the receiver returned by [`ClientSession::new`].
pub struct ClientSession {
    config: ClientConfig,
    samples: Arc<dyn ConfirmedSampleSource>,
    state: Mutex<ClientState>,
    outgoing: mpsc::UnboundedSender<Packet>,
    events: broadcast::Sender<ClientEvent>,
}

impl ClientSession {
    pub fn new(
        config: ClientConfig,
        samples: Arc<dyn ConfirmedSampleSource>,
    ) -> (Self, mpsc::UnboundedReceiver<Packet>) {
        let (outgoing, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        let session = Self {
            config,
            samples,
            state: Mutex::new(ClientState {
                stations: HashMap::new(),
                station_codes: HashMap::new(),
                authenticated: false,
                ready_sent: false,
                statistics: PeriodStatistics::new("client"),
            }),
            outgoing,
            events,
        };
        (session, receiver)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Whether a station list has been received.
    pub fn is_authenticated(&self) -> bool {
        self.state.lock().authenticated
    }

    /// Codes of the stations the server accepted.
    pub fn station_codes(&self) -> Vec<String> {
        let mut codes: Vec<_> = self.state.lock().stations.keys().cloned().collect();
        codes.sort();
        codes
    }

    pub fn statistics(&self) -> PeriodStatistics<ClientStatistics> {
        self.state.lock().statistics.clone()
    }

    /// The Authenticate packet to send, counted as sent.
    pub fn authenticate_packet(&self) -> Packet {
        let packet = Packet::from(AuthenticatePacket::new(self.config.authorisation_code));
        self.state
            .lock()
            .statistics
            .log_packet(packet.packet_type(), packet.encoded_size());
        packet
    }

    /// Process a packet from the server.
    pub fn handle_packet(&self, packet: Packet) -> Result<()> {
        match packet {
            Packet::StationInfo(info) => self.handle_station_info(&info),
            Packet::SampleAcknowledgement(acks) => self.handle_acknowledgements(&acks),
            Packet::AuthenticateFailed => {
                warn!("Server rejected the authorisation code");
                let _ = self.events.send(ClientEvent::AuthenticationFailed);
                return Err(SessionError::AuthenticationFailed.into());
            }
            other => warn!(
                "Ignoring {} packet: not a server packet",
                other.packet_type().name()
            ),
        }
        Ok(())
    }

    fn handle_station_info(&self, info: &StationInfoPacket) {
        let mut state = self.state.lock();
        let max_compressed = self.config.max_compressed_live_records;

        let mut stations = HashMap::new();
        let mut station_codes = HashMap::new();
        for station in info.stations() {
            // Keep send state for stations the server still knows by the same id
            let current = state
                .stations
                .remove(&station.code)
                .filter(|s| s.id == station.id && s.hardware_type == station.hardware_type);
            let station_state = current
                .unwrap_or_else(|| StationState::new(station.id, station.hardware_type, max_compressed));

            debug!("Server accepts station {}", station);
            station_codes.insert(station.id, station.code.clone());
            stations.insert(station.code.clone(), station_state);
        }

        state.stations = stations;
        state.station_codes = station_codes;
        state.authenticated = true;
        info!("Authenticated for {} stations", state.stations.len());

        if !state.ready_sent {
            state.ready_sent = true;
            let mut codes: Vec<_> = state.stations.keys().cloned().collect();
            codes.sort();
            let _ = self.events.send(ClientEvent::Ready(codes));
        }
    }

    fn handle_acknowledgements(&self, acks: &SampleAcknowledgementPacket) {
        let state = self.state.lock();
        for &(station_id, timestamp) in acks.sample_acknowledgements() {
            let Some(code) = state.station_codes.get(&station_id) else {
                warn!("Acknowledgement for unknown station id {}", station_id);
                continue;
            };
            debug!("Server stored sample {} for {}", timestamp.to_rfc3339(), code);
            let _ = self.events.send(ClientEvent::ReceiptConfirmation {
                station_code: code.clone(),
                timestamp,
            });
        }
    }

    /// Queue a sample. It goes out with the station's next live record or
    /// on [`flush_samples`](Self::flush_samples).
    pub fn send_sample(&self, station_code: &str, sample: SampleData) -> Result<()> {
        let mut state = self.state.lock();
        let Some(station) = state.stations.get_mut(station_code) else {
            warn!(
                "Discarding sample: {}",
                SessionError::UnknownStation(station_code.to_string())
            );
            return Ok(());
        };

        check_values(station_code, station.hardware_type, RecordKind::Sample, &sample.values)?;
        station.outgoing_samples.push_back(sample);
        Ok(())
    }

    /// Send a live record along with any queued samples.
    pub async fn send_live(&self, station_code: &str, values: FieldValues) -> Result<()> {
        self.transmit(station_code, Some(values)).await
    }

    /// Send queued samples without waiting for a live record.
    pub async fn flush_samples(&self, station_code: &str) -> Result<()> {
        self.transmit(station_code, None).await
    }

    async fn transmit(&self, station_code: &str, live: Option<FieldValues>) -> Result<()> {
        let Some(reservation) = self.reserve(station_code, live.as_ref())? else {
            return Ok(());
        };

        let confirmed = self.samples.confirmed_sample(station_code).await;

        let mut state = self.state.lock();
        let ClientState {
            stations,
            statistics,
            ..
        } = &mut *state;

        let Some(station) = stations
            .get_mut(station_code)
            .filter(|s| s.id == reservation.station_id)
        else {
            debug!("Station {} was dropped while preparing its packet", station_code);
            return Ok(());
        };

        let confirmed = match confirmed {
            Ok(confirmed) => confirmed,
            Err(e) => {
                warn!("Confirmed sample lookup for {} failed: {}", station_code, e);
                if live.is_some() {
                    station.release_sequence(reservation.sequence);
                }
                for sample in reservation.samples.into_iter().rev() {
                    station.outgoing_samples.push_front(sample);
                }
                let ready = station.transmit.complete(reservation.ticket, None);
                self.send_ready(statistics, ready)?;
                return Err(e);
            }
        };

        let encoded = self.encode_packet(station, statistics, &reservation, live, confirmed.as_ref());
        let packet = match encoded {
            Ok(packet) => packet,
            Err(e) => {
                // Release the slot so later packets are not held back
                let ready = station.transmit.complete(reservation.ticket, None);
                self.send_ready(statistics, ready)?;
                return Err(e);
            }
        };

        let ready = station.transmit.complete(reservation.ticket, packet);
        self.send_ready(statistics, ready)
    }

    /// Assign a sequence id and reserve a transmission slot.
    fn reserve(&self, station_code: &str, live: Option<&FieldValues>) -> Result<Option<Reservation>> {
        let mut state = self.state.lock();
        let Some(station) = state.stations.get_mut(station_code) else {
            warn!(
                "Discarding live data: {}",
                SessionError::UnknownStation(station_code.to_string())
            );
            return Ok(None);
        };

        if let Some(values) = live {
            check_values(station_code, station.hardware_type, RecordKind::Live, values)?;
        } else if station.outgoing_samples.is_empty() {
            return Ok(None);
        }

        let sequence = if live.is_some() {
            station.last_sequence = station.last_sequence.next();
            station.last_sequence
        } else {
            station.last_sequence
        };

        Ok(Some(Reservation {
            station_id: station.id,
            ticket: station.transmit.reserve(),
            sequence,
            samples: station.take_sample_batch(self.config.max_sample_payload),
            previous_live: station.previous_live.clone(),
            force_full: station.force_full,
        }))
    }

    /// Build the packet for a reservation. `None` when there is nothing to send.
    fn encode_packet(
        &self,
        station: &mut StationState,
        statistics: &mut PeriodStatistics<ClientStatistics>,
        reservation: &Reservation,
        live: Option<FieldValues>,
        confirmed: Option<&SampleData>,
    ) -> Result<Option<Packet>> {
        let mut packet = WeatherDataPacket::new();

        // Each sample diffs against the one before it, the first against the
        // confirmed sample
        let mut sample_base = confirmed.map(|s| DiffBase::new(&s.values, s.timestamp));
        for sample in &reservation.samples {
            let encoding = diff::encode_sample(&sample.values, sample_base)?;
            statistics.log_sample_record(&encoding.stats);
            packet.add_record(SampleDataRecord {
                station_id: station.id,
                timestamp: sample.timestamp,
                download_timestamp: sample.download_timestamp,
                field_ids: encoding.encoded.field_ids,
                field_data: encoding.encoded.data,
            });
            sample_base = Some(DiffBase::new(&sample.values, sample.timestamp));
        }

        if let Some(values) = live {
            let sequence = reservation.sequence;
            let live_base = reservation
                .previous_live
                .as_ref()
                .map(|p| DiffBase::new(&p.values, p.sequence));

            let encoding = diff::encode_live(&values, live_base, sample_base, reservation.force_full)?;
            statistics.log_live_record(&encoding.stats);
            station.record_compression(encoding.stats.algorithm, self.config.max_compressed_live_records);

            match encoding.encoded {
                Some(encoded) => {
                    debug!(
                        "Live {} for station {} encoded as {}",
                        sequence, station.id, encoded.strategy
                    );
                    packet.add_record(LiveDataRecord {
                        station_id: station.id,
                        sequence_id: sequence,
                        field_ids: encoded.field_ids,
                        field_data: encoded.data,
                    });

                    let newer = station
                        .previous_live
                        .as_ref()
                        .map_or(true, |p| reservation.ticket > p.ticket);
                    if newer {
                        station.previous_live = Some(PreviousLive {
                            values,
                            sequence,
                            ticket: reservation.ticket,
                        });
                    }
                }
                None => {
                    debug!("Live {} for station {} unchanged, skipped", sequence, station.id);
                    station.release_sequence(sequence);
                }
            }
        }

        Ok((!packet.is_empty()).then(|| packet.into()))
    }

    fn send_ready(&self, statistics: &mut PeriodStatistics<ClientStatistics>, ready: Vec<Packet>) -> Result<()> {
        for packet in ready {
            statistics.log_packet(packet.packet_type(), packet.encoded_size());
            self.outgoing
                .send(packet)
                .map_err(|_| SessionError::ChannelClosed)?;
        }
        Ok(())
    }
}

fn check_values(station_code: &str, hardware_type: HardwareType, kind: RecordKind, values: &FieldValues) -> Result<()> {
    if values.kind() != kind {
        return Err(SessionError::WrongRecordKind {
            expected: kind,
            actual: values.kind(),
        }
        .into());
    }
    if values.hardware_type() != hardware_type {
        return Err(SessionError::HardwareMismatch {
            station: station_code.to_string(),
            expected: hardware_type,
            actual: values.hardware_type(),
        }
        .into());
    }
    Ok(())
}
