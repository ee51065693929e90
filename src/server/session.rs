//! Per-connection server state.
//!
//! A [`ServerSession`] is owned by the task driving one client connection and
//! processes that connection's packets strictly in arrival order. It keeps the
//! bases needed to reconstruct diffed records: a small cache of live records
//! per station, a cache of recent samples, and a stash of live records whose
//! base has not arrived yet.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info, warn};

use super::database::WeatherDatabase;
use crate::cache::BoundedCache;
use crate::config::ServerConfig;
use crate::diff::{self, DiffStrategy};
use crate::error::{ErrorContext, ProtocolError, Result, SessionError};
use crate::fields::FieldValues;
use crate::protocol::{
    LiveDataRecord, Packet, SampleAcknowledgementPacket, SampleDataRecord, StationInfoPacket,
    WeatherDataPacket, WeatherRecord,
};
use crate::stats::{PeriodStatistics, ServerStatistics};
use crate::types::{HardwareType, LiveData, SampleData, SequenceId, Station, StationId};

/// How many stashed records one live diff may pull in to rebuild its base.
const MAX_STASH_RETRY_DEPTH: u8 = 8;

/// Position of a live record's sequence id relative to the last accepted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Newer than the previous record. `missed` ids were skipped on the way.
    InOrder { missed: u16 },
    /// Same id as the previous record.
    Duplicate,
    /// Older than the previous record and not a counter wraparound.
    OutOfOrder,
}

/// Classify `current` against the previously accepted sequence id.
///
/// A backwards step of more than `wraparound_threshold` is taken to be the
/// 16-bit counter wrapping around.
pub fn classify_sequence(
    previous: Option<SequenceId>,
    current: SequenceId,
    wraparound_threshold: u16,
) -> SequenceCheck {
    let Some(previous) = previous else {
        return SequenceCheck::InOrder { missed: 0 };
    };

    let (p, s) = (previous.get(), current.get());
    if s == p {
        SequenceCheck::Duplicate
    } else if s > p {
        SequenceCheck::InOrder { missed: s - p - 1 }
    } else if p - s <= wraparound_threshold {
        SequenceCheck::OutOfOrder
    } else {
        SequenceCheck::InOrder {
            missed: u16::MAX - p + s,
        }
    }
}

/// Server side of one client connection.
pub struct ServerSession {
    config: ServerConfig,
    database: Arc<dyn WeatherDatabase>,
    authenticated: bool,
    stations: HashMap<StationId, Station>,
    hardware_types: HashMap<StationId, HardwareType>,
    live_cache: HashMap<StationId, BoundedCache<SequenceId, FieldValues>>,
    sample_cache: BoundedCache<(StationId, DateTime<Utc>), FieldValues>,
    /// Live records waiting for their base, per station.
    undecoded_live: HashMap<StationId, BTreeMap<SequenceId, LiveDataRecord>>,
    previous_live: HashMap<StationId, SequenceId>,
    lost_live: u8,
    statistics: PeriodStatistics<ServerStatistics>,
}

impl ServerSession {
    pub fn new(config: ServerConfig, database: Arc<dyn WeatherDatabase>) -> Self {
        let sample_cache = BoundedCache::new(config.sample_cache_size.max(1));
        Self {
            config,
            database,
            authenticated: false,
            stations: HashMap::new(),
            hardware_types: HashMap::new(),
            live_cache: HashMap::new(),
            sample_cache,
            undecoded_live: HashMap::new(),
            previous_live: HashMap::new(),
            lost_live: 0,
            statistics: PeriodStatistics::new("server"),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Stations accepted for this connection.
    pub fn stations(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    /// Rough count of live records lost in transit, saturating at 255.
    pub fn lost_live_estimate(&self) -> u8 {
        self.lost_live
    }

    /// Number of live records stashed for a station.
    pub fn stashed_live(&self, station_id: StationId) -> usize {
        self.undecoded_live.get(&station_id).map_or(0, BTreeMap::len)
    }

    pub fn statistics(&self) -> &PeriodStatistics<ServerStatistics> {
        &self.statistics
    }

    /// Process one packet from the client, returning the replies to send.
    pub async fn handle_packet(&mut self, packet: Packet) -> Result<Vec<Packet>> {
        let replies = match packet {
            Packet::Authenticate(p) => vec![self.authenticate(p.authorisation_code).await?],
            Packet::WeatherData(p) => self
                .process_weather_data(p)
                .await?
                .into_iter()
                .map(Packet::from)
                .collect(),
            other => {
                warn!(
                    "Ignoring {} packet: not a client packet",
                    other.packet_type().name()
                );
                Vec::new()
            }
        };

        for reply in &replies {
            self.statistics.log_packet(reply.packet_type(), reply.encoded_size());
        }

        Ok(replies)
    }

    /// Look up the stations for `authorisation_code` and build the reply.
    pub async fn authenticate(&mut self, authorisation_code: u32) -> Result<Packet> {
        let registrations = self.database.get_station_info(authorisation_code).await?;

        if registrations.is_empty() {
            warn!("Authentication failed: no stations for authorisation code");
            self.authenticated = false;
            return Ok(Packet::AuthenticateFailed);
        }

        self.reset_tracking();

        let mut info = StationInfoPacket::new();
        for registration in registrations {
            let station = Station::new(
                registration.code,
                registration.hardware_type,
                registration.assigned_id,
            );
            info.add_station(station.clone())?;
            debug!("Registered station {}", station);
            self.hardware_types.insert(station.id, station.hardware_type);
            self.stations.insert(station.id, station);
        }

        self.authenticated = true;
        info!("Client authenticated for {} stations", self.stations.len());
        Ok(info.into())
    }

    fn reset_tracking(&mut self) {
        self.stations.clear();
        self.hardware_types.clear();
        self.live_cache.clear();
        self.undecoded_live.clear();
        self.previous_live.clear();
        self.lost_live = 0;
    }

    /// Decode and store every record in the packet.
    ///
    /// Returns the acknowledgements for the samples received, split across
    /// as many packets as needed. Packets arriving before authentication are
    /// ignored.
    pub async fn process_weather_data(
        &mut self,
        mut packet: WeatherDataPacket,
    ) -> Result<Vec<SampleAcknowledgementPacket>> {
        if !self.authenticated {
            warn!("Ignoring weather data: {}", SessionError::NotAuthenticated);
            return Ok(Vec::new());
        }

        packet.decode_records(&self.hardware_types)?;

        let mut acknowledgements = Vec::new();
        let mut current = SampleAcknowledgementPacket::new();

        // A bad record is dropped on its own so acknowledgements for the
        // samples around it still go out
        for record in packet.into_records() {
            match record {
                WeatherRecord::Live(record) => {
                    let (station_id, sequence) = (record.station_id, record.sequence_id);
                    if let Err(e) = self.handle_live_record(record).await {
                        warn!("Dropping live {} for station {}: {}", sequence, station_id, e);
                        self.undecodable_live();
                    }
                }
                WeatherRecord::Sample(record) => {
                    let (station_id, timestamp) = (record.station_id, record.timestamp);
                    match self.handle_sample_record(record).await {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(e) => {
                            warn!(
                                "Dropping sample {} for station {}: {}",
                                timestamp.to_rfc3339(),
                                station_id,
                                e
                            );
                            self.statistics.log_undecodable_sample();
                            continue;
                        }
                    }
                    if !current.add_sample_acknowledgement(station_id, timestamp) {
                        acknowledgements.push(std::mem::take(&mut current));
                        current.add_sample_acknowledgement(station_id, timestamp);
                    }
                }
            }
        }

        if !current.is_empty() {
            acknowledgements.push(current);
        }

        self.statistics.set_lost_live_estimate(self.lost_live);
        Ok(acknowledgements)
    }

    async fn handle_live_record(&mut self, record: LiveDataRecord) -> Result<()> {
        let (station_id, sequence) = (record.station_id, record.sequence_id);

        let Some(values) = self.decode_live_record(record, 0).await? else {
            return Ok(());
        };

        let previous = self.previous_live.get(&station_id).copied();
        match classify_sequence(previous, sequence, self.config.wraparound_threshold) {
            SequenceCheck::Duplicate => {
                debug!("Ignoring live {} for station {}: duplicate", sequence, station_id);
                return Ok(());
            }
            SequenceCheck::OutOfOrder => {
                info!("Ignoring live {} for station {}: out of order", sequence, station_id);
                return Ok(());
            }
            SequenceCheck::InOrder { missed } => {
                if missed > 0 {
                    debug!(
                        "Station {} skipped {} live records before {}",
                        station_id, missed, sequence
                    );
                    self.record_lost_live(missed);
                }
            }
        }

        self.lost_live = self.lost_live.saturating_sub(1);
        self.previous_live.insert(station_id, sequence);

        let code = self.station(station_id)?.code.clone();
        self.database
            .store_live_data(&code, &LiveData::new(sequence, values))
            .await
    }

    /// Reconstruct a live record.
    ///
    /// Returns `None` when the diff base is unavailable. A newly received
    /// record (`depth` 0) is then stashed, and cached once decoded. Stashed
    /// records being retried to rebuild a base carry the retry depth.
    fn decode_live_record(&mut self, record: LiveDataRecord, depth: u8) -> BoxFuture<'_, Result<Option<FieldValues>>> {
        async move {
            let (station_id, sequence) = (record.station_id, record.sequence_id);
            let hardware_type = self.station(station_id)?.hardware_type;
            let (strategy, values) =
                diff::decode_live_fields(hardware_type, record.field_ids, &record.field_data)?;

            let decoded = match strategy {
                DiffStrategy::Full => {
                    self.discard_obsolete_stashed(station_id, sequence);
                    Some(values)
                }
                DiffStrategy::LiveDiff { base_sequence } if base_sequence == sequence => {
                    warn!("Dropping live {} for station {}: diff against itself", sequence, station_id);
                    self.undecodable_live();
                    return Ok(None);
                }
                DiffStrategy::LiveDiff { base_sequence } => {
                    debug!("Decode live {} based on {}", sequence, base_sequence);
                    match self.live_base(station_id, base_sequence, depth).await? {
                        Some(base) => Some(diff::patch_live_from_live(values, record.field_ids, &base)),
                        None => {
                            let context = ErrorContext {
                                station: Some(station_id),
                                sequence: Some(sequence),
                                operation: format!("live diff against {base_sequence}"),
                            };
                            warn!(
                                "{} ({})",
                                SessionError::MissingLiveBase {
                                    station: station_id,
                                    sequence
                                },
                                context
                            );
                            self.undecodable_live();
                            None
                        }
                    }
                }
                DiffStrategy::SampleDiff { base_timestamp } => {
                    match self.sample_base(station_id, base_timestamp).await? {
                        Some(base) => Some(diff::patch_live_from_sample(values, record.field_ids, &base)),
                        None => {
                            warn!(
                                "Live {} for station {} references sample {} which has not been received",
                                sequence,
                                station_id,
                                base_timestamp.to_rfc3339()
                            );
                            self.undecodable_live();
                            None
                        }
                    }
                }
            };

            let Some(values) = decoded else {
                if depth == 0 {
                    let stash = self.undecoded_live.entry(station_id).or_default();
                    stash.insert(sequence, record);
                    debug!(
                        "Undecoded live records for station {}: {:?}",
                        station_id,
                        stash.keys().map(|s| s.get()).collect::<Vec<_>>()
                    );
                }
                return Ok(None);
            };

            if depth == 0 {
                let capacity = self.config.live_cache_size.max(1);
                self.live_cache
                    .entry(station_id)
                    .or_insert_with(|| BoundedCache::new(capacity))
                    .insert(sequence, values.clone());
            }

            Ok(Some(values))
        }
        .boxed()
    }

    /// Base for a live diff: the live cache first, then the stash.
    ///
    /// A stashed base is taken out of the stash while it is retried, so
    /// records naming each other as base cannot loop.
    async fn live_base(&mut self, station_id: StationId, sequence: SequenceId, depth: u8) -> Result<Option<FieldValues>> {
        if let Some(values) = self.live_cache.get(&station_id).and_then(|c| c.get(&sequence)) {
            return Ok(Some(values.clone()));
        }

        if depth >= MAX_STASH_RETRY_DEPTH {
            debug!("Not retrying stashed live {} for station {}: chain too long", sequence, station_id);
            return Ok(None);
        }

        let Some(stashed) = self
            .undecoded_live
            .get_mut(&station_id)
            .and_then(|stash| stash.remove(&sequence))
        else {
            return Ok(None);
        };

        debug!("Found live {} for station {} in the undecoded store, retrying", sequence, station_id);
        let recovered = self.decode_live_record(stashed.clone(), depth + 1).await;

        match recovered {
            Ok(Some(values)) => {
                info!("Recovered stashed live {} for station {}", sequence, station_id);
                self.statistics.log_recovered_live();
                Ok(Some(values))
            }
            other => {
                self.undecoded_live.entry(station_id).or_default().insert(sequence, stashed);
                other
            }
        }
    }

    /// Base for a sample diff: the sample cache, then the database.
    async fn sample_base(&mut self, station_id: StationId, timestamp: DateTime<Utc>) -> Result<Option<FieldValues>> {
        if let Some(values) = self.sample_cache.get(&(station_id, timestamp)) {
            return Ok(Some(values.clone()));
        }

        let station = self.station(station_id)?;
        let (code, hardware_type) = (station.code.clone(), station.hardware_type);
        let Some(sample) = self.database.get_sample(&code, timestamp, hardware_type).await? else {
            return Ok(None);
        };

        self.sample_cache.insert((station_id, timestamp), sample.values.clone());
        Ok(Some(sample.values))
    }

    /// Drop stashed records a full record has made obsolete: those before it
    /// and those too far ahead of it to be anything but wrapped-around ids.
    fn discard_obsolete_stashed(&mut self, station_id: StationId, sequence: SequenceId) {
        let Some(stash) = self.undecoded_live.get_mut(&station_id) else {
            return;
        };

        let newest = u32::from(sequence.get()) + u32::from(self.config.stash_window);
        stash.retain(|&key, _| {
            let keep = key >= sequence && u32::from(key.get()) <= newest;
            if !keep {
                debug!(
                    "Discarding live {} for station {}: made obsolete by full live {}",
                    key, station_id, sequence
                );
            }
            keep
        });
    }

    /// Decode and store a sample. Returns whether it should be acknowledged.
    async fn handle_sample_record(&mut self, record: SampleDataRecord) -> Result<bool> {
        let station = self.station(record.station_id)?.clone();
        let (strategy, values) =
            diff::decode_sample_fields(station.hardware_type, record.field_ids, &record.field_data)?;

        let values = match strategy {
            DiffStrategy::SampleDiff { base_timestamp } => {
                match self.sample_base(record.station_id, base_timestamp).await? {
                    Some(base) => diff::patch_sample(values, record.field_ids, &base),
                    None => {
                        warn!(
                            "Sample {} for station {} ignored: it depends on {} which has not been received",
                            record.timestamp.to_rfc3339(),
                            station.code,
                            base_timestamp.to_rfc3339()
                        );
                        self.statistics.log_undecodable_sample();
                        return Ok(false);
                    }
                }
            }
            DiffStrategy::Full | DiffStrategy::LiveDiff { .. } => values,
        };

        let key = (record.station_id, record.timestamp);
        if self.sample_cache.contains(&key) {
            debug!(
                "Sample {} for station {} already stored",
                record.timestamp.to_rfc3339(),
                station.code
            );
            self.statistics.log_duplicate_sample();
            return Ok(true);
        }

        self.sample_cache.insert(key, values.clone());
        let sample = SampleData::new(record.timestamp, record.download_timestamp, values);
        self.database.store_sample(&station.code, &sample).await?;
        Ok(true)
    }

    fn station(&self, station_id: StationId) -> Result<&Station> {
        self.stations
            .get(&station_id)
            .ok_or_else(|| ProtocolError::UnknownStation(station_id).into())
    }

    fn undecodable_live(&mut self) {
        self.record_lost_live(1);
        self.statistics.log_undecodable_live();
    }

    fn record_lost_live(&mut self, count: u16) {
        let lost = u16::from(self.lost_live).saturating_add(count);
        self.lost_live = u8::try_from(lost).unwrap_or(u8::MAX);
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::diff::DiffBase;
    use crate::protocol::{AuthenticatePacket, PacketType};
    use crate::server::database::{MemoryDatabase, StationRegistration};

    const AUTH_CODE: u32 = 0x0102_0304;
    const STATION: StationId = StationId(1);

    fn session() -> (ServerSession, Arc<MemoryDatabase>) {
        let db = Arc::new(MemoryDatabase::new());
        db.add_station(
            AUTH_CODE,
            StationRegistration::new("test", HardwareType::Generic, 10, STATION),
        );
        (ServerSession::new(ServerConfig::default(), db.clone()), db)
    }

    async fn authenticated() -> (ServerSession, Arc<MemoryDatabase>) {
        let (mut server, db) = session();
        server.authenticate(AUTH_CODE).await.unwrap();
        (server, db)
    }

    fn live(temperature: f64) -> FieldValues {
        FieldValues::live(HardwareType::Generic)
            .value("temperature", temperature)
            .value("humidity", 60)
            .value("pressure", 1012.5)
            .build()
            .unwrap()
    }

    fn sample(temperature: f64) -> FieldValues {
        FieldValues::sample(HardwareType::Generic)
            .value("temperature", temperature)
            .value("humidity", 60)
            .value("rainfall", 0.3)
            .build()
            .unwrap()
    }

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 3, 1, 12, minute, 0).unwrap()
    }

    fn full_live(sequence: u16, values: &FieldValues) -> LiveDataRecord {
        let encoded = diff::encode_live(values, None, None, true).unwrap().encoded.unwrap();
        LiveDataRecord {
            station_id: STATION,
            sequence_id: SequenceId(sequence),
            field_ids: encoded.field_ids,
            field_data: encoded.data,
        }
    }

    fn diff_live(sequence: u16, values: &FieldValues, base_sequence: u16, base: &FieldValues) -> LiveDataRecord {
        let encoding = diff::encode_live(values, Some(DiffBase::new(base, SequenceId(base_sequence))), None, false).unwrap();
        let encoded = encoding.encoded.unwrap();
        assert!(matches!(encoded.strategy, DiffStrategy::LiveDiff { .. }));
        LiveDataRecord {
            station_id: STATION,
            sequence_id: SequenceId(sequence),
            field_ids: encoded.field_ids,
            field_data: encoded.data,
        }
    }

    fn sample_record(timestamp: DateTime<Utc>, values: &FieldValues, base: Option<(DateTime<Utc>, &FieldValues)>) -> SampleDataRecord {
        let encoded = diff::encode_sample(values, base.map(|(t, v)| DiffBase::new(v, t))).unwrap().encoded;
        SampleDataRecord {
            station_id: STATION,
            timestamp,
            download_timestamp: timestamp,
            field_ids: encoded.field_ids,
            field_data: encoded.data,
        }
    }

    fn packet(records: Vec<WeatherRecord>) -> WeatherDataPacket {
        let mut packet = WeatherDataPacket::new();
        for record in records {
            packet.add_record(record);
        }
        packet
    }

    fn stored_sequences(db: &MemoryDatabase) -> Vec<u16> {
        db.live_data("test").iter().map(|l| l.sequence_id.get()).collect()
    }

    #[test]
    fn test_classify_sequence() {
        let threshold = 60000;
        let check = |p: Option<u16>, s: u16| classify_sequence(p.map(SequenceId), SequenceId(s), threshold);

        assert_eq!(check(None, 17), SequenceCheck::InOrder { missed: 0 });
        assert_eq!(check(Some(5), 6), SequenceCheck::InOrder { missed: 0 });
        assert_eq!(check(Some(5), 9), SequenceCheck::InOrder { missed: 3 });
        assert_eq!(check(Some(5), 5), SequenceCheck::Duplicate);
        assert_eq!(check(Some(9), 5), SequenceCheck::OutOfOrder);
        assert_eq!(check(Some(60005), 5), SequenceCheck::OutOfOrder);
        assert_eq!(check(Some(65535), 0), SequenceCheck::InOrder { missed: 0 });
        assert_eq!(check(Some(65530), 3), SequenceCheck::InOrder { missed: 8 });
    }

    #[tokio::test]
    async fn test_authenticate() {
        let (mut server, _db) = session();

        let reply = server
            .handle_packet(Packet::Authenticate(AuthenticatePacket::new(99)))
            .await
            .unwrap();
        assert_eq!(reply, vec![Packet::AuthenticateFailed]);
        assert!(!server.is_authenticated());

        let reply = server.authenticate(AUTH_CODE).await.unwrap();
        let Packet::StationInfo(info) = reply else {
            panic!("expected station info");
        };
        assert_eq!(info.stations(), &[Station::new("test", HardwareType::Generic, STATION)]);
        assert!(server.is_authenticated());
        assert_eq!(server.statistics().today().sent(PacketType::AuthenticateFailed).count, 1);
    }

    #[tokio::test]
    async fn test_weather_data_ignored_before_authentication() {
        let (mut server, db) = session();
        let acks = server
            .process_weather_data(packet(vec![full_live(1, &live(20.0)).into()]))
            .await
            .unwrap();
        assert!(acks.is_empty());
        assert!(db.live_data("test").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_station_rejects_packet() {
        let (mut server, _db) = authenticated().await;
        let mut record = full_live(1, &live(20.0));
        record.station_id = StationId(9);

        let bytes = Packet::from(packet(vec![record.into()])).encode().unwrap();
        let Packet::WeatherData(received) = Packet::decode(&bytes).unwrap() else {
            panic!("expected weather data");
        };

        assert!(server.process_weather_data(received).await.is_err());
    }

    #[tokio::test]
    async fn test_live_diff_reconstructed() {
        let (mut server, db) = authenticated().await;
        let first = live(20.5);
        let second = live(21.0);

        server
            .process_weather_data(packet(vec![full_live(1, &first).into(), diff_live(2, &second, 1, &first).into()]))
            .await
            .unwrap();

        let stored = db.live_data("test");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].values.get_f64("temperature"), Some(21.0));
        assert_eq!(stored[1].values.get_f64("pressure"), Some(1012.5));
        assert_eq!(stored[1].values.get_i64("humidity"), Some(60));
    }

    #[tokio::test]
    async fn test_out_of_order_and_duplicate_live_dropped() {
        let (mut server, db) = authenticated().await;
        let values = live(20.0);

        for sequence in [5, 3, 5, 6] {
            server
                .process_weather_data(packet(vec![full_live(sequence, &values).into()]))
                .await
                .unwrap();
        }

        assert_eq!(stored_sequences(&db), vec![5, 6]);
        assert_eq!(server.lost_live_estimate(), 0);
    }

    #[tokio::test]
    async fn test_lost_live_estimate_across_wraparound() {
        let (mut server, db) = authenticated().await;
        let values = live(20.0);

        server
            .process_weather_data(packet(vec![full_live(65530, &values).into(), full_live(3, &values).into()]))
            .await
            .unwrap();

        assert_eq!(stored_sequences(&db), vec![65530, 3]);
        assert_eq!(server.lost_live_estimate(), 7);
        assert_eq!(server.statistics().today().lost_live_estimate, 7);
    }

    #[tokio::test]
    async fn test_stashed_live_recovered() {
        let (mut server, db) = authenticated().await;
        let v2 = live(20.0);
        let v3 = live(20.5);
        let v4 = live(21.0);

        // Live 3 arrives before its base
        server
            .process_weather_data(packet(vec![diff_live(3, &v3, 2, &v2).into()]))
            .await
            .unwrap();
        assert_eq!(server.stashed_live(STATION), 1);
        assert_eq!(server.statistics().today().undecodable_live, 1);

        // Live 4 depends on the stashed 3, which can now be decoded
        server
            .process_weather_data(packet(vec![full_live(2, &v2).into(), diff_live(4, &v4, 3, &v3).into()]))
            .await
            .unwrap();

        assert_eq!(server.stashed_live(STATION), 0);
        assert_eq!(server.statistics().today().recovered_live, 1);
        assert_eq!(stored_sequences(&db), vec![2, 4]);
        assert_eq!(db.live_data("test")[1].values.get_f64("temperature"), Some(21.0));
    }

    #[tokio::test]
    async fn test_live_diff_against_itself_dropped() {
        let (mut server, db) = authenticated().await;
        let v3 = live(20.5);
        let v4 = live(21.0);

        server
            .process_weather_data(packet(vec![
                diff_live(3, &v3, 3, &v4).into(),
                diff_live(4, &v4, 3, &v3).into(),
            ]))
            .await
            .unwrap();

        assert_eq!(server.stashed_live(STATION), 1);
        assert!(db.live_data("test").is_empty());
        assert_eq!(server.statistics().today().undecodable_live, 2);
    }

    #[tokio::test]
    async fn test_stashed_records_referencing_each_other() {
        let (mut server, db) = authenticated().await;
        let v3 = live(20.5);
        let v4 = live(21.0);
        let v5 = live(21.5);

        server
            .process_weather_data(packet(vec![
                diff_live(3, &v3, 4, &v4).into(),
                diff_live(4, &v4, 3, &v3).into(),
                diff_live(5, &v5, 3, &v3).into(),
            ]))
            .await
            .unwrap();

        assert_eq!(server.stashed_live(STATION), 3);
        assert!(db.live_data("test").is_empty());
        assert_eq!(server.statistics().today().recovered_live, 0);
    }

    #[tokio::test]
    async fn test_stashed_chain_recovered() {
        let (mut server, db) = authenticated().await;
        let values: Vec<FieldValues> = (0..6).map(|i| live(20.0 + f64::from(i))).collect();

        server
            .process_weather_data(packet(vec![
                diff_live(3, &values[3], 2, &values[2]).into(),
                diff_live(4, &values[4], 3, &values[3]).into(),
            ]))
            .await
            .unwrap();
        assert_eq!(server.stashed_live(STATION), 2);

        server
            .process_weather_data(packet(vec![
                full_live(2, &values[2]).into(),
                diff_live(5, &values[5], 4, &values[4]).into(),
            ]))
            .await
            .unwrap();

        assert_eq!(stored_sequences(&db), vec![2, 5]);
        assert_eq!(db.live_data("test")[1].values.get_f64("temperature"), Some(25.0));
        assert_eq!(server.stashed_live(STATION), 0);
        assert_eq!(server.statistics().today().recovered_live, 2);
    }

    #[tokio::test]
    async fn test_long_stashed_chain_not_retried() {
        let (mut server, db) = authenticated().await;
        let values: Vec<FieldValues> = (0..22).map(|i| live(10.0 + f64::from(i))).collect();

        let chain: Vec<WeatherRecord> = (3..=20)
            .map(|s| diff_live(s, &values[usize::from(s)], s - 1, &values[usize::from(s - 1)]).into())
            .collect();
        server.process_weather_data(packet(chain)).await.unwrap();
        assert_eq!(server.stashed_live(STATION), 18);

        server
            .process_weather_data(packet(vec![
                full_live(2, &values[2]).into(),
                diff_live(21, &values[21], 20, &values[20]).into(),
            ]))
            .await
            .unwrap();

        assert_eq!(stored_sequences(&db), vec![2]);
        assert_eq!(server.stashed_live(STATION), 19);
    }

    #[tokio::test]
    async fn test_full_live_discards_obsolete_stash() {
        let (mut server, _db) = authenticated().await;
        let base = live(20.0);
        let next = live(20.5);

        server
            .process_weather_data(packet(vec![
                diff_live(3, &next, 2, &base).into(),
                diff_live(500, &next, 499, &base).into(),
                diff_live(12, &next, 11, &base).into(),
            ]))
            .await
            .unwrap();
        assert_eq!(server.stashed_live(STATION), 3);

        server
            .process_weather_data(packet(vec![full_live(10, &base).into()]))
            .await
            .unwrap();
        assert_eq!(server.stashed_live(STATION), 1);
    }

    #[tokio::test]
    async fn test_samples_acknowledged_and_diffed() {
        let (mut server, db) = authenticated().await;
        let base = sample(10.0);
        db.insert_sample("test", SampleData::new(ts(0), ts(0), base.clone()));

        let next = sample(10.5);
        let acks = server
            .process_weather_data(packet(vec![
                sample_record(ts(5), &next, Some((ts(0), &base))).into(),
                sample_record(ts(10), &next, Some((ts(7), &base))).into(),
            ]))
            .await
            .unwrap();

        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].sample_acknowledgements(), &[(STATION, ts(5))]);
        assert_eq!(server.statistics().today().undecodable_sample, 1);

        let stored = db.samples("test");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].timestamp, ts(5));
        assert_eq!(stored[1].values.get_f64("temperature"), Some(10.5));
        assert_eq!(stored[1].values.get_f64("rainfall"), Some(0.3));
    }

    #[tokio::test]
    async fn test_bad_record_keeps_acknowledgements() {
        let (mut server, db) = authenticated().await;
        let mut bad = full_live(1, &live(20.0));
        // Field 11 is not defined for generic live records
        bad.field_ids = bad.field_ids.with(11);

        let acks = server
            .process_weather_data(packet(vec![
                sample_record(ts(0), &sample(10.0), None).into(),
                bad.into(),
                sample_record(ts(5), &sample(10.5), None).into(),
            ]))
            .await
            .unwrap();

        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].sample_acknowledgements(), &[(STATION, ts(0)), (STATION, ts(5))]);
        assert_eq!(db.samples("test").len(), 2);
        assert!(db.live_data("test").is_empty());
        assert_eq!(server.statistics().today().undecodable_live, 1);
    }

    #[tokio::test]
    async fn test_zero_cache_sizes_clamped() {
        let config = ServerConfig {
            live_cache_size: 0,
            sample_cache_size: 0,
            ..Default::default()
        };
        let db = Arc::new(MemoryDatabase::new());
        db.add_station(AUTH_CODE, StationRegistration::new("test", HardwareType::Generic, 10, STATION));
        let mut server = ServerSession::new(config, db.clone());
        server.authenticate(AUTH_CODE).await.unwrap();

        let first = live(20.5);
        server
            .process_weather_data(packet(vec![full_live(1, &first).into(), diff_live(2, &live(21.0), 1, &first).into()]))
            .await
            .unwrap();

        assert_eq!(stored_sequences(&db), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_sample_acknowledged_once_stored() {
        let (mut server, db) = authenticated().await;
        let values = sample(10.0);

        for _ in 0..2 {
            let acks = server
                .process_weather_data(packet(vec![sample_record(ts(0), &values, None).into()]))
                .await
                .unwrap();
            assert_eq!(acks[0].len(), 1);
        }

        assert_eq!(db.samples("test").len(), 1);
        assert_eq!(server.statistics().today().duplicate_samples, 1);
    }

    #[tokio::test]
    async fn test_acknowledgements_split_when_full() {
        let (mut server, db) = authenticated().await;
        let values = sample(10.0);
        let base = Utc.with_ymd_and_hms(2016, 3, 1, 0, 0, 0).unwrap();

        let records: Vec<WeatherRecord> = (0..300)
            .map(|i| sample_record(base + chrono::Duration::minutes(i), &values, None).into())
            .collect();
        let acks = server.process_weather_data(packet(records)).await.unwrap();

        assert_eq!(acks.len(), 2);
        assert_eq!(acks[0].len(), 255);
        assert_eq!(acks[1].len(), 45);
        assert_eq!(db.samples("test").len(), 300);
    }
}
