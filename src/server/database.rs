//! Storage collaborator used by the server session.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::Result;
use crate::types::{HardwareType, LiveData, SampleData, StationId};

/// A station registered against an authorisation code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationRegistration {
    /// Station code.
    pub code: String,
    pub hardware_type: HardwareType,
    /// Database id of the station.
    pub real_id: i64,
    /// Id used on the wire.
    pub assigned_id: StationId,
}

impl StationRegistration {
    pub fn new(code: impl Into<String>, hardware_type: HardwareType, real_id: i64, assigned_id: StationId) -> Self {
        Self {
            code: code.into(),
            hardware_type,
            real_id,
            assigned_id,
        }
    }
}

/// Weather database operations the server depends on.
#[async_trait]
pub trait WeatherDatabase: Send + Sync {
    /// Stations the holder of `authorisation_code` may submit data for.
    /// An empty list rejects the client.
    async fn get_station_info(&self, authorisation_code: u32) -> Result<Vec<StationRegistration>>;

    /// A stored sample, used as a diff base.
    async fn get_sample(
        &self,
        station_code: &str,
        timestamp: DateTime<Utc>,
        hardware_type: HardwareType,
    ) -> Result<Option<SampleData>>;

    async fn store_live_data(&self, station_code: &str, live: &LiveData) -> Result<()>;

    async fn store_sample(&self, station_code: &str, sample: &SampleData) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    stations: HashMap<u32, Vec<StationRegistration>>,
    live: HashMap<String, Vec<LiveData>>,
    samples: HashMap<String, BTreeMap<DateTime<Utc>, SampleData>>,
}

/// In-memory [`WeatherDatabase`].
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: RwLock<MemoryState>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a station for an authorisation code.
    pub fn add_station(&self, authorisation_code: u32, registration: StationRegistration) {
        self.state
            .write()
            .stations
            .entry(authorisation_code)
            .or_default()
            .push(registration);
    }

    /// Store a sample directly, bypassing the protocol.
    pub fn insert_sample(&self, station_code: &str, sample: SampleData) {
        self.state
            .write()
            .samples
            .entry(station_code.to_string())
            .or_default()
            .insert(sample.timestamp, sample);
    }

    /// Live records stored for a station, oldest first.
    pub fn live_data(&self, station_code: &str) -> Vec<LiveData> {
        self.state.read().live.get(station_code).cloned().unwrap_or_default()
    }

    /// Samples stored for a station in timestamp order.
    pub fn samples(&self, station_code: &str) -> Vec<SampleData> {
        self.state
            .read()
            .samples
            .get(station_code)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl WeatherDatabase for MemoryDatabase {
    async fn get_station_info(&self, authorisation_code: u32) -> Result<Vec<StationRegistration>> {
        Ok(self
            .state
            .read()
            .stations
            .get(&authorisation_code)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_sample(
        &self,
        station_code: &str,
        timestamp: DateTime<Utc>,
        hardware_type: HardwareType,
    ) -> Result<Option<SampleData>> {
        let state = self.state.read();
        Ok(state
            .samples
            .get(station_code)
            .and_then(|s| s.get(&timestamp))
            .filter(|s| s.values.hardware_type() == hardware_type)
            .cloned())
    }

    async fn store_live_data(&self, station_code: &str, live: &LiveData) -> Result<()> {
        self.state
            .write()
            .live
            .entry(station_code.to_string())
            .or_default()
            .push(live.clone());
        Ok(())
    }

    async fn store_sample(&self, station_code: &str, sample: &SampleData) -> Result<()> {
        self.insert_sample(station_code, sample.clone());
        Ok(())
    }
}
