//! Session statistics.
//!
//! Each collector keeps four buckets: today, this ISO week, this month and
//! all time. When an update arrives on a new day (or week, or month) the
//! finished bucket is logged and reset.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::diff::{CompressionAlgorithm, CompressionStats};
use crate::protocol::PacketType;

/// Records sent with one compression algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordCounter {
    pub count: u64,
    /// Bytes the records would have taken sent in full.
    pub unencoded_bytes: u64,
    /// Bytes actually sent.
    pub encoded_bytes: u64,
}

impl RecordCounter {
    fn add(&mut self, stats: &CompressionStats) {
        self.count += 1;
        self.unencoded_bytes += stats.uncompressed_size as u64;
        self.encoded_bytes += stats.encoded_size() as u64;
    }
}

/// Packets of one type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PacketCounter {
    pub count: u64,
    pub bytes: u64,
}

impl PacketCounter {
    fn add(&mut self, size: usize) {
        self.count += 1;
        self.bytes += size as u64;
    }
}

/// Client statistics for one period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientStatistics {
    pub live: BTreeMap<CompressionAlgorithm, RecordCounter>,
    pub samples: BTreeMap<CompressionAlgorithm, RecordCounter>,
    pub packets: BTreeMap<&'static str, PacketCounter>,
}

impl ClientStatistics {
    pub fn live_records(&self) -> u64 {
        self.live.values().map(|c| c.count).sum()
    }

    pub fn sample_records(&self) -> u64 {
        self.samples.values().map(|c| c.count).sum()
    }

    pub fn live_with(&self, algorithm: CompressionAlgorithm) -> RecordCounter {
        self.live.get(&algorithm).copied().unwrap_or_default()
    }

    pub fn samples_with(&self, algorithm: CompressionAlgorithm) -> RecordCounter {
        self.samples.get(&algorithm).copied().unwrap_or_default()
    }

    pub fn packets_of(&self, packet_type: PacketType) -> PacketCounter {
        self.packets.get(packet_type.name()).copied().unwrap_or_default()
    }
}

impl fmt::Display for ClientStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "live={} samples={}", self.live_records(), self.sample_records())?;
        for (algorithm, c) in &self.live {
            write!(f, " live.{algorithm}={}/{}B/{}B", c.count, c.unencoded_bytes, c.encoded_bytes)?;
        }
        for (algorithm, c) in &self.samples {
            write!(f, " sample.{algorithm}={}/{}B/{}B", c.count, c.unencoded_bytes, c.encoded_bytes)?;
        }
        for (name, c) in &self.packets {
            write!(f, " packets.{name}={}/{}B", c.count, c.bytes)?;
        }
        Ok(())
    }
}

/// Server statistics for one period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerStatistics {
    pub sent_packets: BTreeMap<&'static str, PacketCounter>,
    /// Samples received more than once.
    pub duplicate_samples: u64,
    /// Live records dropped because their diff base never arrived.
    pub undecodable_live: u64,
    /// Sample-diff records whose base was unavailable.
    pub undecodable_sample: u64,
    /// Stashed live records decoded once their base arrived.
    pub recovered_live: u64,
    /// Rough estimate of live records in flight that were lost.
    pub lost_live_estimate: u8,
}

impl ServerStatistics {
    pub fn sent(&self, packet_type: PacketType) -> PacketCounter {
        self.sent_packets.get(packet_type.name()).copied().unwrap_or_default()
    }
}

impl fmt::Display for ServerStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "duplicate_samples={} undecodable_live={} undecodable_sample={} recovered_live={} lost_live={}",
            self.duplicate_samples,
            self.undecodable_live,
            self.undecodable_sample,
            self.recovered_live,
            self.lost_live_estimate
        )?;
        for (name, c) in &self.sent_packets {
            write!(f, " sent.{name}={}/{}B", c.count, c.bytes)?;
        }
        Ok(())
    }
}

/// Day, week, month and all-time buckets of one statistics type.
#[derive(Debug, Clone)]
pub struct PeriodStatistics<T> {
    name: &'static str,
    date: NaiveDate,
    today: T,
    week: T,
    month: T,
    all_time: T,
}

impl<T: Default + fmt::Display> PeriodStatistics<T> {
    pub fn new(name: &'static str) -> Self {
        Self::starting(name, Utc::now().date_naive())
    }

    /// Collector whose current day is `date`.
    pub fn starting(name: &'static str, date: NaiveDate) -> Self {
        Self {
            name,
            date,
            today: T::default(),
            week: T::default(),
            month: T::default(),
            all_time: T::default(),
        }
    }

    /// Apply `f` to every bucket.
    pub fn update(&mut self, f: impl Fn(&mut T)) {
        self.update_on(Utc::now().date_naive(), f);
    }

    /// Apply `f` to every bucket, rolling periods over first if `date` is
    /// past the current day.
    pub fn update_on(&mut self, date: NaiveDate, f: impl Fn(&mut T)) {
        self.roll_over(date);
        f(&mut self.today);
        f(&mut self.week);
        f(&mut self.month);
        f(&mut self.all_time);
    }

    fn roll_over(&mut self, date: NaiveDate) {
        if date == self.date {
            return;
        }

        info!("{} statistics for day {}: {}", self.name, self.date, self.today);
        info!("{} statistics all time: {}", self.name, self.all_time);
        self.today = T::default();

        if date.iso_week() != self.date.iso_week() {
            info!(
                "{} statistics for week {}: {}",
                self.name,
                self.date.iso_week().week(),
                self.week
            );
            self.week = T::default();
        }

        if (date.year(), date.month()) != (self.date.year(), self.date.month()) {
            info!(
                "{} statistics for month {}-{:02}: {}",
                self.name,
                self.date.year(),
                self.date.month(),
                self.month
            );
            self.month = T::default();
        }

        self.date = date;
    }

    pub fn today(&self) -> &T {
        &self.today
    }

    pub fn week(&self) -> &T {
        &self.week
    }

    pub fn month(&self) -> &T {
        &self.month
    }

    pub fn all_time(&self) -> &T {
        &self.all_time
    }
}

impl PeriodStatistics<ClientStatistics> {
    pub fn log_live_record(&mut self, stats: &CompressionStats) {
        self.update(|s| s.live.entry(stats.algorithm).or_default().add(stats));
    }

    pub fn log_sample_record(&mut self, stats: &CompressionStats) {
        self.update(|s| s.samples.entry(stats.algorithm).or_default().add(stats));
    }

    pub fn log_packet(&mut self, packet_type: PacketType, size: usize) {
        self.update(|s| s.packets.entry(packet_type.name()).or_default().add(size));
    }
}

impl PeriodStatistics<ServerStatistics> {
    pub fn log_packet(&mut self, packet_type: PacketType, size: usize) {
        self.update(|s| s.sent_packets.entry(packet_type.name()).or_default().add(size));
    }

    pub fn log_duplicate_sample(&mut self) {
        self.update(|s| s.duplicate_samples += 1);
    }

    pub fn log_undecodable_live(&mut self) {
        self.update(|s| s.undecodable_live += 1);
    }

    pub fn log_undecodable_sample(&mut self) {
        self.update(|s| s.undecodable_sample += 1);
    }

    pub fn log_recovered_live(&mut self) {
        self.update(|s| s.recovered_live += 1);
    }

    pub fn set_lost_live_estimate(&mut self, lost: u8) {
        self.update(|s| s.lost_live_estimate = lost);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn live(algorithm: CompressionAlgorithm, saving: usize) -> CompressionStats {
        CompressionStats {
            uncompressed_size: 40,
            saving,
            algorithm,
        }
    }

    #[test]
    fn test_client_counters() {
        let mut stats = ClientStatistics::default();
        stats.live.entry(CompressionAlgorithm::LiveDiff).or_default().add(&live(CompressionAlgorithm::LiveDiff, 30));
        stats.live.entry(CompressionAlgorithm::LiveDiff).or_default().add(&live(CompressionAlgorithm::LiveDiff, 36));
        stats.packets.entry(PacketType::WeatherData.name()).or_default().add(20);

        let counter = stats.live_with(CompressionAlgorithm::LiveDiff);
        assert_eq!(counter.count, 2);
        assert_eq!(counter.unencoded_bytes, 80);
        assert_eq!(counter.encoded_bytes, 14);
        assert_eq!(stats.live_records(), 2);
        assert_eq!(stats.packets_of(PacketType::WeatherData).bytes, 20);
        assert_eq!(stats.packets_of(PacketType::Authenticate).count, 0);
    }

    #[test]
    fn test_day_rollover_keeps_week_and_month() {
        // 2016-03-01 is a Tuesday
        let mut periods = PeriodStatistics::<ServerStatistics>::starting("server", day(2016, 3, 1));
        periods.update_on(day(2016, 3, 1), |s| s.recovered_live += 1);
        periods.update_on(day(2016, 3, 2), |s| s.recovered_live += 1);

        assert_eq!(periods.today().recovered_live, 1);
        assert_eq!(periods.week().recovered_live, 2);
        assert_eq!(periods.month().recovered_live, 2);
        assert_eq!(periods.all_time().recovered_live, 2);
    }

    #[test]
    fn test_week_and_month_rollover() {
        let mut periods = PeriodStatistics::<ServerStatistics>::starting("server", day(2016, 2, 28));
        periods.update_on(day(2016, 2, 28), |s| s.duplicate_samples += 1);

        // Monday 2016-02-29: new ISO week, same month
        periods.update_on(day(2016, 2, 29), |s| s.duplicate_samples += 1);
        assert_eq!(periods.week().duplicate_samples, 1);
        assert_eq!(periods.month().duplicate_samples, 2);

        // Tuesday 2016-03-01: same week, new month
        periods.update_on(day(2016, 3, 1), |s| s.duplicate_samples += 1);
        assert_eq!(periods.today().duplicate_samples, 1);
        assert_eq!(periods.week().duplicate_samples, 2);
        assert_eq!(periods.month().duplicate_samples, 1);
        assert_eq!(periods.all_time().duplicate_samples, 3);
    }
}
