//! Simulated traffic-data source.
//!
//! Stands in for the detection hardware: per-channel flow counts and
//! timing figures drift randomly once per update, and running totals
//! feed the statistics uploads. Payload byte layouts match what the
//! deployed detectors emit.

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use vdlink_protocol::MAX_CONTENT_SIZE;

/// Upper bound on detection channels.
pub const MAX_CHANNELS: u8 = 128;

/// Per-channel record size in the realtime payload.
const REALTIME_RECORD_SIZE: usize = 19;

/// Per-channel record size in the statistics payload.
const STATS_RECORD_SIZE: usize = 20;

/// Per-channel record size in the work-status payload.
const STATUS_RECORD_SIZE: usize = 4;

/// State of one detection channel.
#[derive(Debug, Clone)]
pub struct ChannelState {
    pub channel_id: u8,
    /// Class A flow this tick (length >= 12 m).
    pub count_a: u8,
    /// Class B flow this tick (6 m <= length < 12 m).
    pub count_b: u8,
    /// Class C flow this tick (length < 6 m).
    pub count_c: u8,
    /// Time occupancy, 0.1 % resolution.
    pub time_occupancy: u16,
    /// Speed in km/h.
    pub speed: u8,
    /// Vehicle length, 0.1 m resolution.
    pub vehicle_length: u16,
    /// Headway, 0.1 s resolution.
    pub headway: u8,
    /// Gap time, 0.1 s resolution.
    pub gap_time: u8,
    pub stop_count: u8,
    pub stop_duration: u8,
    pub occupy_sample_count: u8,
    /// 0 healthy, 1 faulted.
    pub status: u8,
}

impl ChannelState {
    fn new(channel_id: u8) -> Self {
        Self {
            channel_id,
            count_a: 0,
            count_b: 0,
            count_c: 0,
            time_occupancy: 250,
            speed: 50,
            vehicle_length: 60,
            headway: 20,
            gap_time: 15,
            stop_count: 0,
            stop_duration: 0,
            occupy_sample_count: 10,
            status: 0,
        }
    }
}

/// Simulated traffic state across all channels.
pub struct TrafficSimulator {
    channels: Vec<ChannelState>,
    total_a: u32,
    total_b: u32,
    total_c: u32,
}

impl TrafficSimulator {
    pub fn new(channels: u8) -> Self {
        let count = channels.min(MAX_CHANNELS);
        Self {
            channels: (1..=count).map(ChannelState::new).collect(),
            total_a: 0,
            total_b: 0,
            total_c: 0,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[ChannelState] {
        &self.channels
    }

    /// Advances the simulation by one tick.
    pub fn update(&mut self) {
        let mut rng = rand::thread_rng();
        for channel in &mut self.channels {
            channel.count_a = rng.gen_range(0..3);
            channel.count_b = rng.gen_range(0..5);
            channel.count_c = rng.gen_range(0..8);

            self.total_a += channel.count_a as u32;
            self.total_b += channel.count_b as u32;
            self.total_c += channel.count_c as u32;

            channel.time_occupancy = rng.gen_range(200..500);
            channel.speed = rng.gen_range(30..71);
            channel.vehicle_length = rng.gen_range(40..120);
            channel.headway = rng.gen_range(15..35);
            channel.gap_time = rng.gen_range(10..25);
            channel.status = if rng.gen_range(0..100) < 99 { 0 } else { 1 };
        }
    }

    /// Builds the realtime traffic payload: device time, channel count,
    /// then one 19-byte record per channel.
    pub fn realtime_payload(&self) -> Bytes {
        let count = self.fitting_channels(7, REALTIME_RECORD_SIZE);
        let mut buf = BytesMut::with_capacity(7 + count * REALTIME_RECORD_SIZE);
        put_device_time(&mut buf);
        buf.put_u8(count as u8);
        for channel in &self.channels[..count] {
            buf.put_u8(channel.channel_id);
            buf.put_u8(channel.count_a);
            buf.put_u8(channel.count_b);
            buf.put_u8(channel.count_c);
            buf.put_u16_le(channel.time_occupancy);
            buf.put_u8(channel.speed);
            buf.put_u16_le(channel.vehicle_length);
            buf.put_u8(channel.headway);
            buf.put_u8(channel.gap_time);
            buf.put_u8(channel.stop_count);
            buf.put_u8(channel.stop_duration);
            buf.put_u8(channel.occupy_sample_count);
            // Occupancy pattern sample.
            buf.put_u8(0x55);
            buf.put_bytes(0, 4);
        }
        buf.freeze()
    }

    /// Builds the statistics payload for the period ending now: start
    /// and end times, channel count, then one 20-byte record per
    /// channel carrying period totals and averages.
    pub fn statistics_payload(&self, period: Duration) -> Bytes {
        let count = self.fitting_channels(13, STATS_RECORD_SIZE);
        let mut buf = BytesMut::with_capacity(13 + count * STATS_RECORD_SIZE);

        let (end_secs, _) = device_time();
        let start_secs = end_secs.saturating_sub(period.as_secs() as u32);
        buf.put_u32_le(start_secs);
        buf.put_u16_le(0);
        buf.put_u32_le(end_secs);
        buf.put_u16_le(0);

        buf.put_u8(count as u8);
        for channel in &self.channels[..count] {
            buf.put_u8(channel.channel_id);
            buf.put_u16_le(self.total_a as u16);
            buf.put_u16_le(self.total_b as u16);
            buf.put_u16_le(self.total_c as u16);
            buf.put_u16_le(channel.time_occupancy);
            buf.put_u8(channel.speed);
            buf.put_u16_le(channel.vehicle_length);
            buf.put_u8(channel.headway);
            buf.put_u8(channel.gap_time);
            buf.put_u8(channel.stop_count);
            buf.put_u8(channel.stop_duration);
            buf.put_bytes(0, 4);
        }
        buf.freeze()
    }

    /// Builds the work-status payload: device time, channel count, then
    /// one 4-byte record per channel.
    pub fn status_payload(&self) -> Bytes {
        let count = self.fitting_channels(7, STATUS_RECORD_SIZE);
        let mut buf = BytesMut::with_capacity(7 + count * STATUS_RECORD_SIZE);
        put_device_time(&mut buf);
        buf.put_u8(count as u8);
        for channel in &self.channels[..count] {
            buf.put_u8(channel.channel_id);
            buf.put_u8(channel.status);
            buf.put_bytes(0, 2);
        }
        buf.freeze()
    }

    /// Number of channels whose records fit under the content cap.
    fn fitting_channels(&self, header: usize, record: usize) -> usize {
        let max = (MAX_CONTENT_SIZE - header) / record;
        if self.channels.len() > max {
            tracing::warn!(
                "Payload truncated to {} of {} channels",
                max,
                self.channels.len()
            );
        }
        self.channels.len().min(max)
    }
}

fn device_time() -> (u32, u16) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_secs() as u32, now.subsec_millis() as u16)
}

/// Appends the 6-byte device time: epoch seconds then milliseconds,
/// both little-endian.
fn put_device_time(buf: &mut BytesMut) {
    let (secs, millis) = device_time();
    buf.put_u32_le(secs);
    buf.put_u16_le(millis);
}
