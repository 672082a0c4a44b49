use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// NORAD catalog id (satellite unique identifier).
pub type NoradId = u32;

pub type StationId = i64;
pub type ObservationId = i64;
pub type TleId = i64;
pub type DemodDataId = i64;

/// Vetting classification of an observation's recorded data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VettedStatus {
    Unknown,
    Good,
    Bad,
    Failed,
}

impl VettedStatus {
    pub fn is_vetted(self) -> bool {
        self != VettedStatus::Unknown
    }
}

impl fmt::Display for VettedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VettedStatus::Unknown => "unknown",
            VettedStatus::Good => "good",
            VettedStatus::Bad => "bad",
            VettedStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Station operational state, derived from heartbeat recency and the
/// testing flag. Never set directly by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationStatus {
    Offline = 0,
    Testing = 1,
    Online = 2,
}

impl fmt::Display for StationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StationStatus::Offline => "Offline",
            StationStatus::Testing => "Testing",
            StationStatus::Online => "Online",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SatelliteStatus {
    #[serde(rename = "alive")]
    Alive,
    #[serde(rename = "dead")]
    Dead,
    #[serde(rename = "re-entered")]
    Reentered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Satellite {
    pub norad_cat_id: NoradId,
    pub name: String,
    /// Alternate names, newline separated.
    #[serde(default)]
    pub names: String,
    #[serde(default)]
    pub image: Option<String>,
    /// Operator-maintained TLE, catalog sets are not applied.
    #[serde(default)]
    pub manual_tle: bool,
    pub status: SatelliteStatus,
}

/// A three-line orbital element set as distributed by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TleSet {
    pub tle0: String,
    pub tle1: String,
    pub tle2: String,
    #[serde(default)]
    pub source: String,
    pub updated: DateTime<Utc>,
}

impl TleSet {
    /// Epoch parsed from columns 18..32 of line 1 (two-digit year plus
    /// fractional day of year).
    pub fn epoch(&self) -> Option<DateTime<Utc>> {
        let field = self.tle1.get(18..32)?.trim();
        let (yearday, frac) = field.split_once('.')?;
        let yy: i32 = yearday.get(..2)?.parse().ok()?;
        let doy: u32 = yearday.get(2..)?.trim_start_matches('0').parse().ok()?;
        let year = if yy < 57 { 2000 + yy } else { 1900 + yy };
        let frac_day: f64 = format!("0.{}", frac).parse().ok()?;
        let midnight = NaiveDate::from_yo_opt(year, doy)?.and_hms_opt(0, 0, 0)?;
        let offset = chrono::Duration::milliseconds((frac_day * 86_400_000.0) as i64);
        Some(Utc.from_utc_datetime(&(midnight + offset)))
    }
}

/// Append-only TLE history record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tle {
    pub id: TleId,
    pub norad_cat_id: Option<NoradId>,
    #[serde(flatten)]
    pub set: TleSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransmitterKind {
    Transmitter,
    Transceiver,
    Transponder,
}

impl Default for TransmitterKind {
    fn default() -> Self {
        TransmitterKind::Transmitter
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transmitter {
    /// External catalog id, upsert key.
    pub uuid: String,
    pub description: String,
    pub alive: bool,
    #[serde(default)]
    pub kind: TransmitterKind,
    pub uplink_low: Option<i64>,
    pub uplink_high: Option<i64>,
    pub uplink_drift: Option<i32>,
    pub downlink_low: Option<i64>,
    pub downlink_high: Option<i64>,
    pub downlink_drift: Option<i32>,
    pub mode: Option<String>,
    #[serde(default)]
    pub invert: bool,
    pub baud: Option<f64>,
    pub norad_cat_id: Option<NoradId>,
    /// Demod frames of this transmitter are forwarded to the external
    /// telemetry database.
    #[serde(default)]
    pub sync_to_db: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    /// Meters above sea level.
    pub alt: i32,
    #[serde(default)]
    pub qthlocator: String,
    pub testing: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub status: StationStatus,
    /// Degrees above the horizon a pass must reach to be schedulable.
    pub horizon: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub client_version: String,
    pub target_utilization: Option<u8>,
    pub created: DateTime<Utc>,
}

/// Fields a caller provides when registering a station. Id, status and the
/// initial status-log row are filled in by the store.
#[derive(Debug, Clone)]
pub struct NewStation {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub alt: i32,
    pub qthlocator: String,
    pub testing: bool,
    pub horizon: u32,
    pub description: String,
    pub target_utilization: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationStatusLog {
    pub station_id: StationId,
    pub status: StationStatus,
    pub changed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,
    pub norad_cat_id: NoradId,
    pub transmitter_uuid: String,
    /// Denormalized from the transmitter at creation, checked by the
    /// auto-vet and sync exclusion lists.
    pub transmitter_mode: Option<String>,
    pub station_id: StationId,
    pub author: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Element set assigned at scheduling time; refreshed only while the
    /// observation is still far in the future.
    pub tle: Option<TleSet>,
    /// Relative path of the recorded audio, under the media root.
    pub payload: Option<String>,
    pub waterfall: Option<String>,
    pub vetted_status: VettedStatus,
    pub vetted_datetime: Option<DateTime<Utc>>,
    pub vetted_user: Option<String>,
    pub testing: bool,
    pub rise_azimuth: Option<f64>,
    pub max_altitude: Option<f64>,
    pub set_azimuth: Option<f64>,
    pub archived: bool,
    pub archive_identifier: Option<String>,
    pub archive_url: Option<String>,
    #[serde(default)]
    pub audio_zipped: bool,
    #[serde(default)]
    pub client_version: String,
    #[serde(default)]
    pub client_metadata: String,
}

impl Observation {
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.end < now
    }

    pub fn is_future(&self, now: DateTime<Utc>) -> bool {
        self.end > now
    }

    pub fn is_vetted(&self) -> bool {
        self.vetted_status.is_vetted()
    }

    pub fn is_good(&self) -> bool {
        self.vetted_status == VettedStatus::Good
    }

    pub fn is_bad(&self) -> bool {
        self.vetted_status == VettedStatus::Bad
    }

    pub fn is_failed(&self) -> bool {
        self.vetted_status == VettedStatus::Failed
    }

    /// Path of the local audio payload, if the pointer is set and the file
    /// actually exists with data.
    pub fn local_payload_path(&self, media_root: &Path) -> Option<PathBuf> {
        let relative = self.payload.as_deref()?;
        let path = media_root.join(relative);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Some(path),
            _ => None,
        }
    }

    pub fn has_audio(&self, media_root: &Path) -> bool {
        self.archive_url.is_some() || self.local_payload_path(media_root).is_some()
    }

    pub fn has_waterfall(&self, media_root: &Path) -> bool {
        let relative = match self.waterfall.as_deref() {
            Some(relative) => relative,
            None => return false,
        };
        let path = media_root.join(relative);
        matches!(std::fs::metadata(&path), Ok(meta) if meta.is_file() && meta.len() > 0)
    }
}

/// Fields a client upload provides when scheduling an observation.
#[derive(Debug, Clone)]
pub struct NewObservation {
    pub norad_cat_id: NoradId,
    pub transmitter_uuid: String,
    pub station_id: StationId,
    pub author: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub rise_azimuth: Option<f64>,
    pub max_altitude: Option<f64>,
    pub set_azimuth: Option<f64>,
    pub client_version: String,
    pub client_metadata: String,
}

/// One decoded data frame extracted from a recorded transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemodData {
    pub id: DemodDataId,
    /// Stable identifier used to deduplicate pushes to the external
    /// telemetry database.
    pub uuid: String,
    pub observation_id: ObservationId,
    pub payload_demod: String,
    /// One-way marker: set after a confirmed external sync, never reset.
    pub copied_to_db: bool,
}

/// Filters for observation listings. All fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct ObservationFilter {
    pub station_id: Option<StationId>,
    pub norad_cat_id: Option<NoradId>,
    pub transmitter_uuid: Option<String>,
    pub vetted_status: Option<VettedStatus>,
    pub start_after: Option<DateTime<Utc>>,
    pub end_before: Option<DateTime<Utc>>,
    pub testing: Option<bool>,
}

impl ObservationFilter {
    pub fn matches(&self, observation: &Observation) -> bool {
        if let Some(station_id) = self.station_id {
            if observation.station_id != station_id {
                return false;
            }
        }
        if let Some(norad_cat_id) = self.norad_cat_id {
            if observation.norad_cat_id != norad_cat_id {
                return false;
            }
        }
        if let Some(uuid) = &self.transmitter_uuid {
            if &observation.transmitter_uuid != uuid {
                return false;
            }
        }
        if let Some(status) = self.vetted_status {
            if observation.vetted_status != status {
                return false;
            }
        }
        if let Some(start_after) = self.start_after {
            if observation.start <= start_after {
                return false;
            }
        }
        if let Some(end_before) = self.end_before {
            if observation.end >= end_before {
                return false;
            }
        }
        if let Some(testing) = self.testing {
            if observation.testing != testing {
                return false;
            }
        }
        true
    }
}

/// Relative artifact path for an observation file.
pub fn observation_file_name(observation_id: ObservationId, filename: &str) -> String {
    format!("data_obs/{}/{}", observation_id, filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn sample_set(updated: &str) -> TleSet {
        TleSet {
            tle0: "ISS (ZARYA)".to_string(),
            tle1: "1 25544U 98067A   20029.54791435  .00016717  00000-0  10270-3 0  9004"
                .to_string(),
            tle2: "2 25544  51.6426 297.1399 0006846  88.9123 271.2873 15.49512395 10631"
                .to_string(),
            source: "catalog".to_string(),
            updated: updated.parse().unwrap(),
        }
    }

    #[test]
    fn tle_epoch_parses_year_and_day() {
        let set = sample_set("2020-01-29T15:00:00Z");
        let epoch = set.epoch().unwrap();
        assert_eq!(epoch.year(), 2020);
        assert_eq!(epoch.ordinal(), 29);
        // 0.54791435 of a day is just short of 13:09 UTC
        assert_eq!(epoch.format("%H:%M:%S").to_string(), "13:08:59");
    }

    #[test]
    fn tle_epoch_rejects_short_line() {
        let mut set = sample_set("2020-01-29T15:00:00Z");
        set.tle1 = "1 25544U".to_string();
        assert!(set.epoch().is_none());
    }

    #[test]
    fn filter_combines_fields() {
        let now = Utc::now();
        let observation = Observation {
            id: 1,
            norad_cat_id: 25544,
            transmitter_uuid: "abcd".to_string(),
            transmitter_mode: Some("BPSK1200".to_string()),
            station_id: 7,
            author: "op".to_string(),
            start: now,
            end: now + chrono::Duration::minutes(10),
            tle: None,
            payload: None,
            waterfall: None,
            vetted_status: VettedStatus::Good,
            vetted_datetime: Some(now),
            vetted_user: None,
            testing: false,
            rise_azimuth: None,
            max_altitude: None,
            set_azimuth: None,
            archived: false,
            archive_identifier: None,
            archive_url: None,
            audio_zipped: false,
            client_version: String::new(),
            client_metadata: String::new(),
        };

        let mut filter = ObservationFilter {
            station_id: Some(7),
            vetted_status: Some(VettedStatus::Good),
            ..Default::default()
        };
        assert!(filter.matches(&observation));

        filter.norad_cat_id = Some(40908);
        assert!(!filter.matches(&observation));
    }

    #[test]
    fn vetted_status_round_trips_lowercase() {
        let json = serde_json::to_string(&VettedStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
        let back: VettedStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, VettedStatus::Failed);
    }
}
