use std::{fmt, str::FromStr, sync::LazyLock};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;

static YEAR_MONTH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})$").expect("static regex"));

/// The twelve THSR stations plus the `總計` column the report carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Station {
    Nangang,
    Taipei,
    Banqiao,
    Taoyuan,
    Hsinchu,
    Miaoli,
    Taichung,
    Changhua,
    Yunlin,
    Chiayi,
    Tainan,
    Zuoying,
    Total,
}

impl Station {
    /// Canonical order, which is also the `station_sequence` order.
    pub const ALL: [Station; 13] = [
        Station::Nangang,
        Station::Taipei,
        Station::Banqiao,
        Station::Taoyuan,
        Station::Hsinchu,
        Station::Miaoli,
        Station::Taichung,
        Station::Changhua,
        Station::Yunlin,
        Station::Chiayi,
        Station::Tainan,
        Station::Zuoying,
        Station::Total,
    ];

    /// The name used both as the report's column header and as the stored value.
    pub fn name(self) -> &'static str {
        match self {
            Station::Nangang => "南港",
            Station::Taipei => "台北",
            Station::Banqiao => "板橋",
            Station::Taoyuan => "桃園",
            Station::Hsinchu => "新竹",
            Station::Miaoli => "苗栗",
            Station::Taichung => "台中",
            Station::Changhua => "彰化",
            Station::Yunlin => "雲林",
            Station::Chiayi => "嘉義",
            Station::Tainan => "台南",
            Station::Zuoying => "左營",
            Station::Total => "總計",
        }
    }

    /// Fixed 1..=13 ordering code. Independent of the source table's column order.
    pub fn sequence(self) -> i32 {
        match self {
            Station::Nangang => 1,
            Station::Taipei => 2,
            Station::Banqiao => 3,
            Station::Taoyuan => 4,
            Station::Hsinchu => 5,
            Station::Miaoli => 6,
            Station::Taichung => 7,
            Station::Changhua => 8,
            Station::Yunlin => 9,
            Station::Chiayi => 10,
            Station::Tainan => 11,
            Station::Zuoying => 12,
            Station::Total => 13,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|station| station.name() == name)
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Station {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Direction {
    #[serde(rename = "進站")]
    Entry,
    #[serde(rename = "出站")]
    Exit,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Entry, Direction::Exit];

    /// Label stored in `entry_exit` and shown on the report's tab controls.
    pub fn label(self) -> &'static str {
        match self {
            Direction::Entry => "進站",
            Direction::Exit => "出站",
        }
    }

    /// ASCII name used for the `type` query parameter and export filenames.
    pub fn slug(self) -> &'static str {
        match self {
            Direction::Entry => "entry",
            Direction::Exit => "exit",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown entry/exit type: {0}")]
pub struct UnknownDirection(pub String);

impl FromStr for Direction {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "進站" | "entry" => Ok(Direction::Entry),
            "出站" | "exit" => Ok(Direction::Exit),
            other => Err(UnknownDirection(other.to_string())),
        }
    }
}

/// One month of one station's passenger count in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationRecord {
    pub year_month: String,
    pub station: Station,
    pub station_sequence: i32,
    pub visitor_number: u64,
    pub entry_exit: Direction,
}

impl StationRecord {
    pub fn new(year_month: String, station: Station, visitor_number: u64, entry_exit: Direction) -> Self {
        Self {
            year_month,
            station,
            station_sequence: station.sequence(),
            visitor_number,
            entry_exit,
        }
    }
}

/// A row as it sits in `hsr_vis_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct StoredRecord {
    pub id: i32,
    pub year_month: String,
    pub station_sequence: i32,
    pub station: String,
    pub visitor_number: i64,
    pub entry_exit: String,
    pub created_at: NaiveDateTime,
}

/// The calendar month before `today`, rendered `YYYY-MM`.
pub fn target_month(today: NaiveDate) -> String {
    let first_of_month = today.with_day(1).unwrap_or(today);
    (first_of_month - Duration::days(1))
        .format("%Y-%m")
        .to_string()
}

pub fn is_year_month(s: &str) -> bool {
    let Some(caps) = YEAR_MONTH_REGEX.captures(s) else {
        return false;
    };
    matches!(caps[2].parse::<u32>(), Ok(1..=12))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_follows_static_lookup() {
        let sequences: Vec<_> = Station::ALL.iter().map(|s| s.sequence()).collect();
        assert_eq!(sequences, (1..=13).collect::<Vec<_>>());
        assert_eq!(Station::from_name("南港").map(Station::sequence), Some(1));
        assert_eq!(Station::from_name("左營").map(Station::sequence), Some(12));
        assert_eq!(Station::from_name("總計").map(Station::sequence), Some(13));
        assert_eq!(Station::from_name("不存在"), None);
    }

    #[test]
    fn target_month_is_previous_calendar_month() {
        let march = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        assert_eq!(target_month(march), "2024-02");
        let first = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(target_month(first), "2024-02");
        let january = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert_eq!(target_month(january), "2024-12");
    }

    #[test]
    fn direction_accepts_label_and_slug() {
        assert_eq!("進站".parse::<Direction>().unwrap(), Direction::Entry);
        assert_eq!("exit".parse::<Direction>().unwrap(), Direction::Exit);
        assert!("無效類型".parse::<Direction>().is_err());
        assert_eq!(
            serde_json::to_string(&Direction::Exit).unwrap(),
            "\"出站\""
        );
    }

    #[test]
    fn year_month_format() {
        assert!(is_year_month("2024-01"));
        assert!(is_year_month("1999-12"));
        assert!(!is_year_month("2024-13"));
        assert!(!is_year_month("2024-1"));
        assert!(!is_year_month("2024/01"));
    }
}
