use std::fmt;
use std::str::FromStr;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Chart timeframe codes, MT4-style.
///
/// Variant order matches span order, so the derived `Ord` ranks a larger
/// timeframe higher. This is what breaks priority ties between alerts of
/// equal magnitude.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
    MN,
}

impl Timeframe {
    pub const ALL: [Timeframe; 9] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::W1,
        Timeframe::MN,
    ];

    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
            Timeframe::W1 => 10080,
            Timeframe::MN => 43200,
        }
    }

    pub fn seconds(&self) -> i64 {
        self.minutes() * 60
    }

    pub fn span(&self) -> TimeDelta {
        TimeDelta::minutes(self.minutes())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
            Timeframe::MN => "MN",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .find(|tf| tf.as_str() == s.to_uppercase())
            .copied()
            .ok_or_else(|| format!("unsupported timeframe: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert_eq!("m5".parse::<Timeframe>().unwrap(), Timeframe::M5);
        assert!("M2".parse::<Timeframe>().is_err());
    }

    #[test]
    fn spans() {
        assert_eq!(Timeframe::M1.span(), TimeDelta::minutes(1));
        assert_eq!(Timeframe::H4.seconds(), 4 * 3600);
        assert_eq!(Timeframe::W1.minutes(), 10080);
    }

    #[test]
    fn larger_span_ranks_higher() {
        assert!(Timeframe::H1 > Timeframe::M5);
        assert!(Timeframe::MN > Timeframe::W1);
        let mut tfs = vec![Timeframe::H1, Timeframe::M1, Timeframe::M30];
        tfs.sort();
        assert_eq!(tfs, vec![Timeframe::M1, Timeframe::M30, Timeframe::H1]);
    }
}
