//! Day and minute keys as stored in the database ("2024/01/31",
//! "2024/01/31 18:05"). Slash-separated, zero-padded, so lexical order
//! equals chronological order.

use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

pub fn fmt_date(d: Date) -> String {
    format!("{:04}/{:02}/{:02}", d.year(), d.month() as u8, d.day())
}

pub fn fmt_minute(dt: PrimitiveDateTime) -> String {
    format!("{} {:02}:{:02}", fmt_date(dt.date()), dt.hour(), dt.minute())
}

pub fn parse_date(s: &str) -> Result<Date, time::error::Parse> {
    Date::parse(s.trim(), format_description!("[year]/[month]/[day]"))
}

pub fn parse_minute(s: &str) -> Result<PrimitiveDateTime, time::error::Parse> {
    PrimitiveDateTime::parse(
        s.trim(),
        format_description!("[year]/[month]/[day] [hour]:[minute]"),
    )
}

/// Wall-clock "now" at the greenhouse, using the configured UTC offset.
pub fn now_local(offset: UtcOffset) -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc().to_offset(offset);
    PrimitiveDateTime::new(now.date(), now.time())
}

pub fn from_unix_local(ts: i64, offset: UtcOffset) -> Option<PrimitiveDateTime> {
    let dt = OffsetDateTime::from_unix_timestamp(ts).ok()?.to_offset(offset);
    Some(PrimitiveDateTime::new(dt.date(), dt.time()))
}

/// serde adapter for `Date` fields using the slash day format.
pub mod slash_date {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S: Serializer>(d: &Date, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::fmt_date(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Date, D::Error> {
        let s = String::deserialize(d)?;
        super::parse_date(&s).map_err(de::Error::custom)
    }
}

/// serde adapter for minute-granularity timestamps.
pub mod slash_minute {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use time::PrimitiveDateTime;

    pub fn serialize<S: Serializer>(dt: &PrimitiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::fmt_minute(*dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<PrimitiveDateTime, D::Error> {
        let s = String::deserialize(d)?;
        super::parse_minute(&s).map_err(de::Error::custom)
    }

    pub mod option {
        use serde::{de, Deserialize, Deserializer, Serializer};
        use time::PrimitiveDateTime;

        pub fn serialize<S: Serializer>(
            dt: &Option<PrimitiveDateTime>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => s.serialize_some(&crate::dates::fmt_minute(*dt)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<PrimitiveDateTime>, D::Error> {
            Option::<String>::deserialize(d)?
                .map(|s| crate::dates::parse_minute(&s).map_err(de::Error::custom))
                .transpose()
        }
    }
}
