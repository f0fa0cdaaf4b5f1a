use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use serde::{Serialize, Serializer};

/// A UTC timestamp as SQLite's `CURRENT_TIMESTAMP` writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time(time::OffsetDateTime);

pub(crate) const TIME_FORMAT : &[time::format_description::FormatItem<
    'static,
>] = time::macros::format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second]"
);

const DATE_FORMAT : &[time::format_description::FormatItem<'static>] =
    time::macros::format_description!("[month repr:long] [year]");

impl Time {
    /// Coarse form used on public pages, e.g. "March 2024".
    pub fn month_year(&self) -> String {
        self.0.format(&DATE_FORMAT).unwrap_or_default()
    }
}

impl Serialize for Time {
    fn serialize<S>(
        &self,
        serializer : S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        S : Serializer,
    {
        self.0
            .format(&TIME_FORMAT)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl FromSql for Time {
    fn column_result(value : ValueRef) -> FromSqlResult<Time> {
        let s = String::column_result(value)?;

        let dt = time::PrimitiveDateTime::parse(&s, &TIME_FORMAT)
            .map_err(|err| FromSqlError::Other(Box::new(err)))?;

        Ok(dt.assume_utc().into())
    }
}

impl From<time::OffsetDateTime> for Time {
    fn from(t : time::OffsetDateTime) -> Self {
        Time(t)
    }
}

impl std::ops::Deref for Time {
    type Target = time::OffsetDateTime;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqlite_timestamps() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let t : Time = conn
            .query_row("SELECT '2024-03-09 17:04:05'", [], |row| row.get(0))
            .unwrap();

        assert_eq!(t.year(), 2024);
        assert_eq!(t.hour(), 17);
        assert_eq!(t.month_year(), "March 2024");
        assert_eq!(
            serde_urlencoded::to_string([("t", t)]).unwrap(),
            "t=2024-03-09+17%3A04%3A05"
        );
    }
}
