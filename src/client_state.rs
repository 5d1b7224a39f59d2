#![forbid(unsafe_code)]

//! Light-client state tracking.
//!
//! Supplies the raw facts (`last_update_timestamp`, `trusting_period_secs`);
//! staleness evaluation is left to the metrics consumer's alerting rules.

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::rest::{ChainQuery, QueryError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientState {
    pub last_update_timestamp: u64,
    pub trusting_period_secs: u64,
    pub counterparty_chain_id: String,
}

/// Fetch a fresh `ClientState`. On any query error the caller keeps its prior
/// value; a missing consensus timestamp falls back to `now`.
pub async fn refresh(
    query: &dyn ChainQuery,
    client_id: &str,
    now: u64,
) -> Result<ClientState, QueryError> {
    let raw = query.client_state(client_id).await?;
    let trusting_period_secs = parse_go_duration(&raw.trusting_period).unwrap_or(0);
    let last_update_timestamp = match query.latest_consensus_timestamp(client_id).await? {
        Some(ts) => parse_rfc3339_secs(&ts).unwrap_or(now),
        None => now,
    };
    Ok(ClientState {
        last_update_timestamp,
        trusting_period_secs,
        counterparty_chain_id: raw.counterparty_chain_id,
    })
}

/// Parse a Go duration string (`"336h0m0s"`, `"1209600s"`, ...) into whole
/// seconds. Fractional seconds are truncated.
pub fn parse_go_duration(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let mut total: u64 = 0;
    let mut num = String::new();
    let mut saw_unit = false;
    for c in s.chars() {
        if c.is_ascii_digit() || c == '.' {
            num.push(c);
            continue;
        }
        let value: u64 = num.split('.').next()?.parse().ok()?;
        let mult = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        total = total.saturating_add(value.saturating_mul(mult));
        num.clear();
        saw_unit = true;
    }
    if !num.is_empty() || !saw_unit {
        return None;
    }
    Some(total)
}

pub fn parse_rfc3339_secs(s: &str) -> Option<u64> {
    let parsed = OffsetDateTime::parse(s, &Rfc3339).ok()?;
    u64::try_from(parsed.unix_timestamp()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_go_durations() {
        assert_eq!(parse_go_duration("336h0m0s"), Some(1_209_600));
        assert_eq!(parse_go_duration("1209600s"), Some(1_209_600));
        assert_eq!(parse_go_duration("2h30m"), Some(9_000));
        assert_eq!(parse_go_duration("90m"), Some(5_400));
    }

    #[test]
    fn truncates_fractional_seconds() {
        assert_eq!(parse_go_duration("1209600.000000000s"), Some(1_209_600));
        assert_eq!(parse_go_duration("0.5s"), Some(0));
    }

    #[test]
    fn rejects_garbage_durations() {
        assert_eq!(parse_go_duration(""), None);
        assert_eq!(parse_go_duration("fortnight"), None);
        assert_eq!(parse_go_duration("12"), None);
        assert_eq!(parse_go_duration("3d"), None);
    }

    #[test]
    fn parses_rfc3339_timestamps() {
        assert_eq!(
            parse_rfc3339_secs("2020-01-01T00:00:00Z"),
            Some(1_577_836_800)
        );
        assert_eq!(
            parse_rfc3339_secs("2020-01-01T00:00:00.123456789Z"),
            Some(1_577_836_800)
        );
        assert_eq!(parse_rfc3339_secs("yesterday"), None);
    }
}
